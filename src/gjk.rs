//! GJK Distance Query
//!
//! Gilbert-Johnson-Keerthi iteration over the Minkowski difference `A - B` of
//! two convex shapes in world space.
//!
//! # Features
//!
//! - Support pairs: every simplex vertex remembers the support points on both
//!   shapes, so the closest points fall out of the barycentric weights
//! - Nearest-point subroutine with point/edge/triangle/tetrahedron Voronoi
//!   region classification that also reduces the simplex
//! - Terminates when a new support point no longer moves toward the origin,
//!   or after [`MAX_ITERATIONS`] (best effort result is returned)

use tracing::trace;

use crate::math::{Transform, Vec3, SMALL_NUMBER};
use crate::shape::Shape;

/// Iteration cap
pub const MAX_ITERATIONS: usize = 100;

/// Relative progress below which iteration stops
const REL_TOLERANCE: f32 = 1e-5;

// ============================================================================
// Support
// ============================================================================

/// Vertex of the Minkowski difference with its witnesses
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SupportPoint {
    /// `a - b`
    pub w: Vec3,
    /// Support point on shape A (world)
    pub a: Vec3,
    /// Support point on shape B (world)
    pub b: Vec3,
}

/// Support of `A - B` along `dir`
#[inline]
pub fn support_pair(a: &Shape, tm_a: &Transform, b: &Shape, tm_b: &Transform, dir: Vec3) -> SupportPoint {
    let pa = tm_a.transform_point(a.support(tm_a.inverse_transform_vector(dir), 0.0));
    let pb = tm_b.transform_point(b.support(tm_b.inverse_transform_vector(-dir), 0.0));
    SupportPoint { w: pa - pb, a: pa, b: pb }
}

// ============================================================================
// Simplex
// ============================================================================

/// Simplex of up to 4 support points with barycentric weights of its
/// point closest to the origin
#[derive(Clone, Copy, Debug, Default)]
struct Simplex {
    points: [SupportPoint; 4],
    lambdas: [f32; 4],
    size: usize,
}

impl Simplex {
    fn single(p: SupportPoint) -> Self {
        let mut s = Self::default();
        s.points[0] = p;
        s.lambdas[0] = 1.0;
        s.size = 1;
        s
    }

    fn from_weighted(points: &[(SupportPoint, f32)]) -> Self {
        let mut s = Self::default();
        for (i, &(p, l)) in points.iter().enumerate().take(4) {
            s.points[i] = p;
            s.lambdas[i] = l;
        }
        s.size = points.len().min(4);
        s
    }

    fn push(&mut self, p: SupportPoint) {
        if self.size < 4 {
            self.points[self.size] = p;
            self.size += 1;
        }
    }

    fn contains(&self, w: Vec3) -> bool {
        self.points[..self.size]
            .iter()
            .any(|p| (p.w - w).length_squared() <= SMALL_NUMBER)
    }

    fn closest(&self) -> Vec3 {
        (0..self.size).fold(Vec3::ZERO, |acc, i| acc + self.points[i].w * self.lambdas[i])
    }

    fn witnesses(&self) -> (Vec3, Vec3) {
        (0..self.size).fold((Vec3::ZERO, Vec3::ZERO), |(a, b), i| {
            (a + self.points[i].a * self.lambdas[i], b + self.points[i].b * self.lambdas[i])
        })
    }

    /// Replace the simplex with the smallest sub-simplex holding the point
    /// nearest to the origin; returns true when the origin is enclosed
    fn reduce(&mut self) -> bool {
        let p = self.points;
        let (next, inside) = match self.size {
            1 => (Self::single(p[0]), false),
            2 => (nearest_segment(p[0], p[1]), false),
            3 => (nearest_triangle(p[0], p[1], p[2]), false),
            _ => nearest_tetrahedron(p[0], p[1], p[2], p[3]),
        };
        *self = next;
        inside
    }
}

fn nearest_segment(a: SupportPoint, b: SupportPoint) -> Simplex {
    let ab = b.w - a.w;
    let len_sq = ab.length_squared();
    if len_sq <= SMALL_NUMBER {
        return Simplex::single(a);
    }
    let t = -a.w.dot(ab) / len_sq;
    if t <= 0.0 {
        Simplex::single(a)
    } else if t >= 1.0 {
        Simplex::single(b)
    } else {
        Simplex::from_weighted(&[(a, 1.0 - t), (b, t)])
    }
}

fn nearest_triangle(a: SupportPoint, b: SupportPoint, c: SupportPoint) -> Simplex {
    let ab = b.w - a.w;
    let ac = c.w - a.w;

    let d1 = ab.dot(-a.w);
    let d2 = ac.dot(-a.w);
    if d1 <= 0.0 && d2 <= 0.0 {
        return Simplex::single(a);
    }

    let d3 = ab.dot(-b.w);
    let d4 = ac.dot(-b.w);
    if d3 >= 0.0 && d4 <= d3 {
        return Simplex::single(b);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return Simplex::from_weighted(&[(a, 1.0 - t), (b, t)]);
    }

    let d5 = ab.dot(-c.w);
    let d6 = ac.dot(-c.w);
    if d6 >= 0.0 && d5 <= d6 {
        return Simplex::single(c);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return Simplex::from_weighted(&[(a, 1.0 - t), (c, t)]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return Simplex::from_weighted(&[(b, 1.0 - t), (c, t)]);
    }

    let sum = va + vb + vc;
    if sum.abs() <= SMALL_NUMBER {
        // Collinear: the best edge wins
        return [nearest_segment(a, b), nearest_segment(a, c), nearest_segment(b, c)]
            .into_iter()
            .min_by(|x, y| x.closest().length_squared().total_cmp(&y.closest().length_squared()))
            .unwrap_or_else(|| Simplex::single(a));
    }
    let v = vb / sum;
    let w = vc / sum;
    Simplex::from_weighted(&[(a, 1.0 - v - w), (b, v), (c, w)])
}

/// Origin and `opposite` lie on different sides of plane `abc`
#[inline]
fn origin_outside(a: Vec3, b: Vec3, c: Vec3, opposite: Vec3) -> bool {
    let n = (b - a).cross(c - a);
    let sign_origin = (-a).dot(n);
    let sign_opposite = (opposite - a).dot(n);
    sign_origin * sign_opposite < 0.0 || sign_opposite.abs() <= SMALL_NUMBER
}

fn nearest_tetrahedron(a: SupportPoint, b: SupportPoint, c: SupportPoint, d: SupportPoint) -> (Simplex, bool) {
    let faces = [(a, b, c, d), (a, c, d, b), (a, d, b, c), (b, d, c, a)];
    let mut best: Option<Simplex> = None;
    for (p, q, r, opposite) in faces {
        if origin_outside(p.w, q.w, r.w, opposite.w) {
            let candidate = nearest_triangle(p, q, r);
            let closer = best.map_or(true, |b| {
                candidate.closest().length_squared() < b.closest().length_squared()
            });
            if closer {
                best = Some(candidate);
            }
        }
    }
    if let Some(s) = best {
        return (s, false);
    }

    // Inside: barycentric weights from signed volumes
    let volume = |p: Vec3, q: Vec3, r: Vec3, s: Vec3| (q - p).dot((r - p).cross(s - p));
    let total = volume(a.w, b.w, c.w, d.w);
    let o = Vec3::ZERO;
    let lambdas = if total.abs() > SMALL_NUMBER {
        [
            volume(o, b.w, c.w, d.w) / total,
            volume(a.w, o, c.w, d.w) / total,
            volume(a.w, b.w, o, d.w) / total,
            volume(a.w, b.w, c.w, o) / total,
        ]
    } else {
        [0.25; 4]
    };
    (
        Simplex::from_weighted(&[(a, lambdas[0]), (b, lambdas[1]), (c, lambdas[2]), (d, lambdas[3])]),
        true,
    )
}

// ============================================================================
// Query
// ============================================================================

/// Result of a GJK distance query
#[derive(Clone, Debug)]
pub struct GjkResult {
    /// The shapes overlap
    pub intersecting: bool,
    /// Separation distance (0 when intersecting)
    pub distance: f32,
    /// Closest point on A (world)
    pub point_a: Vec3,
    /// Closest point on B (world)
    pub point_b: Vec3,
    /// Final simplex vertices
    pub vertices: Vec<SupportPoint>,
    /// Iterations used
    pub iterations: usize,
}

/// Distance between two convex shapes
///
/// Shapes without a meaningful support mapping (planes, unions) give
/// undefined results; callers dispatch those elsewhere.
pub fn gjk_distance(a: &Shape, tm_a: &Transform, b: &Shape, tm_b: &Transform) -> GjkResult {
    let mut dir = tm_a.translation - tm_b.translation;
    if dir.length_squared() <= SMALL_NUMBER {
        dir = Vec3::UNIT_X;
    }
    let mut simplex = Simplex::single(support_pair(a, tm_a, b, tm_b, -dir));
    let mut v = simplex.points[0].w;
    let mut intersecting = false;
    let mut iterations = 0;

    while iterations < MAX_ITERATIONS {
        iterations += 1;
        let vv = v.length_squared();
        if vv <= SMALL_NUMBER {
            intersecting = true;
            break;
        }
        let sp = support_pair(a, tm_a, b, tm_b, -v);
        // Support point failed to improve on the current best direction
        if vv - v.dot(sp.w) <= REL_TOLERANCE * vv || simplex.contains(sp.w) {
            break;
        }
        simplex.push(sp);
        if simplex.reduce() {
            intersecting = true;
            break;
        }
        v = simplex.closest();
    }
    if iterations == MAX_ITERATIONS {
        trace!(iterations, "gjk iteration cap reached");
    }

    let (point_a, point_b) = simplex.witnesses();
    GjkResult {
        intersecting,
        distance: if intersecting { 0.0 } else { v.length() },
        point_a,
        point_b,
        vertices: simplex.points[..simplex.size].to_vec(),
        iterations,
    }
}

// ============================================================================
// Tests
// ============================================================================
