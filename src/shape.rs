//! Collision Shapes
//!
//! Closed set of geometric primitives shared (never copied) between bodies.
//!
//! # Queries
//!
//! Every variant answers the same four questions in its local frame:
//!
//! - `phi_with_normal(p)`: signed distance (negative inside) and outward normal
//! - `bounding_box()`: local bounds, `None` for unbounded shapes (planes)
//! - `support(dir, thickness)`: farthest point along `dir`, inflated by `thickness`
//! - `is_convex()`
//!
//! Degenerate directions never fail: they fall back to `(1, 0, 0)`.

use std::sync::Arc;

use crate::error::SolverError;
use crate::levelset::LevelSet;
use crate::math::{Transform, Vec3, KINDA_SMALL_NUMBER, SMALL_NUMBER};

/// Shared, immutable shape geometry
pub type ShapeHandle = Arc<Shape>;

/// Upper bound on convex hull input points (face search is quartic)
pub const MAX_HULL_POINTS: usize = 128;

// ============================================================================
// Axis-Aligned Bounding Box
// ============================================================================

/// Axis-aligned bounding box, also used as the box primitive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new box
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box from center and half extents
    #[inline]
    pub fn from_center_half(center: Vec3, half: Vec3) -> Self {
        Self::new(center - half, center + half)
    }

    /// Degenerate box containing a single point
    #[inline]
    pub fn from_point(p: Vec3) -> Self {
        Self::new(p, p)
    }

    /// Check if two boxes overlap (touching counts)
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Check if a point lies inside or on the box
    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Smallest box containing both
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Grow to include a point
    #[inline]
    pub fn grow_to_include(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Inflate every face by `thickness`
    #[inline]
    pub fn thicken(&self, thickness: f32) -> Aabb {
        let t = Vec3::splat(thickness);
        Aabb::new(self.min - t, self.max + t)
    }

    /// Inflate by a per-axis amount
    #[inline]
    pub fn thicken_vec(&self, thickness: Vec3) -> Aabb {
        Aabb::new(self.min - thickness, self.max + thickness)
    }

    /// Size along each axis
    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Axis of largest extent
    #[inline]
    pub fn largest_axis(&self) -> usize {
        self.extents().max_axis()
    }

    /// Surface area (used for BVH statistics)
    pub fn surface_area(&self) -> f32 {
        let e = self.extents();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    /// The eight corners
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after a rigid transform
    pub fn transformed(&self, tm: &Transform) -> Aabb {
        let corners = self.corners();
        let mut out = Aabb::from_point(tm.transform_point(corners[0]));
        for &c in &corners[1..] {
            out.grow_to_include(tm.transform_point(c));
        }
        out
    }

    /// Signed distance and outward normal
    pub fn phi_with_normal(&self, p: Vec3) -> (f32, Vec3) {
        let max_dist = p - self.max;
        let min_dist = self.min - p;
        if max_dist.max_element() <= 0.0 && min_dist.max_element() <= 0.0 {
            // Inside: nearest face wins
            let mut phi = f32::MAX;
            let mut normal = Vec3::UNIT_X;
            for axis in 0..3 {
                let to_max = -max_dist[axis];
                if to_max < phi {
                    phi = to_max;
                    normal = Vec3::axis_vector(axis);
                }
                let to_min = -min_dist[axis];
                if to_min < phi {
                    phi = to_min;
                    normal = -Vec3::axis_vector(axis);
                }
            }
            return (-phi, normal);
        }
        let clamped = p.max(self.min).min(self.max);
        let diff = p - clamped;
        let dist = diff.length();
        (dist, diff.normalize_or(Vec3::UNIT_X))
    }

    /// Signed distance only
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.phi_with_normal(p).0
    }

    /// Farthest corner along `dir`, pushed out by `thickness`
    #[inline]
    pub fn support(&self, dir: Vec3, thickness: f32) -> Vec3 {
        let corner = Vec3::new(
            if dir.x >= 0.0 { self.max.x } else { self.min.x },
            if dir.y >= 0.0 { self.max.y } else { self.min.y },
            if dir.z >= 0.0 { self.max.z } else { self.min.z },
        );
        if thickness != 0.0 {
            corner + dir.normalize_or(Vec3::UNIT_X) * thickness
        } else {
            corner
        }
    }

    /// Corners, face centres and edge midpoints (26 points)
    pub fn sample_points(&self) -> Vec<Vec3> {
        let mut points = Vec::with_capacity(26);
        let e = self.extents();
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    if i == 1 && j == 1 && k == 1 {
                        continue;
                    }
                    let t = Vec3::new(i as f32, j as f32, k as f32) * 0.5;
                    points.push(self.min + e.mul_elem(t));
                }
            }
        }
        points
    }
}

// ============================================================================
// Sphere
// ============================================================================

/// Sphere primitive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    /// Center in local space
    pub center: Vec3,
    /// Radius
    pub radius: f32,
}

impl Sphere {
    /// Create a new sphere
    #[inline]
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    #[inline]
    fn phi_with_normal(&self, p: Vec3) -> (f32, Vec3) {
        let d = p - self.center;
        (d.length() - self.radius, d.normalize_or(Vec3::UNIT_X))
    }
}

// ============================================================================
// Plane
// ============================================================================

/// Infinite half-space `normal . p <= distance`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Unit outward normal
    pub normal: Vec3,
    /// Offset along the normal
    pub distance: f32,
}

impl Plane {
    /// Create a plane; the normal is normalized (degenerate normals become `+X`)
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self {
            normal: normal.normalize_or(Vec3::UNIT_X),
            distance,
        }
    }

    /// Plane through `point` with the given normal
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let n = normal.normalize_or(Vec3::UNIT_X);
        Self {
            normal: n,
            distance: n.dot(point),
        }
    }

    /// Signed distance to the plane
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.distance
    }
}

// ============================================================================
// Convex Hull
// ============================================================================

/// Convex polytope described by its vertices and face planes
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexHull {
    /// Hull vertices
    pub vertices: Vec<Vec3>,
    /// Outward face planes
    pub planes: Vec<Plane>,
    bounds: Aabb,
}

impl ConvexHull {
    /// Build the hull of a point set
    ///
    /// Faces are found by testing every point triple for a supporting plane,
    /// so the input is capped at [`MAX_HULL_POINTS`]. Points that lie on no
    /// face are dropped.
    pub fn from_points(points: &[Vec3]) -> Result<Self, SolverError> {
        if points.len() > MAX_HULL_POINTS {
            return Err(SolverError::CapacityExceeded {
                resource: "convex hull points",
                limit: MAX_HULL_POINTS,
            });
        }
        if points.len() < 4 || points.iter().any(|p| !p.is_finite()) {
            return Err(SolverError::DegenerateGeometry {
                context: "convex hull point set",
            });
        }

        let mut bounds = Aabb::from_point(points[0]);
        for &p in &points[1..] {
            bounds.grow_to_include(p);
        }
        let eps = bounds.extents().max_element().max(SMALL_NUMBER) * 1e-5;

        let mut planes: Vec<Plane> = Vec::new();
        let n = points.len();
        for i in 0..n {
            for j in (i + 1)..n {
                for k in (j + 1)..n {
                    let Some(normal) =
                        (points[j] - points[i]).cross(points[k] - points[i]).try_normalize()
                    else {
                        continue;
                    };
                    let d = normal.dot(points[i]);
                    let (mut above, mut below) = (false, false);
                    for p in points {
                        let s = normal.dot(*p) - d;
                        above |= s > eps;
                        below |= s < -eps;
                    }
                    let candidate = match (above, below) {
                        (false, _) => Plane { normal, distance: d },
                        (true, false) => Plane {
                            normal: -normal,
                            distance: -d,
                        },
                        (true, true) => continue,
                    };
                    let duplicate = planes.iter().any(|pl| {
                        pl.normal.dot(candidate.normal) > 1.0 - KINDA_SMALL_NUMBER
                            && (pl.distance - candidate.distance).abs() <= eps
                    });
                    if !duplicate {
                        planes.push(candidate);
                    }
                }
            }
        }

        if planes.len() < 4 {
            return Err(SolverError::DegenerateGeometry {
                context: "convex hull (coplanar points)",
            });
        }

        let vertices: Vec<Vec3> = points
            .iter()
            .copied()
            .filter(|p| planes.iter().any(|pl| pl.signed_distance(*p).abs() <= eps))
            .collect();

        Ok(Self {
            vertices,
            planes,
            bounds,
        })
    }

    /// Local bounds
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn phi_with_normal(&self, p: Vec3) -> (f32, Vec3) {
        let mut phi = f32::MIN;
        let mut normal = Vec3::UNIT_X;
        for plane in &self.planes {
            let d = plane.signed_distance(p);
            if d > phi {
                phi = d;
                normal = plane.normal;
            }
        }
        (phi, normal)
    }

    fn support(&self, dir: Vec3, thickness: f32) -> Vec3 {
        let mut best = self.vertices[0];
        let mut best_dot = best.dot(dir);
        for &v in &self.vertices[1..] {
            let d = v.dot(dir);
            if d > best_dot {
                best_dot = d;
                best = v;
            }
        }
        if thickness != 0.0 {
            best + dir.normalize_or(Vec3::UNIT_X) * thickness
        } else {
            best
        }
    }
}

// ============================================================================
// Union
// ============================================================================

/// One child of a union shape
#[derive(Clone, Debug)]
pub struct UnionMember {
    /// Child-to-union transform
    pub transform: Transform,
    /// Child geometry
    pub shape: ShapeHandle,
}

// ============================================================================
// Shape
// ============================================================================

/// Discriminant of [`Shape`], used by narrow-phase dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// Sphere
    Sphere,
    /// Box
    Box,
    /// Plane
    Plane,
    /// Convex hull
    Convex,
    /// Sampled level set
    LevelSet,
    /// Union of child shapes
    Union,
}

/// Collision geometry
#[derive(Clone, Debug)]
pub enum Shape {
    /// Sphere
    Sphere(Sphere),
    /// Oriented box (axis-aligned in local space)
    Box(Aabb),
    /// Infinite plane
    Plane(Plane),
    /// Convex polytope
    Convex(ConvexHull),
    /// Grid-sampled signed distance field
    LevelSet(LevelSet),
    /// Compound of transformed children
    Union(Vec<UnionMember>),
}

impl Shape {
    /// Sphere centered at the origin
    pub fn sphere(radius: f32) -> ShapeHandle {
        Arc::new(Shape::Sphere(Sphere::new(Vec3::ZERO, radius)))
    }

    /// Box centered at the origin
    pub fn cuboid(half_extents: Vec3) -> ShapeHandle {
        Arc::new(Shape::Box(Aabb::from_center_half(Vec3::ZERO, half_extents)))
    }

    /// Plane through the origin with the given normal
    pub fn plane(normal: Vec3) -> ShapeHandle {
        Arc::new(Shape::Plane(Plane::new(normal, 0.0)))
    }

    /// Shape discriminant
    #[inline]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Sphere(_) => ShapeKind::Sphere,
            Shape::Box(_) => ShapeKind::Box,
            Shape::Plane(_) => ShapeKind::Plane,
            Shape::Convex(_) => ShapeKind::Convex,
            Shape::LevelSet(_) => ShapeKind::LevelSet,
            Shape::Union(_) => ShapeKind::Union,
        }
    }

    /// Signed distance (negative inside) and outward unit normal
    pub fn phi_with_normal(&self, p: Vec3) -> (f32, Vec3) {
        match self {
            Shape::Sphere(s) => s.phi_with_normal(p),
            Shape::Box(b) => b.phi_with_normal(p),
            Shape::Plane(pl) => (pl.signed_distance(p), pl.normal),
            Shape::Convex(c) => c.phi_with_normal(p),
            Shape::LevelSet(l) => l.phi_with_normal(p),
            Shape::Union(members) => {
                let mut best = (f32::MAX, Vec3::UNIT_X);
                for m in members {
                    let local = m.transform.inverse_transform_point(p);
                    let (phi, n) = m.shape.phi_with_normal(local);
                    if phi < best.0 {
                        best = (phi, m.transform.transform_vector(n));
                    }
                }
                best
            }
        }
    }

    /// Signed distance only
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        match self {
            Shape::Plane(pl) => pl.signed_distance(p),
            Shape::LevelSet(l) => l.signed_distance(p),
            _ => self.phi_with_normal(p).0,
        }
    }

    /// Local bounds, `None` for unbounded geometry
    pub fn bounding_box(&self) -> Option<Aabb> {
        match self {
            Shape::Sphere(s) => Some(Aabb::from_center_half(s.center, Vec3::splat(s.radius))),
            Shape::Box(b) => Some(*b),
            Shape::Plane(_) => None,
            Shape::Convex(c) => Some(c.bounds),
            Shape::LevelSet(l) => Some(l.bounds()),
            Shape::Union(members) => {
                let mut out: Option<Aabb> = None;
                for m in members {
                    let child = m.shape.bounding_box()?.transformed(&m.transform);
                    out = Some(out.map_or(child, |b| b.union(&child)));
                }
                out
            }
        }
    }

    /// Whether the shape has finite bounds
    #[inline]
    pub fn has_bounding_box(&self) -> bool {
        self.bounding_box().is_some()
    }

    /// Farthest point along `dir`, inflated by `thickness`
    pub fn support(&self, dir: Vec3, thickness: f32) -> Vec3 {
        match self {
            Shape::Sphere(s) => s.center + dir.normalize_or(Vec3::UNIT_X) * (s.radius + thickness),
            Shape::Box(b) => b.support(dir, thickness),
            Shape::Plane(pl) => pl.normal * pl.distance,
            Shape::Convex(c) => c.support(dir, thickness),
            Shape::LevelSet(l) => l.bounds().support(dir, thickness),
            Shape::Union(members) => {
                let mut best = Vec3::ZERO;
                let mut best_dot = f32::MIN;
                for m in members {
                    let local_dir = m.transform.inverse_transform_vector(dir);
                    let p = m.transform.transform_point(m.shape.support(local_dir, thickness));
                    let d = p.dot(dir);
                    if d > best_dot {
                        best_dot = d;
                        best = p;
                    }
                }
                best
            }
        }
    }

    /// Convexity (level sets and unions are treated as non-convex)
    #[inline]
    pub fn is_convex(&self) -> bool {
        matches!(
            self,
            Shape::Sphere(_) | Shape::Box(_) | Shape::Plane(_) | Shape::Convex(_)
        )
    }

    /// Default surface samples used when a body has no collision particles
    pub fn sample_points(&self) -> Vec<Vec3> {
        match self {
            Shape::Sphere(s) => {
                let mut points = Vec::with_capacity(26);
                for i in -1i32..=1 {
                    for j in -1i32..=1 {
                        for k in -1i32..=1 {
                            if i == 0 && j == 0 && k == 0 {
                                continue;
                            }
                            let dir = Vec3::new(i as f32, j as f32, k as f32).normalize_or(Vec3::UNIT_X);
                            points.push(s.center + dir * s.radius);
                        }
                    }
                }
                points
            }
            Shape::Box(b) => b.sample_points(),
            Shape::Plane(_) => Vec::new(),
            Shape::Convex(c) => c.vertices.clone(),
            Shape::LevelSet(l) => l.surface_samples(),
            Shape::Union(members) => members
                .iter()
                .flat_map(|m| {
                    m.shape
                        .sample_points()
                        .into_iter()
                        .map(move |p| m.transform.transform_point(p))
                })
                .collect(),
        }
    }

    /// Leaf shapes of a union whose bounds intersect `bounds` (in this shape's frame)
    ///
    /// Non-union shapes return themselves. Children without bounds are always
    /// returned.
    pub fn find_all_intersecting<'a>(
        &'a self,
        bounds: Option<&Aabb>,
        out: &mut Vec<(&'a Shape, Transform)>,
        parent: Transform,
    ) {
        match self {
            Shape::Union(members) => {
                for m in members {
                    let tm = parent * m.transform;
                    let relevant = match (bounds, m.shape.bounding_box()) {
                        (Some(query), Some(child)) => child.transformed(&m.transform).intersects(query),
                        _ => true,
                    };
                    if relevant {
                        let child_query = bounds.map(|b| b.transformed(&m.transform.inverse()));
                        m.shape.find_all_intersecting(child_query.as_ref(), out, tm);
                    }
                }
            }
            _ => out.push((self, parent)),
        }
    }

    /// First point on the segment `start..end` within `thickness` of the surface
    ///
    /// Sphere-traces along the segment using the distance bound of `phi`.
    /// Planes are intersected analytically.
    pub fn find_closest_intersection(&self, start: Vec3, end: Vec3, thickness: f32) -> Option<Vec3> {
        const MAX_STEPS: usize = 64;
        const HIT_TOLERANCE: f32 = 1e-4;

        if let Shape::Plane(pl) = self {
            let d0 = pl.signed_distance(start) - thickness;
            let d1 = pl.signed_distance(end) - thickness;
            if d0 <= 0.0 {
                return Some(start);
            }
            if d1 > 0.0 {
                return None;
            }
            let t = d0 / (d0 - d1);
            return Some(start.lerp(end, t));
        }

        let delta = end - start;
        let length = delta.length();
        if length <= SMALL_NUMBER {
            return (self.signed_distance(start) <= thickness).then_some(start);
        }
        let dir = delta / length;
        let mut t = 0.0f32;
        for _ in 0..MAX_STEPS {
            let p = start + dir * t;
            let phi = self.signed_distance(p) - thickness;
            if phi <= HIT_TOLERANCE {
                return Some(p);
            }
            t += phi.max(HIT_TOLERANCE);
            if t > length {
                break;
            }
        }
        let phi_end = self.signed_distance(end) - thickness;
        (phi_end <= HIT_TOLERANCE).then_some(end)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Quat;

    fn unit_cube_points() -> Vec<Vec3> {
        Aabb::from_center_half(Vec3::ZERO, Vec3::ONE).corners().to_vec()
    }

    #[test]
    fn test_box_phi_inside_and_outside() {
        let b = Aabb::from_center_half(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        let (phi, n) = b.phi_with_normal(Vec3::new(0.8, 0.0, 0.0));
        assert!((phi + 0.2).abs() < 1e-6, "inside phi {phi}");
        assert_eq!(n, Vec3::UNIT_X);

        let (phi, n) = b.phi_with_normal(Vec3::new(0.0, -5.0, 0.0));
        assert!((phi - 3.0).abs() < 1e-6);
        assert_eq!(n, -Vec3::UNIT_Y);
    }

    #[test]
    fn test_box_sample_points() {
        let b = Aabb::from_center_half(Vec3::ZERO, Vec3::ONE);
        let samples = b.sample_points();
        assert_eq!(samples.len(), 26);
        for p in &samples {
            assert!(b.signed_distance(*p).abs() < 1e-6, "sample {p:?} not on surface");
        }
    }

    #[test]
    fn test_transformed_box_bounds() {
        let b = Aabb::from_center_half(Vec3::ZERO, Vec3::new(1.0, 0.5, 0.5));
        let tm = Transform::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_axis_angle(Vec3::UNIT_Z, core::f32::consts::FRAC_PI_2),
        );
        let t = b.transformed(&tm);
        assert!((t.extents().x - 1.0).abs() < 1e-5);
        assert!((t.extents().y - 2.0).abs() < 1e-5);
        assert!((t.center().x - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_plane_is_unbounded() {
        let s = Shape::plane(Vec3::UNIT_Z);
        assert!(s.bounding_box().is_none());
        assert_eq!(s.signed_distance(Vec3::new(3.0, 4.0, -0.5)), -0.5);
    }

    #[test]
    fn test_convex_hull_from_cube() {
        let mut pts = unit_cube_points();
        pts.push(Vec3::new(0.1, 0.2, 0.0)); // interior point is dropped
        let hull = ConvexHull::from_points(&pts).expect("cube hull");
        assert_eq!(hull.planes.len(), 6, "a cube has six faces");
        assert_eq!(hull.vertices.len(), 8);
        let shape = Shape::Convex(hull);
        let (phi, n) = shape.phi_with_normal(Vec3::new(0.0, 0.0, 0.75));
        assert!((phi + 0.25).abs() < 1e-5);
        assert!((n - Vec3::UNIT_Z).length() < 1e-5);
        let s = shape.support(Vec3::new(1.0, 1.0, 1.0), 0.0);
        assert_eq!(s, Vec3::ONE);
    }

    #[test]
    fn test_convex_hull_rejects_coplanar() {
        let pts = [
            Vec3::ZERO,
            Vec3::UNIT_X,
            Vec3::UNIT_Y,
            Vec3::new(1.0, 1.0, 0.0),
        ];
        assert!(matches!(
            ConvexHull::from_points(&pts),
            Err(SolverError::DegenerateGeometry { .. })
        ));
    }

    #[test]
    fn test_union_phi_takes_minimum() {
        let union = Shape::Union(vec![
            UnionMember {
                transform: Transform::from_translation(Vec3::new(-2.0, 0.0, 0.0)),
                shape: Shape::sphere(1.0),
            },
            UnionMember {
                transform: Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)),
                shape: Shape::sphere(1.0),
            },
        ]);
        let (phi, n) = union.phi_with_normal(Vec3::new(3.5, 0.0, 0.0));
        assert!((phi - 0.5).abs() < 1e-6);
        assert!((n - Vec3::UNIT_X).length() < 1e-6);
        let bounds = union.bounding_box().expect("bounded union");
        assert!((bounds.min.x + 3.0).abs() < 1e-6 && (bounds.max.x - 3.0).abs() < 1e-6);

        let mut leaves = Vec::new();
        let query = Aabb::from_center_half(Vec3::new(2.0, 0.0, 0.0), Vec3::splat(0.5));
        union.find_all_intersecting(Some(&query), &mut leaves, Transform::IDENTITY);
        assert_eq!(leaves.len(), 1, "only the right sphere overlaps");
        assert!((leaves[0].1.translation.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_find_closest_intersection() {
        let sphere = Shape::sphere(1.0);
        let hit = sphere
            .find_closest_intersection(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), 0.0)
            .expect("segment crosses sphere");
        assert!((hit.x + 1.0).abs() < 1e-3, "hit {hit:?}");
        assert!(sphere
            .find_closest_intersection(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(5.0, 3.0, 0.0), 0.0)
            .is_none());

        let plane = Shape::plane(Vec3::UNIT_Z);
        let hit = plane
            .find_closest_intersection(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, -2.0), 0.0)
            .expect("segment crosses plane");
        assert!(hit.z.abs() < 1e-6);
    }
}
