//! Narrow-Phase Contact Generation
//!
//! Computes the deepest contact point (and optionally a multi-point
//! manifold) between two bodies by dispatching on their shape pair.
//!
//! # Dispatch
//!
//! | A \ B   | Sphere        | Box           | Plane         | Union / other |
//! |---------|---------------|---------------|---------------|---------------|
//! | Sphere  | sphere-sphere | sphere-box    | sphere-plane  |               |
//! | Box     | box-sphere *  | box-box       | box-plane     |               |
//! | Plane   | plane-sphere *| plane-box *   | level set     |               |
//!
//! `*` pairs run the canonical routine with the bodies swapped and negate the
//! normal. Unions are expanded into their children (bounding-box pruned),
//! bounded convex pairs without a dedicated routine use GJK, and everything
//! else samples surface points of one body against the signed distance of
//! the other, in both directions.
//!
//! All routines only ever lower `phi`: the running best starts at the
//! contact margin, so `phi >= thickness` afterwards means "no contact".

use std::borrow::Cow;

use crate::contact::{ManifoldPoint, RigidBodyContact};
use crate::gjk::gjk_distance;
use crate::math::{Transform, Vec3, KINDA_SMALL_NUMBER, SMALL_NUMBER};
use crate::particles::{Pose, RigidBodies};
use crate::shape::{Aabb, Plane, Shape, ShapeKind, Sphere};

/// Parameters shared by every narrow-phase query of one pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactQuery {
    /// Which body transforms to read
    pub pose: Pose,
    /// Contact margin
    pub thickness: f32,
    /// Average penetrating samples instead of keeping the deepest one
    pub normal_averaging: bool,
}

impl ContactQuery {
    /// Query at `pose` with the given margin, normal averaging on
    pub fn new(pose: Pose, thickness: f32) -> Self {
        Self {
            pose,
            thickness,
            normal_averaging: true,
        }
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Running deepest point plus optional manifold sink
struct Collector<'m> {
    best: ManifoldPoint,
    thickness: f32,
    manifold: Option<&'m mut Vec<ManifoldPoint>>,
}

impl<'m> Collector<'m> {
    fn new(thickness: f32, manifold: Option<&'m mut Vec<ManifoldPoint>>) -> Self {
        Self {
            best: ManifoldPoint::empty(thickness),
            thickness,
            manifold,
        }
    }

    /// Add to the manifold if within the margin
    #[inline]
    fn record(&mut self, p: ManifoldPoint) {
        if p.phi < self.thickness {
            if let Some(points) = self.manifold.as_deref_mut() {
                points.push(p);
            }
        }
    }

    /// Record and keep if deeper
    #[inline]
    fn offer(&mut self, p: ManifoldPoint) {
        self.record(p);
        self.best.keep_deeper(p);
    }

    /// Run a routine written for the swapped pair and flip what it finds
    fn flipped(&mut self, run: impl FnOnce(&mut Collector<'_>)) {
        let mut scratch = Vec::new();
        let mut sub = Collector {
            best: self.best,
            thickness: self.thickness,
            manifold: self.manifold.is_some().then_some(&mut scratch),
        };
        run(&mut sub);
        let best = sub.best;
        if best.phi < self.best.phi {
            self.best = best.flipped();
        }
        if let Some(points) = self.manifold.as_deref_mut() {
            points.extend(scratch.into_iter().map(ManifoldPoint::flipped));
        }
    }
}

/// One side of a pair: a leaf shape placed in the world
struct Side<'a> {
    shape: &'a Shape,
    tm: Transform,
    /// Explicit samples overriding the shape's defaults
    samples: Option<&'a [Vec3]>,
}

impl<'a> Side<'a> {
    fn body(bodies: &'a RigidBodies, index: usize, tm: Transform) -> Self {
        Self {
            shape: &bodies.shape[index],
            tm,
            samples: bodies.collision_particles[index].as_deref(),
        }
    }

    fn child(shape: &'a Shape, tm: Transform) -> Self {
        Self {
            shape,
            tm,
            samples: None,
        }
    }

    fn samples(&self) -> Cow<'a, [Vec3]> {
        match self.samples {
            Some(points) => Cow::Borrowed(points),
            None => Cow::Owned(self.shape.sample_points()),
        }
    }
}

// ============================================================================
// Body-Level API
// ============================================================================

fn has_samples(bodies: &RigidBodies, index: usize) -> bool {
    match &bodies.collision_particles[index] {
        Some(points) => !points.is_empty(),
        None => bodies.shape[index].kind() != ShapeKind::Plane,
    }
}

/// Create the (empty) contact for a candidate pair
///
/// Orders the bodies the way the dispatcher expects: a lone union always
/// goes to `body_b`, and for sampled pairs `body_a` must own sample points.
/// Friction and restitution come from the combined body materials.
pub fn compute_constraint(bodies: &RigidBodies, body1: usize, body2: usize) -> RigidBodyContact {
    let union1 = bodies.shape[body1].kind() == ShapeKind::Union;
    let union2 = bodies.shape[body2].kind() == ShapeKind::Union;
    let swap = if union1 != union2 {
        union1
    } else {
        !has_samples(bodies, body1) && has_samples(bodies, body2)
    };
    let (a, b) = if swap { (body2, body1) } else { (body1, body2) };

    let mut contact = RigidBodyContact::new(a, b);
    let combined = bodies.material[a].combine(&bodies.material[b]);
    contact.friction = combined.friction;
    contact.restitution = combined.restitution;
    contact
}

/// Recompute the deepest point of `contact` at `query.pose`
pub fn update_constraint(bodies: &RigidBodies, query: &ContactQuery, contact: &mut RigidBodyContact) {
    let tm_a = bodies.transform(contact.body_a, query.pose);
    let tm_b = bodies.transform(contact.body_b, query.pose);
    update_constraint_at(bodies, query, contact, tm_a, tm_b);
}

/// Recompute the deepest point with explicit body transforms
///
/// `query.pose` is ignored; solvers use this to evaluate a contact against
/// poses they have not committed yet.
pub fn update_constraint_at(
    bodies: &RigidBodies,
    query: &ContactQuery,
    contact: &mut RigidBodyContact,
    tm_a: Transform,
    tm_b: Transform,
) {
    let a = Side::body(bodies, contact.body_a, tm_a);
    let b = Side::body(bodies, contact.body_b, tm_b);
    let mut collector = Collector::new(query.thickness, None);
    update_pair(&a, &b, query, &mut collector);
    contact.set_point(collector.best);
}

/// Recompute the deepest point and the full manifold of `contact`
///
/// Every candidate point within the margin is kept; the deepest point is
/// always part of the manifold when the bodies touch.
pub fn update_manifold(bodies: &RigidBodies, query: &ContactQuery, contact: &mut RigidBodyContact) {
    let a = Side::body(bodies, contact.body_a, bodies.transform(contact.body_a, query.pose));
    let b = Side::body(bodies, contact.body_b, bodies.transform(contact.body_b, query.pose));
    let mut points = std::mem::take(&mut contact.manifold);
    points.clear();
    let best = {
        let mut collector = Collector::new(query.thickness, Some(&mut points));
        update_pair(&a, &b, query, &mut collector);
        collector.best
    };
    if best.phi < query.thickness && !points.iter().any(|p| p == &best) {
        points.push(best);
    }
    contact.manifold = points;
    contact.set_point(best);
}

/// Add swept sample hits of `body_a` (from `x` to `p`) against `body_b`
///
/// For every sample of A, the segment between its start-of-step and predicted
/// world positions is traced through B's surface; a hit yields
/// `phi = -|end - hit|` at the predicted sample position.
pub fn update_swept_manifold(bodies: &RigidBodies, thickness: f32, contact: &mut RigidBodyContact) {
    let (ia, ib) = (contact.body_a, contact.body_b);
    let start_tm = bodies.transform(ia, Pose::Current);
    let end_tm = bodies.transform(ia, Pose::Predicted);
    let tm_b = bodies.transform(ib, Pose::Predicted);
    let shape_b = &bodies.shape[ib];

    let mut best = contact.point();
    for &sample in bodies.sample_points(ia).iter() {
        let start = start_tm.transform_point(sample);
        let end = end_tm.transform_point(sample);
        let local_start = tm_b.inverse_transform_point(start);
        let local_end = tm_b.inverse_transform_point(end);
        let Some(hit) = shape_b.find_closest_intersection(local_start, local_end, thickness) else {
            continue;
        };
        let (_, local_normal) = shape_b.phi_with_normal(hit);
        let point = ManifoldPoint {
            location: end,
            normal: tm_b.transform_vector(local_normal),
            phi: -(end - tm_b.transform_point(hit)).length(),
        };
        if point.phi < thickness {
            contact.manifold.push(point);
        }
        best.keep_deeper(point);
    }
    contact.set_point(best);
}

// ============================================================================
// Dispatch
// ============================================================================

fn update_pair(a: &Side<'_>, b: &Side<'_>, query: &ContactQuery, c: &mut Collector<'_>) {
    let t = query.thickness;
    match (a.shape, b.shape) {
        (Shape::Box(b1), Shape::Box(b2)) => {
            update_box_box(b1, &a.tm, b2, &b.tm, t, c);
            c.flipped(|c| update_box_box(b2, &b.tm, b1, &a.tm, t, c));
        }
        (Shape::Sphere(s1), Shape::Sphere(s2)) => update_sphere_sphere(s1, &a.tm, s2, &b.tm, c),
        (Shape::Box(bx), Shape::Plane(pl)) => update_box_plane(bx, &a.tm, pl, &b.tm, c),
        (Shape::Plane(pl), Shape::Box(bx)) => c.flipped(|c| update_box_plane(bx, &b.tm, pl, &a.tm, c)),
        (Shape::Sphere(s), Shape::Plane(pl)) => update_sphere_plane(s, &a.tm, pl, &b.tm, c),
        (Shape::Plane(pl), Shape::Sphere(s)) => c.flipped(|c| update_sphere_plane(s, &b.tm, pl, &a.tm, c)),
        (Shape::Sphere(s), Shape::Box(bx)) => update_sphere_box(s, &a.tm, bx, &b.tm, c),
        (Shape::Box(bx), Shape::Sphere(s)) => c.flipped(|c| update_sphere_box(s, &b.tm, bx, &a.tm, c)),
        (Shape::Union(_), Shape::Union(_)) => update_union_union(a, b, query, c),
        (_, Shape::Union(_)) => update_single_union(a, b, query, c),
        (Shape::Union(_), _) => c.flipped(|c| update_single_union(b, a, query, c)),
        (sa, sb) if sa.is_convex() && sb.is_convex() && sa.has_bounding_box() && sb.has_bounding_box() => {
            update_convex_convex(a, b, query, c)
        }
        _ => update_levelset(a, b, query, c),
    }
}

/// Leaf shapes of `union` relevant to `particle`, with world transforms
fn relevant_shapes<'u>(particle: &Side<'_>, union: &'u Shape, union_tm: &Transform, thickness: f32) -> Vec<(&'u Shape, Transform)> {
    let mut found = Vec::new();
    let bounds = particle
        .shape
        .bounding_box()
        .map(|bb| bb.transformed(&particle.tm.relative_to(union_tm)).thicken(thickness));
    union.find_all_intersecting(bounds.as_ref(), &mut found, Transform::IDENTITY);
    found
        .into_iter()
        .map(|(shape, tm)| (shape, *union_tm * tm))
        .collect()
}

fn update_single_union(a: &Side<'_>, b: &Side<'_>, query: &ContactQuery, c: &mut Collector<'_>) {
    for (child, tm) in relevant_shapes(a, b.shape, &b.tm, query.thickness) {
        update_pair(a, &Side::child(child, tm), query, c);
    }
}

fn update_union_union(a: &Side<'_>, b: &Side<'_>, query: &ContactQuery, c: &mut Collector<'_>) {
    for (child_b, tm_b) in relevant_shapes(a, b.shape, &b.tm, query.thickness) {
        let side_b = Side::child(child_b, tm_b);
        for (child_a, tm_a) in relevant_shapes(&side_b, a.shape, &a.tm, query.thickness) {
            update_pair(&Side::child(child_a, tm_a), &side_b, query, c);
        }
    }
}

// ============================================================================
// Analytic Pairs
// ============================================================================

fn update_sphere_sphere(s1: &Sphere, tm1: &Transform, s2: &Sphere, tm2: &Transform, c: &mut Collector<'_>) {
    let center1 = tm1.transform_point(s1.center);
    let center2 = tm2.transform_point(s2.center);
    let direction = center1 - center2;
    let size = direction.length();
    let phi = size - (s1.radius + s2.radius);
    if phi < c.best.phi {
        let normal = if size > SMALL_NUMBER {
            direction / size
        } else {
            Vec3::UNIT_Z
        };
        c.offer(ManifoldPoint {
            location: center1 - normal * s1.radius,
            normal,
            phi,
        });
    }
}

fn update_sphere_plane(s: &Sphere, tm_s: &Transform, plane: &Plane, tm_p: &Transform, c: &mut Collector<'_>) {
    let center = tm_s.transform_point(s.center);
    let phi = plane.signed_distance(tm_p.inverse_transform_point(center)) - s.radius;
    if phi < c.best.phi {
        let normal = tm_p.transform_vector(plane.normal);
        c.offer(ManifoldPoint {
            location: center - normal * s.radius,
            normal,
            phi,
        });
    }
}

fn update_sphere_box(s: &Sphere, tm_s: &Transform, bx: &Aabb, tm_b: &Transform, c: &mut Collector<'_>) {
    let center = tm_s.transform_point(s.center);
    let (phi, local_normal) = bx.phi_with_normal(tm_b.inverse_transform_point(center));
    let phi = phi - s.radius;
    if phi < c.best.phi {
        let normal = tm_b.transform_vector(local_normal);
        c.offer(ManifoldPoint {
            location: center - normal * s.radius,
            normal,
            phi,
        });
    }
}

/// Box corners against the plane; corners within `KINDA_SMALL_NUMBER` of the
/// deepest one are averaged into a single location
fn update_box_plane(bx: &Aabb, tm_box: &Transform, plane: &Plane, tm_plane: &Transform, c: &mut Collector<'_>) {
    let box_to_plane = tm_box.relative_to(tm_plane);
    let normal = tm_plane.transform_vector(plane.normal);

    let mut phi = c.best.phi;
    let mut tied = [Vec3::ZERO; 8];
    let mut num_tied = 0;
    for corner in bx.corners() {
        let local = box_to_plane.transform_point(corner);
        let corner_phi = plane.signed_distance(local);
        let location = tm_plane.transform_point(local);
        c.record(ManifoldPoint {
            location,
            normal,
            phi: corner_phi,
        });
        if corner_phi < phi + KINDA_SMALL_NUMBER {
            if corner_phi <= phi - KINDA_SMALL_NUMBER {
                num_tied = 0;
            }
            phi = phi.min(corner_phi);
            tied[num_tied] = location;
            num_tied += 1;
        }
    }

    if num_tied > 0 && phi < c.best.phi {
        let sum = tied[..num_tied].iter().fold(Vec3::ZERO, |acc, &p| acc + p);
        c.best = ManifoldPoint {
            location: sum / num_tied as f32,
            normal,
            phi,
        };
    }
}

/// Box against box
///
/// Deeply overlapping boxes (box 1's centre inside box 2) are approximated
/// by inscribed spheres; otherwise box 1's sample points are tested against
/// box 2's signed distance.
fn update_box_box(b1: &Aabb, tm1: &Transform, b2: &Aabb, tm2: &Transform, thickness: f32, c: &mut Collector<'_>) {
    let box1_to_box2 = tm1.relative_to(tm2);
    let box2_to_box1 = tm2.relative_to(tm1);
    let b1_in_2 = b1.transformed(&box1_to_box2).thicken(thickness);
    let b2_in_1 = b2.transformed(&box2_to_box1).thicken(thickness);
    if !(b2_in_1.intersects(b1) && b1_in_2.intersects(b2)) {
        return;
    }

    let mut deep_overlap = false;
    if b2.signed_distance(box1_to_box2.transform_point(b1.center())) < 0.0 {
        let center1 = tm1.transform_point(b1.center());
        let center2 = tm2.transform_point(b2.center());
        let r1 = b1.extents().min_element() / 2.0;
        let r2 = b2.extents().min_element() / 2.0;
        let direction = center1 - center2;
        let size = direction.length();
        if size < r1 + r2 {
            let phi = size - (r1 + r2);
            if phi < c.best.phi {
                deep_overlap = true;
                let normal = if size > SMALL_NUMBER {
                    direction / size
                } else {
                    Vec3::UNIT_Z
                };
                c.offer(ManifoldPoint {
                    location: center1 - normal * r1,
                    normal,
                    phi,
                });
            }
        }
    }

    if !deep_overlap || c.best.phi >= 0.0 {
        for sample in b1.sample_points() {
            let (phi, local_normal) = b2.phi_with_normal(box1_to_box2.transform_point(sample));
            c.offer(ManifoldPoint {
                location: tm1.transform_point(sample),
                normal: tm2.transform_vector(local_normal),
                phi,
            });
        }
    }
}

// ============================================================================
// GJK Pairs
// ============================================================================

/// Bounded convex pair without a dedicated routine
///
/// Separated shapes use the GJK closest points directly. Overlapping shapes
/// project each final simplex vertex through the other shape's signed
/// distance and then refine with surface samples in both directions, since
/// the terminating simplex need not touch the deepest feature.
fn update_convex_convex(a: &Side<'_>, b: &Side<'_>, query: &ContactQuery, c: &mut Collector<'_>) {
    let result = gjk_distance(a.shape, &a.tm, b.shape, &b.tm);
    if !result.intersecting {
        if result.distance < c.best.phi {
            let normal = (result.point_a - result.point_b).normalize_or(Vec3::UNIT_Z);
            c.offer(ManifoldPoint {
                location: result.point_a,
                normal,
                phi: result.distance,
            });
        }
        return;
    }

    for vertex in &result.vertices {
        let (phi, n) = b.shape.phi_with_normal(b.tm.inverse_transform_point(vertex.a));
        c.offer(ManifoldPoint {
            location: vertex.a,
            normal: b.tm.transform_vector(n),
            phi,
        });
        let (phi, n) = a.shape.phi_with_normal(a.tm.inverse_transform_point(vertex.b));
        c.offer(ManifoldPoint {
            location: vertex.b,
            normal: -a.tm.transform_vector(n),
            phi,
        });
    }
    update_levelset(a, b, query, c);
}

// ============================================================================
// Level-Set Sampling
// ============================================================================

/// Samples of each side against the other side's signed distance
fn update_levelset(a: &Side<'_>, b: &Side<'_>, query: &ContactQuery, c: &mut Collector<'_>) {
    sample_object(b.shape, &b.tm, &a.samples(), &a.tm, query, c);
    let b_samples = b.samples();
    if !b_samples.is_empty() {
        c.flipped(|c| sample_object(a.shape, &a.tm, &b_samples, &b.tm, query, c));
    }
}

/// Test sample points (in `samples_tm` space) against `object`
///
/// When the object is bounded, only samples inside its thickened bounds are
/// considered. With normal averaging the penetrating samples are blended,
/// weighted by depth, into one point that is re-evaluated on the surface.
fn sample_object(
    object: &Shape,
    object_tm: &Transform,
    samples: &[Vec3],
    samples_tm: &Transform,
    query: &ContactQuery,
    c: &mut Collector<'_>,
) {
    let thickness = query.thickness;
    let sample_to_object = samples_tm.relative_to(object_tm);
    let prune = object
        .bounding_box()
        .map(|bb| bb.transformed(&object_tm.relative_to(samples_tm)).thicken(thickness));
    let candidates = samples
        .iter()
        .copied()
        .filter(|p| prune.as_ref().map_or(true, |bb| bb.contains(*p)));

    let to_world = |local: Vec3, local_normal: Vec3, phi: f32| ManifoldPoint {
        location: object_tm.transform_point(local),
        normal: object_tm.transform_vector(local_normal),
        phi,
    };

    if query.normal_averaging {
        let mut weighted = Vec3::ZERO;
        let mut total = 0.0f32;
        for sample in candidates {
            let local = sample_to_object.transform_point(sample);
            let (phi, n) = object.phi_with_normal(local);
            c.record(to_world(local, n, phi));
            let depth = phi - thickness;
            if depth < -KINDA_SMALL_NUMBER {
                weighted += local * depth;
                total += depth;
            }
        }
        if total < -KINDA_SMALL_NUMBER {
            let local = weighted / total;
            let (phi, n) = object.phi_with_normal(local);
            if phi < c.best.phi {
                c.best = to_world(local, n, phi);
            }
        }
    } else {
        for sample in candidates {
            let local = sample_to_object.transform_point(sample);
            let (phi, n) = object.phi_with_normal(local);
            c.offer(to_world(local, n, phi));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
