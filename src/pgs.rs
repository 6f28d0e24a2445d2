//! Projected Gauss-Seidel Contact Solver
//!
//! Solves every contact point of an island together: one normal multiplier
//! and two friction multipliers per point, relaxed in Gauss-Seidel order
//! until the worst complementarity residual drops under the tolerance.
//!
//! # Features
//!
//! - Multi-point manifolds gathered with a velocity-widened margin
//! - Manifold reduction to the convex hull of the points in the contact plane
//! - Friction multipliers clamped to the Coulomb box `|lambda_t| <= mu * lambda_n`
//! - Optional swept (continuous) sample queries for fast bodies
//! - Push-out as a separate solve on the predicted pose with zeroed velocities

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::trace;

use crate::config::{PgsConfig, SolverConfig};
use crate::contact::{ManifoldPoint, RigidBodyContact};
use crate::contact_graph::IslandData;
use crate::math::{Vec3, SMALL_NUMBER};
use crate::narrow_phase::{update_manifold, update_swept_manifold, ContactQuery};
use crate::particles::{Pose, RigidBodies};
use crate::sequential::PushOutStats;
use crate::solver::{ContactSolver, SolveContext};

// ============================================================================
// Tangent Basis
// ============================================================================

/// Two unit tangents orthogonal to `normal` and to each other
///
/// The first tangent is built from the world axis least aligned with the
/// normal; the second is `-t0 x n`.
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    let (ax, ay, az) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
    let t0 = if ax < ay {
        if ax < az {
            Vec3::new(0.0, normal.z, -normal.y)
        } else {
            Vec3::new(normal.y, -normal.x, 0.0)
        }
    } else if ay < az {
        Vec3::new(-normal.z, 0.0, normal.x)
    } else {
        Vec3::new(normal.y, -normal.x, 0.0)
    };
    let t0 = t0.normalize_or(Vec3::UNIT_X);
    let t1 = (-t0).cross(normal);
    (t0, t1)
}

// ============================================================================
// Hull Reduction
// ============================================================================

/// Keep only the points on the 2D convex hull of `points` in the plane of `normal`
///
/// Interior points and points in the middle of a hull edge are dropped, as
/// are exact duplicates. Hull order is counter-clockwise around `normal`.
pub fn remove_points_inside_hull(points: &mut Vec<ManifoldPoint>, normal: Vec3) {
    if points.len() <= 2 {
        points.dedup_by(|a, b| (a.location - b.location).length_squared() <= SMALL_NUMBER);
        return;
    }
    let (t0, t1) = tangent_basis(normal);
    let planar: Vec<(f32, f32)> = points.iter().map(|p| (p.location.dot(t0), p.location.dot(t1))).collect();

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| {
        planar[a]
            .0
            .total_cmp(&planar[b].0)
            .then(planar[a].1.total_cmp(&planar[b].1))
    });
    order.dedup_by(|a, b| {
        let (pa, pb) = (planar[*a], planar[*b]);
        (pa.0 - pb.0).abs() <= KINDA_SMALL_AREA && (pa.1 - pb.1).abs() <= KINDA_SMALL_AREA
    });
    if order.len() <= 2 {
        *points = order.iter().map(|&i| points[i]).collect();
        return;
    }

    let turn = |o: usize, a: usize, b: usize| {
        let (o, a, b) = (planar[o], planar[a], planar[b]);
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    // Andrew's monotone chain; collinear points are popped
    let mut hull: Vec<usize> = Vec::with_capacity(order.len() + 1);
    for &i in order.iter() {
        while hull.len() >= 2 && turn(hull[hull.len() - 2], hull[hull.len() - 1], i) <= KINDA_SMALL_AREA {
            hull.pop();
        }
        hull.push(i);
    }
    let lower = hull.len() + 1;
    for &i in order.iter().rev().skip(1) {
        while hull.len() >= lower && turn(hull[hull.len() - 2], hull[hull.len() - 1], i) <= KINDA_SMALL_AREA {
            hull.pop();
        }
        hull.push(i);
    }
    hull.pop();

    *points = hull.iter().map(|&i| points[i]).collect();
}

/// Planar tolerance used by the hull reduction
const KINDA_SMALL_AREA: f32 = 1e-6;

// ============================================================================
// Constraint Rows
// ============================================================================

/// One scalar constraint direction at a contact point
#[derive(Clone, Copy, Debug)]
struct Row {
    direction: Vec3,
    angular_a: Vec3,
    angular_b: Vec3,
    weighted_a: Vec3,
    weighted_b: Vec3,
    /// Inverse effective mass along `direction`
    inv_effective_mass: f32,
}

impl Row {
    fn new(bodies: &RigidBodies, ia: usize, ib: usize, pose: Pose, location: Vec3, direction: Vec3) -> Self {
        let ra = location - bodies.position(ia, pose);
        let rb = location - bodies.position(ib, pose);
        let angular_a = ra.cross(direction);
        let angular_b = rb.cross(direction);
        let weighted_a = bodies.world_inv_inertia(ia, pose).mul_vec(angular_a);
        let weighted_b = bodies.world_inv_inertia(ib, pose).mul_vec(angular_b);
        let inv_effective_mass = bodies.inv_m[ia]
            + angular_a.dot(weighted_a)
            + bodies.inv_m[ib]
            + angular_b.dot(weighted_b);
        Self {
            direction,
            angular_a,
            angular_b,
            weighted_a,
            weighted_b,
            inv_effective_mass,
        }
    }

    /// Relative velocity of A with respect to B along the row
    #[inline]
    fn velocity(&self, bodies: &RigidBodies, ia: usize, ib: usize) -> f32 {
        bodies.v[ia].dot(self.direction) + bodies.w[ia].dot(self.angular_a)
            - bodies.v[ib].dot(self.direction)
            - bodies.w[ib].dot(self.angular_b)
    }

    #[inline]
    fn apply(&self, bodies: &mut RigidBodies, ia: usize, ib: usize, delta: f32) {
        if bodies.is_dynamic(ia) {
            bodies.v[ia] += self.direction * (delta * bodies.inv_m[ia]);
            bodies.w[ia] += self.weighted_a * delta;
        }
        if bodies.is_dynamic(ib) {
            bodies.v[ib] -= self.direction * (delta * bodies.inv_m[ib]);
            bodies.w[ib] -= self.weighted_b * delta;
        }
    }
}

/// Normal and friction rows of one manifold point
#[derive(Clone, Copy, Debug)]
struct PointRows {
    constraint: usize,
    body_a: usize,
    body_b: usize,
    phi: f32,
    friction: f32,
    normal: Row,
    tangents: [Row; 2],
    lambda_normal: f32,
    lambda_tangent: [f32; 2],
}

// ============================================================================
// Solver
// ============================================================================

/// Projected Gauss-Seidel contact solver
#[derive(Clone, Debug)]
pub struct PgsSolver {
    thickness: f32,
    normal_averaging: bool,
    config: PgsConfig,
    last_iterations: usize,
    last_residual: f32,
}

impl PgsSolver {
    /// Solver parameters taken from `config`
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            thickness: config.thickness,
            normal_averaging: config.use_normal_averaging,
            config: config.pgs,
            last_iterations: 0,
            last_residual: 0.0,
        }
    }

    /// Sweeps used by the most recent solve
    #[inline]
    pub fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    /// Worst residual left by the most recent solve
    #[inline]
    pub fn last_residual(&self) -> f32 {
        self.last_residual
    }

    /// Refresh and reduce the manifolds of the island's contacts
    fn gather_manifolds(&self, ctx: &mut SolveContext<'_>, island: &IslandData, pose: Pose, widen: bool) {
        let dt = ctx.dt;
        let updated: Vec<(usize, RigidBodyContact)> = {
            let bodies: &RigidBodies = ctx.bodies;
            let constraints: &[RigidBodyContact] = ctx.constraints;
            let gather = |&c: &usize| -> Option<(usize, RigidBodyContact)> {
                let contact = &constraints[c];
                let (ia, ib) = (contact.body_a, contact.body_b);
                if bodies.sleeping[ia] {
                    return None;
                }
                let thickness = if widen {
                    let travel = bodies.v[ia].length().max(bodies.v[ib].length()) * dt;
                    self.thickness + travel + self.config.hull_threshold
                } else {
                    self.thickness
                };
                let query = ContactQuery {
                    pose,
                    thickness,
                    normal_averaging: self.normal_averaging,
                };
                let mut refreshed = contact.clone();
                update_manifold(bodies, &query, &mut refreshed);
                if widen && self.config.use_ccd {
                    update_swept_manifold(bodies, thickness, &mut refreshed);
                }
                let normal = refreshed.normal;
                remove_points_inside_hull(&mut refreshed.manifold, normal);
                Some((c, refreshed))
            };
            #[cfg(feature = "parallel")]
            let out = island.constraints.par_iter().filter_map(gather).collect();
            #[cfg(not(feature = "parallel"))]
            let out = island.constraints.iter().filter_map(gather).collect();
            out
        };
        for (c, contact) in updated {
            if !contact.manifold.is_empty() {
                ctx.bodies.collided[contact.body_a] = true;
                ctx.bodies.collided[contact.body_b] = true;
            }
            ctx.constraints[c] = contact;
        }
    }

    /// Build the rows of every manifold point of the island
    fn build_rows(bodies: &RigidBodies, constraints: &[RigidBodyContact], island: &IslandData, pose: Pose) -> Vec<PointRows> {
        let mut rows = Vec::new();
        for &c in &island.constraints {
            let contact = &constraints[c];
            let (ia, ib) = (contact.body_a, contact.body_b);
            if bodies.sleeping[ia] {
                continue;
            }
            for point in &contact.manifold {
                let (t0, t1) = tangent_basis(point.normal);
                let normal = Row::new(bodies, ia, ib, pose, point.location, point.normal);
                if normal.inv_effective_mass <= SMALL_NUMBER {
                    trace!(body_a = ia, body_b = ib, "contact point without effective mass skipped");
                    continue;
                }
                rows.push(PointRows {
                    constraint: c,
                    body_a: ia,
                    body_b: ib,
                    phi: point.phi,
                    friction: contact.friction,
                    normal,
                    tangents: [
                        Row::new(bodies, ia, ib, pose, point.location, t0),
                        Row::new(bodies, ia, ib, pose, point.location, t1),
                    ],
                    lambda_normal: 0.0,
                    lambda_tangent: [0.0; 2],
                });
            }
        }
        rows
    }

    /// Relax the rows until the residual is under the tolerance
    ///
    /// Returns the number of sweeps. Hitting the cap keeps the best effort.
    fn relax(&mut self, bodies: &mut RigidBodies, rows: &mut [PointRows], dt: f32) -> usize {
        let mut residual = 0.0;
        let mut sweeps = 0;
        if rows.is_empty() {
            self.last_iterations = 0;
            self.last_residual = 0.0;
            return 0;
        }
        for _ in 0..self.config.max_iterations {
            sweeps += 1;
            residual = 0.0f32;
            for row in rows.iter_mut() {
                let (ia, ib) = (row.body_a, row.body_b);
                let normal_velocity = row.normal.velocity(bodies, ia, ib) + row.phi / dt;
                residual = residual.max((-normal_velocity).max(normal_velocity * row.lambda_normal));

                let lambda = (row.lambda_normal - normal_velocity / row.normal.inv_effective_mass).max(0.0);
                row.normal.apply(bodies, ia, ib, lambda - row.lambda_normal);
                row.lambda_normal = lambda;

                if row.friction <= 0.0 {
                    continue;
                }
                let limit = row.friction * row.lambda_normal;
                for (tangent, lambda_t) in row.tangents.iter().zip(row.lambda_tangent.iter_mut()) {
                    if tangent.inv_effective_mass <= SMALL_NUMBER {
                        continue;
                    }
                    let velocity = tangent.velocity(bodies, ia, ib);
                    let updated = (*lambda_t - velocity / tangent.inv_effective_mass).clamp(-limit, limit);
                    tangent.apply(bodies, ia, ib, updated - *lambda_t);
                    *lambda_t = updated;
                }
            }
            if residual < self.config.tolerance {
                break;
            }
        }
        if residual >= self.config.tolerance {
            trace!(sweeps, residual, "pgs iteration cap reached");
        }
        self.last_iterations = sweeps;
        self.last_residual = residual;
        sweeps
    }

    /// Solve the island at `pose` and record the impulses on the contacts
    fn solve(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData, pose: Pose) -> (usize, usize) {
        let mut rows = Self::build_rows(ctx.bodies, ctx.constraints, island, pose);
        let sweeps = self.relax(ctx.bodies, &mut rows, ctx.dt);
        for row in &rows {
            let impulse = row.normal.direction * row.lambda_normal
                + row.tangents[0].direction * row.lambda_tangent[0]
                + row.tangents[1].direction * row.lambda_tangent[1];
            ctx.constraints[row.constraint].accumulated_impulse += impulse;
        }
        (sweeps, rows.len())
    }
}

impl ContactSolver for PgsSolver {
    fn name(&self) -> &'static str {
        "pgs"
    }

    fn apply(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> usize {
        self.gather_manifolds(ctx, island, Pose::Current, true);
        let (sweeps, _) = self.solve(ctx, island, Pose::Current);
        let dt = ctx.dt;
        let bodies = &mut *ctx.bodies;
        for &b in &island.bodies {
            if bodies.is_dynamic(b) && !bodies.sleeping[b] {
                bodies.p[b] = bodies.x[b] + bodies.v[b] * dt;
                bodies.q_pred[b] = bodies.q[b].integrate(bodies.w[b], dt);
            }
        }
        sweeps
    }

    fn apply_push_out(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> PushOutStats {
        self.gather_manifolds(ctx, island, Pose::Predicted, false);
        let deepest = island
            .constraints
            .iter()
            .flat_map(|&c| ctx.constraints[c].manifold.iter().map(|p| p.phi))
            .fold(f32::MAX, f32::min);

        // kinematic partners stand still during the position solve
        let mut frozen = island.bodies.clone();
        for &c in &island.constraints {
            let contact = &ctx.constraints[c];
            for b in [contact.body_a, contact.body_b] {
                if !ctx.bodies.is_dynamic(b) && !frozen.contains(&b) {
                    frozen.push(b);
                }
            }
        }
        let saved: Vec<(Vec3, Vec3)> = frozen.iter().map(|&b| (ctx.bodies.v[b], ctx.bodies.w[b])).collect();
        for &b in &frozen {
            ctx.bodies.v[b] = Vec3::ZERO;
            ctx.bodies.w[b] = Vec3::ZERO;
        }

        let (sweeps, points) = self.solve(ctx, island, Pose::Predicted);

        let dt = ctx.dt;
        let bodies = &mut *ctx.bodies;
        for (&b, &(v, w)) in frozen.iter().zip(saved.iter()) {
            if bodies.is_dynamic(b) && !bodies.sleeping[b] {
                bodies.p[b] += bodies.v[b] * dt;
                bodies.q_pred[b] = bodies.q_pred[b].integrate(bodies.w[b], dt);
            }
            bodies.v[b] = v;
            bodies.w[b] = w;
        }

        PushOutStats {
            iterations: sweeps,
            corrections: points,
            deepest_phi: if points > 0 { vec![deepest] } else { Vec::new() },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact_graph::ContactGraph;
    use crate::material::PhysicsMaterial;
    use crate::narrow_phase::compute_constraint;
    use crate::particles::BodyDesc;
    use crate::shape::Shape;

    const DT: f32 = 1.0 / 60.0;

    fn point(x: f32, y: f32, phi: f32) -> ManifoldPoint {
        ManifoldPoint {
            location: Vec3::new(x, y, 0.0),
            normal: Vec3::UNIT_Z,
            phi,
        }
    }

    fn floor_with(desc: BodyDesc) -> (RigidBodies, Vec<RigidBodyContact>, IslandData) {
        let mut bodies = RigidBodies::new();
        bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO).with_material(desc.material));
        let body = bodies.add(desc);
        let constraints = vec![compute_constraint(&bodies, body, 0)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        let island = graph.islands()[0].clone();
        (bodies, constraints, island)
    }

    #[test]
    fn test_tangent_basis_orthonormal() {
        let normals = [
            Vec3::UNIT_X,
            -Vec3::UNIT_Y,
            Vec3::UNIT_Z,
            Vec3::new(1.0, 1.0, 1.0).safe_normal(),
            Vec3::new(-0.2, 0.9, 0.1).safe_normal(),
        ];
        for n in normals {
            let (t0, t1) = tangent_basis(n);
            assert!((t0.length() - 1.0).abs() < 1e-5, "t0 unit for {n:?}");
            assert!((t1.length() - 1.0).abs() < 1e-5, "t1 unit for {n:?}");
            assert!(t0.dot(n).abs() < 1e-5 && t1.dot(n).abs() < 1e-5, "tangents orthogonal to {n:?}");
            assert!(t0.dot(t1).abs() < 1e-5, "tangents orthogonal to each other");
        }
    }

    #[test]
    fn test_hull_drops_interior_points() {
        let mut points = vec![
            point(-1.0, -1.0, -0.1),
            point(1.0, -1.0, -0.1),
            point(0.0, 0.0, -0.3),
            point(1.0, 1.0, -0.1),
            point(-1.0, 1.0, -0.1),
            point(0.2, -0.4, -0.2),
        ];
        remove_points_inside_hull(&mut points, Vec3::UNIT_Z);
        assert_eq!(points.len(), 4, "only the square corners remain: {points:?}");
        assert!(points.iter().all(|p| p.location.x.abs() == 1.0 && p.location.y.abs() == 1.0));
    }

    #[test]
    fn test_hull_collinear_keeps_endpoints() {
        let mut points = vec![point(0.0, 0.0, 0.0), point(1.0, 0.0, 0.0), point(2.0, 0.0, 0.0), point(0.5, 0.0, 0.0)];
        remove_points_inside_hull(&mut points, Vec3::UNIT_Z);
        assert_eq!(points.len(), 2);
        let mut xs: Vec<f32> = points.iter().map(|p| p.location.x).collect();
        xs.sort_by(f32::total_cmp);
        assert_eq!(xs, vec![0.0, 2.0]);
    }

    #[test]
    fn test_hull_removes_duplicates() {
        let mut points = vec![point(0.0, 0.0, -0.1), point(0.0, 0.0, -0.1), point(0.0, 0.0, -0.1)];
        remove_points_inside_hull(&mut points, Vec3::UNIT_Z);
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_box_on_floor_is_pushed_out_by_velocity_solve() {
        let desc = BodyDesc::new_dynamic(Shape::cuboid(Vec3::splat(0.5)), Vec3::new(0.0, 0.0, 0.45), 1.0)
            .with_velocity(Vec3::new(0.0, 0.0, -1.0));
        let (mut bodies, mut constraints, island) = floor_with(desc);

        let mut solver = PgsSolver::new(&SolverConfig::pgs());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        let sweeps = solver.apply(&mut ctx, &island);

        assert_eq!(constraints[0].manifold.len(), 4, "four bottom corners after hull reduction");
        assert!(sweeps >= 1 && sweeps <= 10);
        assert!(bodies.v[1].z > 2.0, "velocity solve removes most of the overlap, got {:?}", bodies.v[1]);
        assert!(bodies.v[1].x.abs() < 1e-2 && bodies.v[1].y.abs() < 1e-2, "symmetric contact stays vertical");
        assert!((bodies.p[1] - (bodies.x[1] + bodies.v[1] * DT)).length() < 1e-6, "prediction follows the solved velocity");
        assert!(bodies.collided[1]);
        assert!(constraints[0].accumulated_impulse.z.abs() > 0.0);
    }

    #[test]
    fn test_sphere_push_out_restores_velocity() {
        let desc = BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::new(0.0, 0.0, 0.9), 1.0)
            .with_velocity(Vec3::new(1.0, 0.0, 0.0));
        let (mut bodies, mut constraints, island) = floor_with(desc);

        let mut solver = PgsSolver::new(&SolverConfig::pgs());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        let stats = solver.apply_push_out(&mut ctx, &island);

        assert!((bodies.p[1].z - 1.0).abs() < 1e-3, "sphere pushed onto the floor, got {:?}", bodies.p[1]);
        assert_eq!(bodies.v[1], Vec3::new(1.0, 0.0, 0.0), "velocity restored after push-out");
        assert_eq!(stats.corrections, 1);
        assert!((stats.deepest_phi[0] + 0.1).abs() < 1e-4);
        assert!(solver.last_residual() < SolverConfig::pgs().pgs.tolerance);
    }

    #[test]
    fn test_push_out_ignores_kinematic_velocity() {
        let mut bodies = RigidBodies::new();
        let platform = bodies.add(
            BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO)
                .with_velocity(Vec3::new(4.0, 0.0, 3.0))
                .with_material(PhysicsMaterial::new(1.0, 0.0)),
        );
        let ball = bodies.add(
            BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::new(0.0, 0.0, 0.9), 1.0)
                .with_material(PhysicsMaterial::new(1.0, 0.0)),
        );
        let mut constraints = vec![compute_constraint(&bodies, ball, platform)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        let island = graph.islands()[0].clone();

        let mut solver = PgsSolver::new(&SolverConfig::pgs());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply_push_out(&mut ctx, &island);

        assert!((bodies.p[ball].z - 1.0).abs() < 1e-3, "pushed just onto the surface, got {:?}", bodies.p[ball]);
        assert!(bodies.p[ball].x.abs() < 1e-4, "no drag from the platform's motion, got {:?}", bodies.p[ball]);
        assert_eq!(bodies.v[platform], Vec3::new(4.0, 0.0, 3.0), "driven velocity restored");
    }

    #[test]
    fn test_friction_multiplier_inside_box() {
        let mu = 0.2;
        let desc = BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::new(0.0, 0.0, 0.99), 1.0)
            .with_velocity(Vec3::new(10.0, 0.0, -1.0))
            .with_material(PhysicsMaterial::new(mu, 0.0));
        let (mut bodies, mut constraints, island) = floor_with(desc);

        let mut solver = PgsSolver::new(&SolverConfig::pgs());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        let c = &constraints[0];
        let n = c.normal;
        let j = c.accumulated_impulse;
        let jn = j.dot(n).abs();
        let jt = (j - n * j.dot(n)).length();
        assert!(jn > 0.0);
        assert!(jt <= mu * jn * std::f32::consts::SQRT_2 + 1e-4, "friction {jt} outside box {}", mu * jn);
        assert!(bodies.v[1].x < 10.0, "friction slows the slide");
    }

    #[test]
    fn test_separated_bodies_produce_no_rows() {
        let desc = BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::new(0.0, 0.0, 5.0), 1.0);
        let (mut bodies, mut constraints, island) = floor_with(desc);

        let mut solver = PgsSolver::new(&SolverConfig::pgs());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        let sweeps = solver.apply(&mut ctx, &island);
        assert_eq!(sweeps, 0);
        assert!(constraints[0].manifold.is_empty());
        assert!((bodies.p[1].z - 5.0).abs() < 1e-6);
        assert!(!bodies.collided[1]);
    }
}
