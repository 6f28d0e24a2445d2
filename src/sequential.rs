//! Sequential Impulse Solver with Push-Out
//!
//! Resolves contacts one at a time, island by island, walking the contact
//! levels bottom-up and the colors inside each level.
//!
//! # Features
//!
//! - **Velocity pass**: normal + Coulomb friction impulse from the 3x3
//!   contact factor matrix, restitution suppressed for resting contacts
//! - **Energy clamp**: an impulse is scaled down so it never adds kinetic energy
//! - **Angular friction**: optional rolling/spinning resistance on sticking contacts
//! - **Push-out**: ramped positional correction on the predicted pose, with
//!   optional shock propagation through the contact levels
//! - **Parallel colors**: contacts of one color share no dynamic body, so their
//!   responses are computed in parallel (`parallel` feature) and committed in order
//!
//! # Sign conventions
//!
//! The impulse `J` acts on `body_a` and `-J` on `body_b`; the contact normal
//! points from B toward A, so a separating impulse has `J . n > 0`.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::trace;

use crate::config::SolverConfig;
use crate::contact::{ManifoldPoint, RigidBodyContact};
use crate::contact_graph::IslandData;
use crate::math::{Mat3, Quat, Transform, Vec3, KINDA_SMALL_NUMBER, SMALL_NUMBER};
use crate::narrow_phase::{update_constraint_at, ContactQuery};
use crate::particles::{Pose, RigidBodies};
use crate::solver::{ContactSolver, SolveContext};

// ============================================================================
// Push-Out Statistics
// ============================================================================

/// Outcome of one push-out pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PushOutStats {
    /// Outer iterations actually run
    pub iterations: usize,
    /// Positional corrections applied (pair iterations that moved bodies)
    pub corrections: usize,
    /// Deepest `phi` seen at the start of each outer iteration
    pub deepest_phi: Vec<f32>,
}

impl PushOutStats {
    /// Fold the stats of another island into these
    pub fn merge(&mut self, other: &PushOutStats) {
        self.iterations = self.iterations.max(other.iterations);
        self.corrections += other.corrections;
        for (i, &phi) in other.deepest_phi.iter().enumerate() {
            match self.deepest_phi.get_mut(i) {
                Some(existing) => *existing = existing.min(phi),
                None => self.deepest_phi.push(phi),
            }
        }
    }

    /// Whether the pass ended without any remaining correction work
    #[inline]
    pub fn converged(&self, max_iterations: usize) -> bool {
        self.iterations < max_iterations
    }
}

// ============================================================================
// Factor Matrix
// ============================================================================

/// Velocity change at a contact point per unit impulse for one body
///
/// `K = m^-1 * I - [r]x * I_world^-1 * [r]x`, so that `K * J` is the change of
/// `v + w x r` caused by applying `J` at `r`.
#[inline]
pub fn factor_matrix(r: Vec3, world_inv_inertia: &Mat3, inv_m: f32) -> Mat3 {
    let cross = Mat3::skew(r);
    (cross * *world_inv_inertia * cross).scale(-1.0).add_diagonal(inv_m)
}

#[inline]
fn body_factor(inv_m: f32, r: Vec3, world_inv_inertia: &Mat3) -> Mat3 {
    if inv_m > 0.0 {
        factor_matrix(r, world_inv_inertia, inv_m)
    } else {
        Mat3::ZERO
    }
}

// ============================================================================
// Per-Contact Responses
// ============================================================================

#[derive(Clone, Copy, Debug, Default)]
struct BodyDelta {
    dv: Vec3,
    dw: Vec3,
}

/// Velocity-pass result for one contact, computed against a read-only store
#[derive(Clone, Copy, Debug)]
struct VelocityResponse {
    index: usize,
    point: ManifoldPoint,
    touching: bool,
    impulse: Vec3,
    delta_a: BodyDelta,
    delta_b: BodyDelta,
}

impl VelocityResponse {
    fn passive(index: usize, point: ManifoldPoint, touching: bool) -> Self {
        Self {
            index,
            point,
            touching,
            impulse: Vec3::ZERO,
            delta_a: BodyDelta::default(),
            delta_b: BodyDelta::default(),
        }
    }
}

/// Push-out result for one contact after its pair iterations
#[derive(Clone, Copy, Debug)]
struct PushOutResponse {
    index: usize,
    point: ManifoldPoint,
    first_phi: f32,
    corrections: usize,
    impulse: Vec3,
    pose_a: Option<Transform>,
    pose_b: Option<Transform>,
}

// ============================================================================
// Solver
// ============================================================================

/// Sequential-impulse contact solver with iterative push-out
#[derive(Clone, Debug)]
pub struct SequentialImpulseSolver {
    thickness: f32,
    normal_averaging: bool,
    push_out_iterations: usize,
    pair_iterations: usize,
    angular_friction: f32,
    resting_speed_factor: f32,
    gravity_magnitude: f32,
    shock_propagation: bool,
}

impl SequentialImpulseSolver {
    /// Solver parameters taken from `config`
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            thickness: config.thickness,
            normal_averaging: config.use_normal_averaging,
            push_out_iterations: config.push_out_iterations,
            pair_iterations: config.push_out_pair_iterations.max(1),
            angular_friction: config.angular_friction,
            resting_speed_factor: config.resting_speed_factor,
            gravity_magnitude: config.gravity.length(),
            shock_propagation: config.use_shock_propagation,
        }
    }

    /// Contact margin
    #[inline]
    pub fn thickness(&self) -> f32 {
        self.thickness
    }

    #[inline]
    fn query(&self) -> ContactQuery {
        ContactQuery {
            pose: Pose::Predicted,
            thickness: self.thickness,
            normal_averaging: self.normal_averaging,
        }
    }

    /// Relative speed under which a contact is treated as resting
    #[inline]
    fn resting_speed(&self, dt: f32) -> f32 {
        self.resting_speed_factor * self.gravity_magnitude * dt
    }

    // ========================================================================
    // Velocity Pass
    // ========================================================================

    fn velocity_response(
        &self,
        bodies: &RigidBodies,
        index: usize,
        contact: &RigidBodyContact,
        dt: f32,
    ) -> Option<VelocityResponse> {
        let (ia, ib) = (contact.body_a, contact.body_b);
        if bodies.sleeping[ia] {
            debug_assert!(
                bodies.sleeping[ib] || !bodies.is_dynamic(ib),
                "a sleeping body is in contact with an awake one"
            );
            return None;
        }

        let query = self.query();
        let mut probe = contact.clone();
        update_constraint_at(
            bodies,
            &query,
            &mut probe,
            bodies.transform(ia, Pose::Predicted),
            bodies.transform(ib, Pose::Predicted),
        );
        let point = probe.point();
        if point.phi >= self.thickness {
            return Some(VelocityResponse::passive(index, point, false));
        }

        let n = point.normal;
        let r1 = point.location - bodies.p[ia];
        let r2 = point.location - bodies.p[ib];
        let v1 = bodies.v[ia] + bodies.w[ia].cross(r1);
        let v2 = bodies.v[ib] + bodies.w[ib].cross(r2);
        let relative = v1 - v2;
        if relative.dot(n) >= 0.0 {
            return Some(VelocityResponse::passive(index, point, true));
        }

        let inv_i1 = bodies.world_inv_inertia(ia, Pose::Predicted);
        let inv_i2 = bodies.world_inv_inertia(ib, Pose::Predicted);
        let factor = body_factor(bodies.inv_m[ia], r1, &inv_i1) + body_factor(bodies.inv_m[ib], r2, &inv_i2);
        let mut restitution = if relative.length() < self.resting_speed(dt) {
            0.0
        } else {
            contact.restitution
        };

        // Bodies still apart at the start of the step may close the gap:
        // only the speed that would carry them past the margin is removed.
        let mut relative = relative;
        let travel = (bodies.p[ia] - bodies.x[ia]) - (bodies.p[ib] - bodies.x[ib]);
        let start_phi = point.phi - travel.dot(n);
        if start_phi > self.thickness + KINDA_SMALL_NUMBER {
            let normal_speed = relative.dot(n);
            let closing = (self.thickness - point.phi) / dt;
            if closing < -normal_speed {
                relative -= n * (normal_speed + closing);
                restitution = 0.0;
            }
        }

        let mut angular = Vec3::ZERO;
        let impulse = if contact.friction > 0.0 {
            let mu = contact.friction;
            let normal_speed = relative.dot(n).min(0.0);
            let velocity_change = -(n * (restitution * normal_speed) + relative);
            let normal_change = velocity_change.dot(n);
            if (velocity_change - n * normal_change).length() <= mu * normal_change {
                // Sticking: stop the contact point entirely
                let Some(inv_factor) = factor.inverse() else {
                    trace!(body_a = ia, body_b = ib, "singular contact factor, contact skipped");
                    return Some(VelocityResponse::passive(index, point, true));
                };
                let mut impulse = inv_factor.mul_vec(velocity_change);
                if self.angular_friction > 0.0 {
                    let (linear, extra) =
                        self.angular_friction_impulse(bodies, ia, ib, r1, r2, n, normal_change, &inv_i1, &inv_i2);
                    impulse += linear;
                    angular += extra;
                }
                impulse
            } else {
                // Sliding: normal impulse plus friction along the slip direction
                let tangent = (relative - n * relative.dot(n)).safe_normal();
                let direction = n - tangent * mu;
                let denominator = n.dot(factor.mul_vec(direction));
                if denominator.abs() <= SMALL_NUMBER {
                    trace!(body_a = ia, body_b = ib, denominator, "degenerate sliding denominator, contact skipped");
                    return Some(VelocityResponse::passive(index, point, true));
                }
                direction * (-(1.0 + restitution) * normal_speed / denominator)
            }
        } else {
            let denominator = n.dot(factor.mul_vec(n));
            if denominator.abs() <= SMALL_NUMBER {
                trace!(body_a = ia, body_b = ib, denominator, "degenerate normal denominator, contact skipped");
                return Some(VelocityResponse::passive(index, point, true));
            }
            n * (-(1.0 + restitution) * relative.dot(n) / denominator)
        };

        let impulse = energy_clamped_impulse(bodies, ia, ib, impulse, r1, r2, v1, v2);
        let angular1 = r1.cross(impulse) + angular;
        let angular2 = r2.cross(-impulse) - angular;
        Some(VelocityResponse {
            index,
            point,
            touching: true,
            impulse,
            delta_a: BodyDelta {
                dv: impulse * bodies.inv_m[ia],
                dw: inv_i1.mul_vec(angular1),
            },
            delta_b: BodyDelta {
                dv: -impulse * bodies.inv_m[ib],
                dw: inv_i2.mul_vec(angular2),
            },
        })
    }

    /// Extra impulse and angular impulse damping the relative spin
    ///
    /// Both the spin about the normal and the rolling spin are reduced by
    /// `angular_friction * normal_change`, never past zero.
    #[allow(clippy::too_many_arguments)]
    fn angular_friction_impulse(
        &self,
        bodies: &RigidBodies,
        ia: usize,
        ib: usize,
        r1: Vec3,
        r2: Vec3,
        n: Vec3,
        normal_change: f32,
        inv_i1: &Mat3,
        inv_i2: &Mat3,
    ) -> (Vec3, Vec3) {
        let relative_w = bodies.w[ia] - bodies.w[ib];
        let spin = relative_w.dot(n);
        let roll = relative_w - n * spin;
        let budget = self.angular_friction * normal_change;
        let spin_left = if spin == 0.0 {
            0.0
        } else {
            spin.signum() * (spin.abs() - budget).max(0.0)
        };
        let target = n * spin_left + roll.safe_normal() * (roll.length() - budget).max(0.0);
        let delta = target - relative_w;

        if !bodies.is_dynamic(ia) {
            let i2 = bodies.world_inertia(ib, Pose::Predicted);
            let linear = r2.cross(delta) * bodies.m[ib];
            return (linear, i2.mul_vec(delta) - r2.cross(linear));
        }
        if !bodies.is_dynamic(ib) {
            let i1 = bodies.world_inertia(ia, Pose::Predicted);
            let linear = r1.cross(delta) * bodies.m[ia];
            return (linear, i1.mul_vec(delta) - r1.cross(linear));
        }

        // Both dynamic: eliminate the angular unknowns from the coupled system
        let cross1 = Mat3::skew(r1).scale(-1.0);
        let cross2 = Mat3::skew(r2).scale(-1.0);
        let cross_i1 = cross1 * *inv_i1;
        let cross_i2 = cross2 * *inv_i2;
        let diag1 = (cross_i1 * cross1.transpose() + cross_i2 * cross2.transpose())
            .add_diagonal(bodies.inv_m[ia] + bodies.inv_m[ib]);
        let off_diag = (cross_i1 + cross_i2).scale(-1.0);
        let Some(diag2) = (*inv_i1 + *inv_i2).inverse() else {
            trace!(body_a = ia, body_b = ib, "singular angular friction system");
            return (Vec3::ZERO, Vec3::ZERO);
        };
        let off_diag_diag2 = off_diag * diag2;
        let Some(schur) = (diag1 - off_diag_diag2 * off_diag.transpose()).inverse() else {
            trace!(body_a = ia, body_b = ib, "singular angular friction system");
            return (Vec3::ZERO, Vec3::ZERO);
        };
        let linear = schur.mul_vec(off_diag_diag2.scale(-1.0).mul_vec(delta));
        let angular = diag2.mul_vec(delta - off_diag.transpose().mul_vec(linear));
        (linear, angular)
    }

    fn solve_velocity_batch(&self, ctx: &mut SolveContext<'_>, batch: &[usize]) {
        let dt = ctx.dt;
        let responses: Vec<VelocityResponse> = {
            let bodies: &RigidBodies = ctx.bodies;
            let constraints: &[RigidBodyContact] = ctx.constraints;
            let respond = |&c: &usize| self.velocity_response(bodies, c, &constraints[c], dt);
            #[cfg(feature = "parallel")]
            let out = batch.par_iter().filter_map(respond).collect();
            #[cfg(not(feature = "parallel"))]
            let out = batch.iter().filter_map(respond).collect();
            out
        };
        for response in responses {
            commit_velocity(ctx, &response);
        }
    }

    // ========================================================================
    // Push-Out Pass
    // ========================================================================

    fn push_out_response(
        &self,
        bodies: &RigidBodies,
        temporarily_static: &[bool],
        index: usize,
        contact: &RigidBodyContact,
        scale: f32,
        dt: f32,
    ) -> Option<PushOutResponse> {
        let (ia, ib) = (contact.body_a, contact.body_b);
        if bodies.sleeping[ia] {
            return None;
        }
        let movable_a = bodies.is_dynamic(ia) && !temporarily_static[ia];
        let movable_b = bodies.is_dynamic(ib) && !temporarily_static[ib];
        let mut tm_a = bodies.transform(ia, Pose::Predicted);
        let mut tm_b = bodies.transform(ib, Pose::Predicted);

        let query = self.query();
        let mut probe = contact.clone();
        let mut first_phi = None;
        let mut corrections = 0;
        let mut impulse_sum = Vec3::ZERO;
        for _ in 0..self.pair_iterations {
            update_constraint_at(bodies, &query, &mut probe, tm_a, tm_b);
            first_phi.get_or_insert(probe.phi);
            if probe.phi >= self.thickness {
                break;
            }
            corrections += 1;

            let inv_i1 = bodies.inv_inertia[ia].rotated(tm_a.rotation);
            let inv_i2 = bodies.inv_inertia[ib].rotated(tm_b.rotation);
            let r1 = probe.location - tm_a.translation;
            let r2 = probe.location - tm_b.translation;
            let factor = (if movable_a {
                factor_matrix(r1, &inv_i1, bodies.inv_m[ia])
            } else {
                Mat3::ZERO
            }) + (if movable_b {
                factor_matrix(r2, &inv_i2, bodies.inv_m[ib])
            } else {
                Mat3::ZERO
            });
            let Some(inv_factor) = factor.inverse() else {
                trace!(body_a = ia, body_b = ib, "singular push-out factor, contact skipped");
                break;
            };
            let impulse = inv_factor.mul_vec(probe.normal * ((self.thickness - probe.phi) * scale));
            if movable_a {
                tm_a.translation += impulse * bodies.inv_m[ia];
                tm_a.rotation = Quat::from_rotation_vector(inv_i1.mul_vec(r1.cross(impulse)))
                    .mul(tm_a.rotation)
                    .normalize();
            }
            if movable_b {
                tm_b.translation -= impulse * bodies.inv_m[ib];
                tm_b.rotation = Quat::from_rotation_vector(inv_i2.mul_vec(r2.cross(-impulse)))
                    .mul(tm_b.rotation)
                    .normalize();
            }
            if dt > 0.0 {
                impulse_sum += impulse / dt;
            }
        }

        Some(PushOutResponse {
            index,
            point: probe.point(),
            first_phi: first_phi.unwrap_or(self.thickness),
            corrections,
            impulse: impulse_sum,
            pose_a: (movable_a && corrections > 0).then_some(tm_a),
            pose_b: (movable_b && corrections > 0).then_some(tm_b),
        })
    }

    fn push_out_batch(
        &self,
        ctx: &mut SolveContext<'_>,
        temporarily_static: &[bool],
        batch: &[usize],
        scale: f32,
    ) -> Vec<PushOutResponse> {
        let dt = ctx.dt;
        let bodies: &RigidBodies = ctx.bodies;
        let constraints: &[RigidBodyContact] = ctx.constraints;
        let respond =
            |&c: &usize| self.push_out_response(bodies, temporarily_static, c, &constraints[c], scale, dt);
        #[cfg(feature = "parallel")]
        let out = batch.par_iter().filter_map(respond).collect();
        #[cfg(not(feature = "parallel"))]
        let out = batch.iter().filter_map(respond).collect();
        out
    }
}

impl ContactSolver for SequentialImpulseSolver {
    fn name(&self) -> &'static str {
        "sequential_impulse"
    }

    fn apply(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> usize {
        for batch in island.ordered_batches() {
            self.solve_velocity_batch(ctx, batch);
        }
        1
    }

    fn apply_push_out(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> PushOutStats {
        let mut stats = PushOutStats::default();
        let max_iterations = self.push_out_iterations;
        if max_iterations == 0 || island.constraints.is_empty() {
            return stats;
        }

        let mut temporarily_static = vec![false; ctx.bodies.len()];
        let mut needs_another = false;
        let mut iteration = 0;
        while iteration < max_iterations && (iteration == 0 || needs_another) {
            needs_another = false;
            let mut deepest = f32::MAX;
            // ramp starts at 2/N and reaches full strength one sweep before the last
            let scale = push_out_scale(iteration, max_iterations);
            let last = iteration + 1 == max_iterations;

            for level in &island.batches {
                for batch in level {
                    for response in self.push_out_batch(ctx, &temporarily_static, batch, scale) {
                        deepest = deepest.min(response.first_phi);
                        if response.corrections > 0 {
                            needs_another = true;
                            stats.corrections += response.corrections;
                        }
                        commit_push_out(ctx, &response);
                    }
                }
                if self.shock_propagation && last {
                    for &c in level.iter().flatten() {
                        let (ia, ib) = (ctx.constraints[c].body_a, ctx.constraints[c].body_b);
                        if !ctx.bodies.is_dynamic(ia) || temporarily_static[ia] {
                            temporarily_static[ib] = true;
                        } else if !ctx.bodies.is_dynamic(ib) || temporarily_static[ib] {
                            temporarily_static[ia] = true;
                        }
                    }
                }
            }

            stats.deepest_phi.push(deepest);
            iteration += 1;
        }
        stats.iterations = iteration;
        trace!(
            island = island.id,
            iterations = stats.iterations,
            corrections = stats.corrections,
            "push-out finished"
        );
        stats
    }
}

/// Fraction of the push-out correction applied on sweep `iteration` of `max_iterations`
///
/// `min(i + 2, N) / N`: the first sweep already moves 2/N of the way and the
/// final two sweeps run at full strength.
#[inline]
pub fn push_out_scale(iteration: usize, max_iterations: usize) -> f32 {
    (iteration + 2).min(max_iterations) as f32 / max_iterations as f32
}

// ============================================================================
// Commit
// ============================================================================

fn commit_velocity(ctx: &mut SolveContext<'_>, response: &VelocityResponse) {
    let contact = &mut ctx.constraints[response.index];
    contact.set_point(response.point);
    if !response.touching {
        return;
    }
    let (ia, ib) = (contact.body_a, contact.body_b);
    contact.accumulated_impulse += response.impulse;
    ctx.bodies.collided[ia] = true;
    ctx.bodies.collided[ib] = true;
    apply_delta(ctx.bodies, ia, response.delta_a, ctx.dt);
    apply_delta(ctx.bodies, ib, response.delta_b, ctx.dt);
}

/// Velocity change plus the matching predicted-pose change
#[inline]
fn apply_delta(bodies: &mut RigidBodies, index: usize, delta: BodyDelta, dt: f32) {
    if !bodies.is_dynamic(index) {
        return;
    }
    bodies.v[index] += delta.dv;
    bodies.w[index] += delta.dw;
    bodies.p[index] += delta.dv * dt;
    bodies.q_pred[index] = bodies.q_pred[index].integrate(delta.dw, dt);
}

fn commit_push_out(ctx: &mut SolveContext<'_>, response: &PushOutResponse) {
    let contact = &mut ctx.constraints[response.index];
    contact.set_point(response.point);
    contact.accumulated_impulse += response.impulse;
    let (ia, ib) = (contact.body_a, contact.body_b);
    if response.corrections > 0 {
        ctx.bodies.collided[ia] = true;
        ctx.bodies.collided[ib] = true;
    }
    if let Some(tm) = response.pose_a {
        ctx.bodies.p[ia] = tm.translation;
        ctx.bodies.q_pred[ia] = tm.rotation;
    }
    if let Some(tm) = response.pose_b {
        ctx.bodies.p[ib] = tm.translation;
        ctx.bodies.q_pred[ib] = tm.rotation;
    }
}

/// Scale `impulse` so the contact cannot increase the kinetic energy
///
/// Velocities are measured relative to the kinematic body when one side has
/// infinite mass. A negative energy budget drops the impulse entirely.
#[allow(clippy::too_many_arguments)]
fn energy_clamped_impulse(
    bodies: &RigidBodies,
    ia: usize,
    ib: usize,
    impulse: Vec3,
    r1: Vec3,
    r2: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Vec3 {
    let kinematic_velocity = if !bodies.is_dynamic(ia) {
        v1
    } else if !bodies.is_dynamic(ib) {
        v2
    } else {
        Vec3::ZERO
    };
    let size = impulse.length_squared();
    let side = |i: usize, r: Vec3| -> (f32, f32) {
        if !bodies.is_dynamic(i) {
            return (0.0, 0.0);
        }
        let jr = r.cross(impulse);
        let inv_jr = bodies.world_inv_inertia(i, Pose::Predicted).mul_vec(jr);
        let spin = bodies.world_inertia(i, Pose::Predicted).mul_vec(bodies.w[i]);
        let numerator = impulse.dot(bodies.v[i] - kinematic_velocity) + inv_jr.dot(spin);
        let denominator = size * bodies.inv_m[i] + jr.dot(inv_jr);
        (numerator, denominator)
    };
    let (n0, d0) = side(ia, r1);
    let (n1, d1) = side(ib, r2);
    let numerator = -2.0 * (n0 - n1);
    if numerator < 0.0 {
        return Vec3::ZERO;
    }
    let denominator = d0 + d1;
    if numerator < denominator {
        impulse * (numerator / denominator)
    } else {
        impulse
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

    /// Static floor (body 0) plus unit spheres at the given heights
    fn sphere_stack(heights: &[f32], material: PhysicsMaterial) -> RigidBodies {
        let mut bodies = RigidBodies::new();
        bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO).with_material(material));
        for &z in heights {
            bodies.add(
                BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::new(0.0, 0.0, z), 1.0).with_material(material),
            );
        }
        bodies
    }

    fn contacts(bodies: &RigidBodies, pairs: &[(usize, usize)]) -> Vec<RigidBodyContact> {
        pairs.iter().map(|&(a, b)| compute_constraint(bodies, a, b)).collect()
    }

    fn only_island(bodies: &mut RigidBodies, constraints: &[RigidBodyContact]) -> IslandData {
        let mut graph = ContactGraph::new();
        graph.compute_graph(bodies, constraints);
        assert_eq!(graph.num_islands(), 1, "test scene must form one island");
        graph.islands()[0].clone()
    }

    fn phi_of(bodies: &RigidBodies, contact: &RigidBodyContact, thickness: f32) -> f32 {
        let mut probe = contact.clone();
        crate::narrow_phase::update_constraint(bodies, &ContactQuery::new(Pose::Predicted, thickness), &mut probe);
        probe.phi
    }

    #[test]
    fn test_factor_matrix_point_mass() {
        let k = factor_matrix(Vec3::ZERO, &Mat3::IDENTITY, 0.5);
        assert_eq!(k, Mat3::diagonal(0.5, 0.5, 0.5), "no lever arm means pure linear response");
    }

    #[test]
    fn test_factor_matrix_matches_point_velocity_change() {
        let r = Vec3::new(0.3, -0.7, 1.1);
        let inv_i = Mat3::diagonal(2.0, 0.5, 1.5);
        let inv_m = 0.25;
        let j = Vec3::new(1.0, 2.0, -0.5);
        let expected = j * inv_m + inv_i.mul_vec(r.cross(j)).cross(r);
        let got = factor_matrix(r, &inv_i, inv_m).mul_vec(j);
        assert!((got - expected).length() < 1e-5, "K*J {got:?} != {expected:?}");
    }

    #[test]
    fn test_resting_contact_stops_approach() {
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::default());
        bodies.v[1] = Vec3::new(0.0, 0.0, -5.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        assert!(bodies.v[1].z.abs() < 1e-3, "approach velocity removed, got {:?}", bodies.v[1]);
        assert!(bodies.collided[0] && bodies.collided[1]);
        assert!(constraints[0].accumulated_impulse.length() > 4.9);
    }

    #[test]
    fn test_contact_apart_at_step_start_closes_gap() {
        let mut bodies = sphere_stack(&[1.1], PhysicsMaterial::new(0.5, 1.0));
        bodies.v[1] = Vec3::new(0.0, 0.0, -12.0);
        bodies.p[1] = bodies.x[1] + bodies.v[1] * DT;
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        assert!((bodies.v[1].z + 6.0).abs() < 1e-2, "only the overshoot is removed, got {:?}", bodies.v[1]);
        assert!((bodies.p[1].z - 1.0).abs() < 1e-3, "lands on the floor, got {:?}", bodies.p[1]);
    }

    #[test]
    fn test_restitution_bounces_fast_contact() {
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::new(0.5, 1.0));
        bodies.v[1] = Vec3::new(0.0, 0.0, -50.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        assert!((bodies.v[1].z - 50.0).abs() < 1e-2, "elastic bounce, got {:?}", bodies.v[1]);
        assert!(bodies.kinetic_energy(1) <= 0.5 * 50.0 * 50.0 + 1e-1, "bounce must not add energy");
    }

    #[test]
    fn test_separating_contact_is_ignored() {
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::default());
        bodies.v[1] = Vec3::new(0.0, 0.0, 3.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        assert_eq!(bodies.v[1], Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(constraints[0].accumulated_impulse, Vec3::ZERO);
        assert!(bodies.collided[1], "touching contacts still flag their bodies");
    }

    #[test]
    fn test_sliding_friction_stays_in_cone() {
        let mu = 0.1;
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::new(mu, 0.0));
        bodies.v[1] = Vec3::new(10.0, 0.0, -5.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        let j = constraints[0].accumulated_impulse;
        let jn = j.dot(constraints[0].normal).abs();
        let jt = (j - constraints[0].normal * j.dot(constraints[0].normal)).length();
        assert!(jt <= mu * jn + 1e-4, "tangential {jt} exceeds cone {}", mu * jn);
        assert!(bodies.v[1].z.abs() < 1e-3, "normal approach removed");
        assert!(bodies.v[1].x < 10.0 && bodies.v[1].x > 9.0, "friction slows sliding, got {:?}", bodies.v[1]);
        assert!(bodies.w[1].y > 0.0, "friction at the bottom spins the sphere forward");
    }

    #[test]
    fn test_angular_friction_damps_spin() {
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::new(1.0, 0.0));
        bodies.v[1] = Vec3::new(0.0, 0.0, -5.0);
        bodies.w[1] = Vec3::new(0.0, 0.0, 3.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let config = SolverConfig {
            angular_friction: 0.01,
            ..SolverConfig::default()
        };
        let mut solver = SequentialImpulseSolver::new(&config);
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);

        assert!(bodies.w[1].z < 3.0, "spin about the normal is damped, got {:?}", bodies.w[1]);
        assert!(bodies.w[1].z >= 0.0, "damping never reverses the spin");
    }

    #[test]
    fn test_sleeping_contact_untouched() {
        let mut bodies = sphere_stack(&[0.98], PhysicsMaterial::default());
        bodies.v[1] = Vec3::new(0.0, 0.0, -5.0);
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);
        bodies.sleeping[1] = true;
        let contact = &mut constraints[0];
        if contact.body_a != 1 {
            std::mem::swap(&mut contact.body_a, &mut contact.body_b);
        }

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply(&mut ctx, &island);
        assert_eq!(bodies.v[1], Vec3::new(0.0, 0.0, -5.0));
    }

    #[test]
    fn test_push_out_ramp_converges() {
        let mut bodies = sphere_stack(&[0.9], PhysicsMaterial::default());
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        let stats = solver.apply_push_out(&mut ctx, &island);

        let expected = [-0.1, -0.06, -0.024, -0.0048];
        for (i, want) in expected.iter().enumerate() {
            let got = stats.deepest_phi[i];
            assert!((got - want).abs() < 1e-4, "iteration {i}: phi {got}, expected {want}");
        }
        for pair in stats.deepest_phi.windows(2) {
            assert!(pair[1].abs() < pair[0].abs(), "|phi| must shrink every iteration: {:?}", stats.deepest_phi);
        }
        assert!(stats.iterations <= 5);
        assert!(phi_of(&bodies, &constraints[0], 0.0).abs() < 1e-3);
        assert!((bodies.p[1].z - 1.0).abs() < 1e-3, "sphere ends on the floor, got {:?}", bodies.p[1]);
        assert_eq!(bodies.x[1].z, 0.9, "push-out only moves the predicted pose");
        assert!(constraints[0].accumulated_impulse.z.abs() > 0.0);
    }

    #[test]
    fn test_push_out_scale_schedule() {
        let scales: Vec<f32> = (0..4).map(|i| push_out_scale(i, 4)).collect();
        assert_eq!(scales, vec![0.5, 0.75, 1.0, 1.0], "ramp for four sweeps");
        assert_eq!(push_out_scale(0, 1), 1.0, "a single sweep runs at full strength");
        assert_eq!(push_out_scale(0, 2), 1.0);
    }

    #[test]
    fn test_push_out_stops_early_when_separated() {
        let mut bodies = sphere_stack(&[1.5], PhysicsMaterial::default());
        let mut constraints = contacts(&bodies, &[(1, 0)]);
        let island = only_island(&mut bodies, &constraints);

        let mut solver = SequentialImpulseSolver::new(&SolverConfig::default());
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        let stats = solver.apply_push_out(&mut ctx, &island);

        assert_eq!(stats.iterations, 1, "nothing to resolve after the first sweep");
        assert_eq!(stats.corrections, 0);
        assert_eq!(bodies.p[1].z, 1.5);
        assert!(stats.converged(5));
    }

    fn stacked_push_out(shock_propagation: bool) -> RigidBodies {
        // floor - A - B - C, each sphere overlapping the one below
        let mut bodies = sphere_stack(&[0.9, 2.7, 4.5], PhysicsMaterial::default());
        let mut constraints = contacts(&bodies, &[(1, 0), (2, 1), (3, 2)]);
        let island = only_island(&mut bodies, &constraints);
        assert_eq!(island.num_levels(), 2);

        let config = SolverConfig {
            push_out_iterations: 1,
            use_shock_propagation: shock_propagation,
            ..SolverConfig::default()
        };
        let mut solver = SequentialImpulseSolver::new(&config);
        let mut ctx = SolveContext::new(&mut bodies, &mut constraints, DT);
        solver.apply_push_out(&mut ctx, &island);
        bodies
    }

    #[test]
    fn test_shock_propagation_freezes_lower_levels() {
        let bodies = stacked_push_out(true);
        assert!((bodies.p[2].z - 2.85).abs() < 1e-3, "B frozen after level 0, got {:?}", bodies.p[2]);
        assert!((bodies.p[3].z - 4.85).abs() < 1e-3, "C takes the whole correction, got {:?}", bodies.p[3]);
    }

    #[test]
    fn test_without_shock_propagation_corrections_split() {
        let bodies = stacked_push_out(false);
        assert!((bodies.p[2].z - 2.675).abs() < 1e-3, "B shares the correction, got {:?}", bodies.p[2]);
        assert!((bodies.p[3].z - 4.675).abs() < 1e-3, "C shares the correction, got {:?}", bodies.p[3]);
    }

    #[test]
    fn test_push_out_stats_merge() {
        let mut a = PushOutStats {
            iterations: 2,
            corrections: 3,
            deepest_phi: vec![-0.2, -0.1],
        };
        let b = PushOutStats {
            iterations: 3,
            corrections: 1,
            deepest_phi: vec![-0.3, 0.0, 0.0],
        };
        a.merge(&b);
        assert_eq!(a.iterations, 3);
        assert_eq!(a.corrections, 4);
        assert_eq!(a.deepest_phi, vec![-0.3, -0.1, 0.0]);
    }
}
