//! Evolution Loop
//!
//! One [`Evolution`] owns a world (bodies, contacts, islands, solver) and
//! advances it one time step at a time through a fixed phase sequence:
//!
//! ```text
//! Idle -> BroadPhase -> NarrowPhase -> GraphUpdate -> Integrate
//!      -> Apply -> ApplyPushOut -> SleepReconcile -> Idle
//! ```
//!
//! # Features
//!
//! - Velocity-widened broad phase over a fresh BVH every step
//! - Incremental island update; only islands touched by changed contacts are re-partitioned
//! - Per-island force callbacks run before the velocity pass
//! - Sequential-impulse or PGS solving, selected by [`SolverKind`]
//! - Kinematic targets: authoritative poses for infinite-mass bodies
//! - Optional single-step debugging through a shared [`SubstepGate`], which
//!   parks the step after `Integrate`
//! - Post-solve contact impulses for downstream fracture logic

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, trace};

use crate::collision::CollisionConstraints;
use crate::config::{SolverConfig, SolverKind};
use crate::contact::RigidBodyContact;
use crate::contact_graph::ContactGraph;
use crate::error::SolverError;
use crate::math::{Quat, Vec3};
use crate::particles::{BodyDesc, Pose, RigidBodies};
use crate::pgs::PgsSolver;
use crate::profiling::{
    PhysicsProfiler, StepStats, STAGE_APPLY, STAGE_BROAD_PHASE, STAGE_GRAPH_UPDATE, STAGE_INTEGRATE,
    STAGE_NARROW_PHASE, STAGE_PUSH_OUT, STAGE_SLEEP, STAGE_TOTAL_STEP,
};
use crate::sequential::{PushOutStats, SequentialImpulseSolver};
use crate::solver::{ContactSolver, SolveContext};
use crate::substep::SubstepGate;

/// Per-island force hook: `(bodies, dt, island)`
pub type ForceCallback = Box<dyn FnMut(&mut RigidBodies, f32, usize) + Send>;

// ============================================================================
// Phases
// ============================================================================

/// Phase of the evolution loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EvolutionPhase {
    /// Between steps
    #[default]
    Idle,
    /// BVH build and candidate pairs
    BroadPhase,
    /// Contact evaluation for every candidate pair
    NarrowPhase,
    /// Island, level and color update
    GraphUpdate,
    /// Forces, velocities and predicted poses
    Integrate,
    /// Velocity passes
    Apply,
    /// Position passes
    ApplyPushOut,
    /// Pose commit and island sleep
    SleepReconcile,
}

impl EvolutionPhase {
    /// The phase that must follow this one
    #[inline]
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::BroadPhase,
            Self::BroadPhase => Self::NarrowPhase,
            Self::NarrowPhase => Self::GraphUpdate,
            Self::GraphUpdate => Self::Integrate,
            Self::Integrate => Self::Apply,
            Self::Apply => Self::ApplyPushOut,
            Self::ApplyPushOut => Self::SleepReconcile,
            Self::SleepReconcile => Self::Idle,
        }
    }

    /// Lowercase name used in trace events
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BroadPhase => "broad_phase",
            Self::NarrowPhase => "narrow_phase",
            Self::GraphUpdate => "graph_update",
            Self::Integrate => "integrate",
            Self::Apply => "apply",
            Self::ApplyPushOut => "apply_push_out",
            Self::SleepReconcile => "sleep_reconcile",
        }
    }
}

// ============================================================================
// Evolution
// ============================================================================

/// A simulated world and its step loop
pub struct Evolution {
    config: SolverConfig,
    bodies: RigidBodies,
    collisions: CollisionConstraints,
    graph: ContactGraph,
    solver: Box<dyn ContactSolver>,
    force_callbacks: Vec<ForceCallback>,
    kinematic_targets: Vec<(usize, Vec3, Quat)>,
    last_targeted: Vec<usize>,
    gate: Arc<SubstepGate>,
    phase: EvolutionPhase,
    profiler: PhysicsProfiler,
}

impl Evolution {
    /// Empty world; fails when `config` does not validate
    pub fn new(config: SolverConfig) -> Result<Self, SolverError> {
        config.validate()?;
        let solver: Box<dyn ContactSolver> = match config.solver {
            SolverKind::SequentialImpulse => Box::new(SequentialImpulseSolver::new(&config)),
            SolverKind::ProjectedGaussSeidel => Box::new(PgsSolver::new(&config)),
        };
        debug!(solver = solver.name(), "created evolution");
        Ok(Self {
            collisions: CollisionConstraints::new(&config),
            config,
            bodies: RigidBodies::new(),
            graph: ContactGraph::new(),
            solver,
            force_callbacks: Vec::new(),
            kinematic_targets: Vec::new(),
            last_targeted: Vec::new(),
            gate: Arc::new(SubstepGate::new()),
            phase: EvolutionPhase::Idle,
            profiler: PhysicsProfiler::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Step parameters
    #[inline]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Body store
    #[inline]
    pub fn bodies(&self) -> &RigidBodies {
        &self.bodies
    }

    /// Body store, mutable (between steps)
    #[inline]
    pub fn bodies_mut(&mut self) -> &mut RigidBodies {
        &mut self.bodies
    }

    /// Contacts of the last step, with their accumulated impulses
    #[inline]
    pub fn constraints(&self) -> &[RigidBodyContact] {
        self.collisions.constraints()
    }

    /// Island partition of the last step
    #[inline]
    pub fn graph(&self) -> &ContactGraph {
        &self.graph
    }

    /// Current phase (`Idle` between steps)
    #[inline]
    pub fn phase(&self) -> EvolutionPhase {
        self.phase
    }

    /// Counters of the last step
    #[inline]
    pub fn last_stats(&self) -> &StepStats {
        &self.profiler.stats
    }

    /// Stage timers
    #[inline]
    pub fn profiler(&self) -> &PhysicsProfiler {
        &self.profiler
    }

    /// Stage timers, mutable (e.g. to disable timing)
    #[inline]
    pub fn profiler_mut(&mut self) -> &mut PhysicsProfiler {
        &mut self.profiler
    }

    /// Name of the active contact solver
    #[inline]
    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Handle to the single-step gate, shareable with a controlling thread
    #[inline]
    pub fn substep_gate(&self) -> Arc<SubstepGate> {
        Arc::clone(&self.gate)
    }

    /// `(body_a, body_b, accumulated impulse)` for every contact
    pub fn contact_impulses(&self) -> Vec<(usize, usize, Vec3)> {
        self.constraints()
            .iter()
            .map(|c| (c.body_a, c.body_b, c.accumulated_impulse))
            .collect()
    }

    /// Indices of contacts whose accumulated impulse exceeds `threshold`
    pub fn strain_exceeding(&self, threshold: f32) -> Vec<usize> {
        self.constraints()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.accumulated_impulse.length() > threshold)
            .map(|(i, _)| i)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Body Management
    // ------------------------------------------------------------------------

    /// Add one body
    pub fn add_body(&mut self, desc: BodyDesc) -> usize {
        let index = self.bodies.add(desc);
        self.register_added(&[index]);
        index
    }

    /// Add several bodies, returning their indices
    pub fn add_bodies(&mut self, descs: impl IntoIterator<Item = BodyDesc>) -> Vec<usize> {
        let added: Vec<usize> = descs.into_iter().map(|d| self.bodies.add(d)).collect();
        self.register_added(&added);
        added
    }

    /// Contacts and islands for freshly added bodies, so queries between
    /// steps already see them
    fn register_added(&mut self, added: &[usize]) {
        if added.is_empty() {
            return;
        }
        let added_set: HashSet<usize> = added.iter().copied().collect();
        let active: Vec<usize> = self
            .bodies
            .active_indices()
            .into_iter()
            .filter(|i| !added_set.contains(i))
            .collect();
        self.collisions.update_constraints(&self.bodies, 0.0, added, &active);
        self.graph
            .update_islands_from_constraints(&mut self.bodies, self.collisions.constraints());
    }

    /// Take bodies out of the simulation
    ///
    /// Indices stay valid; the bodies are disabled and their contacts pruned.
    pub fn remove_bodies(&mut self, indices: &[usize]) -> Result<(), SolverError> {
        for &i in indices {
            self.bodies.check_index(i)?;
        }
        let removed: HashSet<usize> = indices.iter().copied().collect();
        for &i in &removed {
            self.graph.wake_body(&mut self.bodies, i);
            self.bodies.disabled[i] = true;
            self.bodies.sleeping[i] = false;
            self.bodies.v[i] = Vec3::ZERO;
            self.bodies.w[i] = Vec3::ZERO;
        }
        self.kinematic_targets.retain(|(i, _, _)| !removed.contains(i));
        self.collisions.remove_constraints(&removed);
        self.graph
            .update_islands_from_constraints(&mut self.bodies, self.collisions.constraints());
        Ok(())
    }

    /// Drive an infinite-mass body to a pose during the next step
    ///
    /// The body's velocity for that step is derived from the move, so
    /// contacts see it as moving. Without a new target the body stops on the
    /// following step.
    pub fn set_kinematic_target(&mut self, index: usize, position: Vec3, rotation: Quat) -> Result<(), SolverError> {
        self.bodies.check_index(index)?;
        if self.bodies.is_dynamic(index) {
            return Err(SolverError::InvalidConfiguration {
                reason: "kinematic targets require an infinite-mass body",
            });
        }
        self.kinematic_targets.retain(|(i, _, _)| *i != index);
        self.kinematic_targets.push((index, position, rotation));
        Ok(())
    }

    /// Wake the island of a body
    pub fn wake_body(&mut self, index: usize) -> Result<(), SolverError> {
        self.bodies.check_index(index)?;
        self.graph.wake_body(&mut self.bodies, index);
        Ok(())
    }

    /// Register a per-island force hook
    pub fn add_force_callback(&mut self, callback: impl FnMut(&mut RigidBodies, f32, usize) + Send + 'static) {
        self.force_callbacks.push(Box::new(callback));
    }

    // ========================================================================
    // Step
    // ========================================================================

    #[inline]
    fn enter(&mut self, phase: EvolutionPhase) {
        debug_assert_eq!(self.phase.next(), phase, "evolution phases run in order");
        self.phase = phase;
        trace!(phase = phase.name(), "entering phase");
    }

    /// Advance the world by `dt`
    ///
    /// A non-positive `dt` leaves the world untouched.
    #[instrument(level = "debug", skip(self), fields(bodies = self.bodies.len()))]
    pub fn advance_one_time_step(&mut self, dt: f32) {
        if !(dt > 0.0) {
            return;
        }
        let step_start = Instant::now();
        self.profiler.begin_frame();

        self.enter(EvolutionPhase::BroadPhase);
        let start = Instant::now();
        self.bodies.collided.iter_mut().for_each(|c| *c = false);
        let pairs = self.collisions.broad_phase(&self.bodies, dt);
        self.profiler.stats.candidate_pairs = self.collisions.last_candidate_count();
        self.profiler.stats.narrow_phase_pairs = pairs.len();
        self.profiler.record_since(STAGE_BROAD_PHASE, start);

        self.enter(EvolutionPhase::NarrowPhase);
        let start = Instant::now();
        self.collisions.narrow_phase(&self.bodies, dt, &pairs);
        self.profiler.stats.contacts = self.collisions.len();
        self.profiler.record_since(STAGE_NARROW_PHASE, start);

        self.enter(EvolutionPhase::GraphUpdate);
        let start = Instant::now();
        self.graph
            .update_islands_from_constraints(&mut self.bodies, self.collisions.constraints());
        self.wake_kinematic_contacts();
        self.profiler.stats.islands = self.graph.num_islands();
        self.profiler.stats.recomputed_islands = self.graph.last_recomputed();
        self.profiler.record_since(STAGE_GRAPH_UPDATE, start);

        self.enter(EvolutionPhase::Integrate);
        let start = Instant::now();
        self.integrate(dt);
        self.profiler.record_since(STAGE_INTEGRATE, start);
        if self.gate.pause() {
            trace!(steps = self.gate.steps(), "released from single-step pause");
        }

        self.enter(EvolutionPhase::Apply);
        let start = Instant::now();
        self.apply(dt);
        self.profiler.record_since(STAGE_APPLY, start);

        self.enter(EvolutionPhase::ApplyPushOut);
        let start = Instant::now();
        let push_out = self.apply_push_out(dt);
        self.profiler.stats.push_out_iterations = push_out.iterations;
        self.profiler.stats.push_out_corrections = push_out.corrections;
        self.profiler.record_since(STAGE_PUSH_OUT, start);

        self.enter(EvolutionPhase::SleepReconcile);
        let start = Instant::now();
        self.reconcile();
        self.profiler.record_since(STAGE_SLEEP, start);

        self.enter(EvolutionPhase::Idle);
        self.profiler.record_since(STAGE_TOTAL_STEP, step_start);
        debug!(
            contacts = self.profiler.stats.contacts,
            islands = self.profiler.stats.islands,
            sleeping = self.profiler.stats.sleeping_islands,
            "step finished"
        );
    }

    /// Wake sleeping islands pushed by a moving infinite-mass body
    fn wake_kinematic_contacts(&mut self) {
        let mut woken: Vec<usize> = Vec::new();
        for c in self.collisions.constraints() {
            for (driver, driven) in [(c.body_a, c.body_b), (c.body_b, c.body_a)] {
                let moving = !self.bodies.is_dynamic(driver)
                    && (self.bodies.v[driver] != Vec3::ZERO
                        || self.bodies.w[driver] != Vec3::ZERO
                        || self.kinematic_targets.iter().any(|(i, _, _)| *i == driver));
                if moving && self.bodies.sleeping[driven] {
                    woken.push(driven);
                }
            }
        }
        for body in woken {
            self.graph.wake_body(&mut self.bodies, body);
        }
    }

    fn integrate(&mut self, dt: f32) {
        let woken = self.graph.wake_loaded(&mut self.bodies);
        if woken > 0 {
            debug!(bodies = woken, "woke loaded bodies");
        }
        for callback in &mut self.force_callbacks {
            for island in self.graph.islands() {
                if !island.sleeping {
                    callback(&mut self.bodies, dt, island.id);
                }
            }
        }

        let targeted: Vec<usize> = self.kinematic_targets.iter().map(|&(i, _, _)| i).collect();
        for i in std::mem::replace(&mut self.last_targeted, targeted.clone()) {
            if !targeted.contains(&i) {
                self.bodies.v[i] = Vec3::ZERO;
                self.bodies.w[i] = Vec3::ZERO;
            }
        }

        let gravity = self.config.gravity;
        let bodies = &mut self.bodies;
        let mut active = 0;
        for i in 0..bodies.len() {
            if bodies.disabled[i] || bodies.sleeping[i] {
                bodies.p[i] = bodies.x[i];
                bodies.q_pred[i] = bodies.q[i];
                continue;
            }
            if bodies.is_dynamic(i) {
                active += 1;
                let inv_inertia = bodies.world_inv_inertia(i, Pose::Current);
                bodies.v[i] += (gravity + bodies.force[i] * bodies.inv_m[i]) * dt;
                bodies.w[i] += inv_inertia.mul_vec(bodies.torque[i]) * dt;
            }
            bodies.p[i] = bodies.x[i] + bodies.v[i] * dt;
            bodies.q_pred[i] = bodies.q[i].integrate(bodies.w[i], dt);
        }
        for (i, position, rotation) in self.kinematic_targets.drain(..) {
            bodies.v[i] = (position - bodies.x[i]) * (1.0 / dt);
            bodies.w[i] = rotation.angular_velocity_from(bodies.q[i], dt);
            bodies.p[i] = position;
            bodies.q_pred[i] = rotation;
        }
        self.profiler.stats.active_bodies = active;
    }

    fn apply(&mut self, dt: f32) {
        let mut sweeps = 0;
        for island in self.graph.islands().iter().filter(|island| !island.sleeping) {
            let mut ctx = SolveContext::new(&mut self.bodies, self.collisions.constraints_mut(), dt);
            for _ in 0..self.config.iterations {
                sweeps += self.solver.apply(&mut ctx, island);
            }
        }
        self.profiler.stats.solver_sweeps = sweeps;
    }

    fn apply_push_out(&mut self, dt: f32) -> PushOutStats {
        let mut total = PushOutStats::default();
        for island in self.graph.islands().iter().filter(|island| !island.sleeping) {
            let mut ctx = SolveContext::new(&mut self.bodies, self.collisions.constraints_mut(), dt);
            let stats = self.solver.apply_push_out(&mut ctx, island);
            total.merge(&stats);
        }
        total
    }

    /// Commit predicted poses, clear loads and put idle islands to sleep
    fn reconcile(&mut self) {
        let bodies = &mut self.bodies;
        for i in 0..bodies.len() {
            if bodies.disabled[i] || bodies.sleeping[i] {
                continue;
            }
            bodies.x[i] = bodies.p[i];
            bodies.q[i] = bodies.q_pred[i];
        }
        let slept = self.graph.sleep_inactive(&mut self.bodies, &self.config.sleep);
        self.bodies.force.iter_mut().for_each(|f| *f = Vec3::ZERO);
        self.bodies.torque.iter_mut().for_each(|t| *t = Vec3::ZERO);
        self.profiler.stats.islands_slept = slept.len();
        self.profiler.stats.sleeping_islands = self.graph.num_sleeping();
    }
}

impl std::fmt::Debug for Evolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evolution")
            .field("bodies", &self.bodies.len())
            .field("constraints", &self.collisions.len())
            .field("islands", &self.graph.num_islands())
            .field("solver", &self.solver.name())
            .field("phase", &self.phase)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
