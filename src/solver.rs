//! Contact Solver Interface
//!
//! Both contact solvers plug into the evolution loop through [`ContactSolver`].
//! A solver is driven once per awake island: `apply` resolves velocities
//! (called `iterations` times), then `apply_push_out` removes the remaining
//! penetration by moving predicted poses.
//!
//! # Features
//!
//! - Island-scoped solving: a solver never touches bodies outside the island
//! - Shared mutable view of the body store and the step's contact list
//! - Uniform push-out statistics for profiling

use crate::contact::RigidBodyContact;
use crate::contact_graph::IslandData;
use crate::particles::RigidBodies;
use crate::sequential::PushOutStats;

// ============================================================================
// Solve Context
// ============================================================================

/// Mutable state handed to a solver for one island
pub struct SolveContext<'a> {
    /// Body store (`v`, `w`, `p`, `q_pred` and `collided` are written)
    pub bodies: &'a mut RigidBodies,
    /// Every contact of the step; islands index into it
    pub constraints: &'a mut [RigidBodyContact],
    /// Step length
    pub dt: f32,
}

impl<'a> SolveContext<'a> {
    /// Bundle the solver inputs
    #[inline]
    pub fn new(bodies: &'a mut RigidBodies, constraints: &'a mut [RigidBodyContact], dt: f32) -> Self {
        Self {
            bodies,
            constraints,
            dt,
        }
    }
}

// ============================================================================
// Solver Trait
// ============================================================================

/// A contact solver driven per island by the evolution loop
pub trait ContactSolver: Send {
    /// Short name used in trace events
    fn name(&self) -> &'static str;

    /// Velocity pass over the island's contacts
    ///
    /// Returns the number of sweeps performed.
    fn apply(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> usize;

    /// Position pass removing penetration left after the velocity passes
    fn apply_push_out(&mut self, ctx: &mut SolveContext<'_>, island: &IslandData) -> PushOutStats;
}
