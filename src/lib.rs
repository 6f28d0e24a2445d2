//! # ALICE-Rigid
//!
//! **Rigid-Body Contact Solving Core**
//!
//! Broad phase, narrow phase, contact islands and two iterative contact
//! solvers, driven by a fixed-order evolution loop.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **BVH** | Axis or octal splits, global list for unbounded shapes |
//! | **Narrow phase** | Sphere/box/plane/convex/level-set/union pairs, GJK for convex pairs |
//! | **Contact graph** | Union-find islands, contact levels and colors, island sleep |
//! | **Sequential impulse** | Velocity pass with friction and restitution, ramped push-out |
//! | **PGS** | Multi-point manifolds, hull reduction, optional swept contacts |
//! | **Evolution** | Per-island force hooks, kinematic targets, single-step gate |
//!
//! ## Conventions
//!
//! - `f32` throughout, Z-up, default gravity `(0, 0, -980)`
//! - A contact's normal points from `body_b` toward `body_a`; `phi < 0` is penetration
//! - Bodies with `inv_m == 0` are static or kinematic and are never written by the solver
//!
//! ## Quick Start
//!
//! ```rust
//! use alice_rigid::prelude::*;
//!
//! let mut world = Evolution::new(SolverConfig::default()).unwrap();
//! world.add_body(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
//! let ball = world.add_body(BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::new(0.0, 0.0, 3.0), 1.0));
//!
//! for _ in 0..120 {
//!     world.advance_one_time_step(1.0 / 60.0);
//! }
//! assert!(world.bodies().x[ball].z > 0.4);
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` (default): rayon fork/join over bodies, pairs and contact colors

pub mod bvh;
pub mod collision;
pub mod config;
pub mod contact;
pub mod contact_graph;
pub mod error;
pub mod evolution;
pub mod gjk;
pub mod levelset;
pub mod material;
pub mod math;
pub mod narrow_phase;
pub mod particles;
pub mod pgs;
pub mod profiling;
pub mod sequential;
pub mod shape;
pub mod solver;
pub mod substep;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bvh::{BoundingVolumeHierarchy, BvhNode, BvhStats};
    pub use crate::collision::CollisionConstraints;
    pub use crate::config::{BvhConfig, PgsConfig, SleepConfig, SolverConfig, SolverKind};
    pub use crate::contact::{ManifoldPoint, RigidBodyContact};
    pub use crate::contact_graph::{ContactGraph, IslandData};
    pub use crate::error::SolverError;
    pub use crate::evolution::{Evolution, EvolutionPhase, ForceCallback};
    pub use crate::levelset::{LevelSet, UniformGrid};
    pub use crate::material::{CombineRule, CombinedMaterial, PhysicsMaterial};
    pub use crate::math::{Mat3, Quat, Transform, Vec3};
    pub use crate::narrow_phase::ContactQuery;
    pub use crate::particles::{BodyDesc, Pose, RigidBodies};
    pub use crate::pgs::PgsSolver;
    pub use crate::profiling::{PhysicsProfiler, StepStats};
    pub use crate::sequential::{PushOutStats, SequentialImpulseSolver};
    pub use crate::shape::{Aabb, ConvexHull, Shape, ShapeHandle, ShapeKind};
    pub use crate::solver::{ContactSolver, SolveContext};
    pub use crate::substep::SubstepGate;
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn test_box_stack_settles() {
        let mut world = Evolution::new(SolverConfig {
            push_out_iterations: 8,
            ..SolverConfig::default()
        })
        .expect("valid config");
        world.add_body(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
        let half = Vec3::new(0.5, 0.5, 0.5);
        let lower = world.add_body(BodyDesc::new_dynamic(Shape::cuboid(half), Vec3::new(0.0, 0.0, 0.5), 1.0));
        let upper = world.add_body(BodyDesc::new_dynamic(Shape::cuboid(half), Vec3::new(0.0, 0.0, 1.5), 1.0));

        for _ in 0..60 {
            world.advance_one_time_step(DT);
        }
        let bodies = world.bodies();
        let (low, high) = (bodies.x[lower].z, bodies.x[upper].z);
        assert!((low - 0.5).abs() < 0.15, "lower box at {low}");
        assert!(high > low + 0.8 && high < low + 1.2, "upper box at {high} rests on the lower one");
        assert_eq!(world.graph().num_islands(), 1, "the stack is one island");
    }

    #[test]
    fn test_both_solvers_stop_a_falling_sphere() {
        for config in [SolverConfig::default(), SolverConfig::pgs()] {
            let kind = config.solver;
            let mut world = Evolution::new(config).expect("valid config");
            world.add_body(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
            let ball = world.add_body(BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::new(0.0, 0.0, 2.0), 1.0));
            for _ in 0..90 {
                world.advance_one_time_step(DT);
            }
            let z = world.bodies().x[ball].z;
            assert!(z > 0.35 && z < 0.6, "{kind:?}: sphere settled at {z}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = SolverError::InvalidBodyIndex { index: 7, count: 3 };
        assert_eq!(err.to_string(), "body index 7 out of range (count=3)");
    }
}
