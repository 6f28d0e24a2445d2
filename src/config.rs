//! Solver Configuration
//!
//! Plain configuration structs with sensible defaults. Every struct exposes a
//! `validate()` that rejects values the solver cannot work with; `Evolution::new`
//! calls it once up front so the hot path never has to.

use crate::error::SolverError;
use crate::math::Vec3;

/// Which contact solver the evolution loop drives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverKind {
    /// Sequential impulses per contact, then iterative push-out
    #[default]
    SequentialImpulse,
    /// Projected Gauss-Seidel over multi-point manifolds
    ProjectedGaussSeidel,
}

// ============================================================================
// Spatial Index
// ============================================================================

/// Bounding volume hierarchy build parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BvhConfig {
    /// A node with this many objects or fewer becomes a leaf
    pub min_objects: usize,
    /// Maximum tree depth
    pub max_levels: usize,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            min_objects: 5,
            max_levels: 12,
        }
    }
}

impl BvhConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.min_objects == 0 {
            return Err(SolverError::InvalidConfiguration {
                reason: "bvh.min_objects must be > 0",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Sleeping
// ============================================================================

/// Island sleep thresholds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SleepConfig {
    /// Linear speed below which a body counts as idle
    pub linear_threshold: f32,
    /// Angular speed below which a body counts as idle
    pub angular_threshold: f32,
    /// Consecutive idle steps before the island sleeps
    ///
    /// Inclusive: the island sleeps on the step that records its
    /// `frames_to_sleep`-th idle frame, so `1` sleeps on the first idle step.
    pub frames_to_sleep: u32,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            linear_threshold: 1.0,
            angular_threshold: 0.05,
            frames_to_sleep: 60, // 1 second at 60fps
        }
    }
}

impl SleepConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.linear_threshold >= 0.0) || !(self.angular_threshold >= 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "sleep thresholds must be >= 0",
            });
        }
        Ok(())
    }
}

// ============================================================================
// PGS
// ============================================================================

/// Projected Gauss-Seidel parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PgsConfig {
    /// Iteration cap
    pub max_iterations: usize,
    /// Largest multiplier change that still counts as converged
    pub tolerance: f32,
    /// Sweep sample points from `x` to `p` instead of testing the end pose only
    pub use_ccd: bool,
    /// Extra distance added to the manifold gathering threshold
    pub hull_threshold: f32,
}

impl Default for PgsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-4,
            use_ccd: false,
            hull_threshold: 0.0,
        }
    }
}

impl PgsConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidConfiguration {
                reason: "pgs.max_iterations must be > 0",
            });
        }
        if !(self.tolerance > 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "pgs.tolerance must be > 0",
            });
        }
        if !(self.hull_threshold >= 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "pgs.hull_threshold must be >= 0",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Top-level configuration of one simulation world
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// Gravity acceleration
    pub gravity: Vec3,
    /// Contact margin; `Phi >= thickness` means no contact
    pub thickness: f32,
    /// Velocity passes per step
    pub iterations: usize,
    /// Push-out passes per step
    pub push_out_iterations: usize,
    /// Times each contact is re-resolved inside one push-out pass
    pub push_out_pair_iterations: usize,
    /// Rolling/spinning resistance in the sticking friction branch (0 = off)
    pub angular_friction: f32,
    /// Relative speed below which restitution is ignored, in units of `|g| * dt`
    pub resting_speed_factor: f32,
    /// Freeze bodies of resolved levels during the last push-out pass
    pub use_shock_propagation: bool,
    /// Average penetrating samples in the level-set fallback
    pub use_normal_averaging: bool,
    /// Scale of the velocity term added to the broad-phase margin
    pub velocity_bounds_multiplier: f32,
    /// Contact solver selection
    pub solver: SolverKind,
    /// Spatial index parameters
    pub bvh: BvhConfig,
    /// Sleep thresholds
    pub sleep: SleepConfig,
    /// PGS parameters
    pub pgs: PgsConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, 0.0, -980.0),
            thickness: 0.0,
            iterations: 1,
            push_out_iterations: 5,
            push_out_pair_iterations: 1,
            angular_friction: 0.0,
            resting_speed_factor: 2.0,
            use_shock_propagation: true,
            use_normal_averaging: true,
            velocity_bounds_multiplier: 1.0,
            solver: SolverKind::SequentialImpulse,
            bvh: BvhConfig::default(),
            sleep: SleepConfig::default(),
            pgs: PgsConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Config using the PGS solver
    pub fn pgs() -> Self {
        Self {
            solver: SolverKind::ProjectedGaussSeidel,
            ..Self::default()
        }
    }

    /// Resting-contact speed for a given time step
    #[inline]
    pub fn resting_speed(&self, dt: f32) -> f32 {
        self.resting_speed_factor * self.gravity.length() * dt
    }

    /// Check every parameter
    pub fn validate(&self) -> Result<(), SolverError> {
        if !self.gravity.is_finite() {
            return Err(SolverError::InvalidConfiguration {
                reason: "gravity must be finite",
            });
        }
        if !(self.thickness >= 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "thickness must be >= 0",
            });
        }
        if self.push_out_pair_iterations == 0 {
            return Err(SolverError::InvalidConfiguration {
                reason: "push_out_pair_iterations must be > 0",
            });
        }
        if !(self.angular_friction >= 0.0) || !(self.resting_speed_factor >= 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "friction and resting speed factors must be >= 0",
            });
        }
        if !(self.velocity_bounds_multiplier >= 0.0) {
            return Err(SolverError::InvalidConfiguration {
                reason: "velocity_bounds_multiplier must be >= 0",
            });
        }
        self.bvh.validate()?;
        self.sleep.validate()?;
        self.pgs.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SolverConfig::default().validate().is_ok());
        assert!(SolverConfig::pgs().validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_thickness() {
        let config = SolverConfig {
            thickness: -0.1,
            ..SolverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SolverError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_rejects_nan() {
        let config = SolverConfig {
            thickness: f32::NAN,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err(), "NaN thickness must be rejected");
    }

    #[test]
    fn test_nested_validation() {
        let mut config = SolverConfig::default();
        config.bvh.min_objects = 0;
        assert!(config.validate().is_err());
        let mut config = SolverConfig::default();
        config.pgs.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resting_speed() {
        let config = SolverConfig::default();
        let speed = config.resting_speed(1.0 / 60.0);
        assert!((speed - 2.0 * 980.0 / 60.0).abs() < 1e-3);
    }
}
