//! Solver Error Types
//!
//! Host-facing operations that can fail (configuration validation, body
//! lookup, shape construction) return `Result<T, SolverError>`. The solving
//! hot path never returns errors: degenerate geometry and non-convergence are
//! recovered locally.

use core::fmt;

/// Unified error type for solver operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolverError {
    /// Body index is out of range.
    InvalidBodyIndex {
        /// The invalid index that was provided
        index: usize,
        /// Current number of bodies
        count: usize,
    },
    /// Invalid configuration parameter.
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
    /// Geometry that cannot be turned into a usable shape.
    DegenerateGeometry {
        /// Where the degenerate input was encountered
        context: &'static str,
    },
    /// A capacity limit was exceeded.
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was exceeded
        limit: usize,
    },
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBodyIndex { index, count } => {
                write!(f, "body index {index} out of range (count={count})")
            }
            Self::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::DegenerateGeometry { context } => {
                write!(f, "degenerate geometry in {context}")
            }
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "{resource} capacity exceeded (limit={limit})")
            }
        }
    }
}

impl std::error::Error for SolverError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SolverError::InvalidBodyIndex { index: 5, count: 3 };
        let s = format!("{}", e);
        assert!(s.contains('5'), "Should contain index");
        assert!(s.contains('3'), "Should contain count");
    }

    #[test]
    fn test_degenerate_geometry() {
        let e = SolverError::DegenerateGeometry {
            context: "convex hull",
        };
        assert_eq!(format!("{e}"), "degenerate geometry in convex hull");
    }

    #[test]
    fn test_capacity_exceeded() {
        let e = SolverError::CapacityExceeded {
            resource: "level set cells",
            limit: 1 << 24,
        };
        let s = format!("{}", e);
        assert!(s.contains("level set cells"));
        assert!(s.contains("16777216"));
    }

    #[test]
    fn test_error_is_std_error() {
        fn takes_error(_: &dyn std::error::Error) {}
        takes_error(&SolverError::InvalidConfiguration {
            reason: "thickness must be >= 0",
        });
    }
}
