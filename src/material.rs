//! Contact Materials with Pair-wise Combine Rules
//!
//! Every body carries a `PhysicsMaterial`; when a contact is created the two
//! materials are combined into the contact's friction and restitution.
//!
//! # Combine Rules
//!
//! - **Average**, **Min**, **Multiply**, **Max**
//! - When the two materials disagree, the rule with the higher priority wins
//!   (`Average < Min < Multiply < Max`)

/// Combine rule for friction/restitution when two materials interact
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CombineRule {
    /// Average of two values
    #[default]
    Average,
    /// Minimum of two values
    Min,
    /// Multiply two values
    Multiply,
    /// Maximum of two values
    Max,
}

impl CombineRule {
    /// Apply the combine rule to two values
    #[inline]
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            CombineRule::Average => (a + b) * 0.5,
            CombineRule::Min => a.min(b),
            CombineRule::Multiply => a * b,
            CombineRule::Max => a.max(b),
        }
    }
}

/// Surface material of a rigid body
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsMaterial {
    /// Coulomb friction coefficient
    pub friction: f32,
    /// Coefficient of restitution (bounciness)
    pub restitution: f32,
    /// Friction combine rule
    pub friction_combine: CombineRule,
    /// Restitution combine rule
    pub restitution_combine: CombineRule,
}

impl PhysicsMaterial {
    /// Create a material with average combine rules
    pub const fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction,
            restitution,
            friction_combine: CombineRule::Average,
            restitution_combine: CombineRule::Average,
        }
    }

    /// Frictionless, perfectly inelastic
    pub const FRICTIONLESS: Self = Self::new(0.0, 0.0);

    /// Set combine rules
    pub fn with_combine_rules(mut self, friction: CombineRule, restitution: CombineRule) -> Self {
        self.friction_combine = friction;
        self.restitution_combine = restitution;
        self
    }

    /// Combine two materials into the coefficients used by one contact
    #[inline]
    pub fn combine(&self, other: &Self) -> CombinedMaterial {
        let friction_rule = self.friction_combine.max(other.friction_combine);
        let restitution_rule = self.restitution_combine.max(other.restitution_combine);
        CombinedMaterial {
            friction: friction_rule.apply(self.friction, other.friction),
            restitution: restitution_rule.apply(self.restitution, other.restitution),
        }
    }
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self::new(0.5, 0.0)
    }
}

/// Combined material result for a contact pair
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CombinedMaterial {
    /// Combined friction
    pub friction: f32,
    /// Combined restitution
    pub restitution: f32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_rules() {
        assert_eq!(CombineRule::Average.apply(0.2, 0.6), 0.4);
        assert_eq!(CombineRule::Min.apply(0.2, 0.6), 0.2);
        assert_eq!(CombineRule::Max.apply(0.2, 0.6), 0.6);
        assert!((CombineRule::Multiply.apply(0.5, 0.6) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_priority_resolution() {
        let ice = PhysicsMaterial::new(0.05, 0.1)
            .with_combine_rules(CombineRule::Min, CombineRule::Average);
        let rubber = PhysicsMaterial::new(0.9, 0.8)
            .with_combine_rules(CombineRule::Average, CombineRule::Max);
        let c = ice.combine(&rubber);
        assert_eq!(c.friction, 0.05, "Min beats Average");
        assert_eq!(c.restitution, 0.8, "Max beats Average");
        assert_eq!(c, rubber.combine(&ice), "combine must be symmetric");
    }

    #[test]
    fn test_default_material() {
        let m = PhysicsMaterial::default();
        assert_eq!(m.restitution, 0.0);
        assert!(m.friction > 0.0);
    }
}
