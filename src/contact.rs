//! Rigid Body Contacts
//!
//! A contact joins two bodies (`body_a`, `body_b`) and records the deepest
//! point found by the narrow phase. The PGS solver additionally keeps a
//! multi-point manifold.
//!
//! # Conventions
//!
//! - `normal` points from `body_b` toward `body_a`
//! - `phi` is the signed separation (negative = penetrating)
//! - `phi >= thickness` means "no contact"
//!
//! Contacts are rebuilt every step; nothing is warm-started.

use crate::math::Vec3;

/// One contact point of a manifold
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ManifoldPoint {
    /// World-space location
    pub location: Vec3,
    /// World-space normal (from B toward A)
    pub normal: Vec3,
    /// Signed separation
    pub phi: f32,
}

impl ManifoldPoint {
    /// Empty point: nothing deeper than `thickness` found yet
    #[inline]
    pub fn empty(thickness: f32) -> Self {
        Self {
            location: Vec3::ZERO,
            normal: Vec3::UNIT_Z,
            phi: thickness,
        }
    }

    /// Keep `other` if it is deeper
    #[inline]
    pub fn keep_deeper(&mut self, other: ManifoldPoint) -> bool {
        if other.phi < self.phi {
            *self = other;
            true
        } else {
            false
        }
    }

    /// Same point seen from the other body
    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            ..self
        }
    }
}

/// Contact constraint between two bodies
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBodyContact {
    /// Sampled / first body
    pub body_a: usize,
    /// Level-set / second body
    pub body_b: usize,
    /// Contact normal (from B toward A)
    pub normal: Vec3,
    /// Contact location
    pub location: Vec3,
    /// Signed separation
    pub phi: f32,
    /// Combined friction coefficient
    pub friction: f32,
    /// Combined restitution
    pub restitution: f32,
    /// Impulse applied to `body_a` this step (velocity and push-out passes)
    pub accumulated_impulse: Vec3,
    /// Extra points for the PGS solver
    pub manifold: Vec<ManifoldPoint>,
}

impl RigidBodyContact {
    /// Contact between two bodies with nothing found yet
    pub fn new(body_a: usize, body_b: usize) -> Self {
        debug_assert_ne!(body_a, body_b, "a body cannot contact itself");
        Self {
            body_a,
            body_b,
            normal: Vec3::UNIT_Z,
            location: Vec3::ZERO,
            phi: f32::MAX,
            friction: 0.0,
            restitution: 0.0,
            accumulated_impulse: Vec3::ZERO,
            manifold: Vec::new(),
        }
    }

    /// Deepest point as a manifold point
    #[inline]
    pub fn point(&self) -> ManifoldPoint {
        ManifoldPoint {
            location: self.location,
            normal: self.normal,
            phi: self.phi,
        }
    }

    /// Overwrite the deepest point
    #[inline]
    pub fn set_point(&mut self, point: ManifoldPoint) {
        self.location = point.location;
        self.normal = point.normal;
        self.phi = point.phi;
    }

    /// Penetrating deeper than the margin
    #[inline]
    pub fn is_touching(&self, thickness: f32) -> bool {
        self.phi < thickness
    }

    /// Whether the contact references `body`
    #[inline]
    pub fn involves(&self, body: usize) -> bool {
        self.body_a == body || self.body_b == body
    }

    /// The body on the other side of `body`
    #[inline]
    pub fn other(&self, body: usize) -> usize {
        if self.body_a == body {
            self.body_b
        } else {
            self.body_a
        }
    }

    /// Unordered body pair, smaller index first
    #[inline]
    pub fn pair_key(&self) -> (usize, usize) {
        (self.body_a.min(self.body_b), self.body_a.max(self.body_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_deeper() {
        let mut p = ManifoldPoint::empty(0.0);
        assert!(!p.keep_deeper(ManifoldPoint { phi: 0.5, ..p }), "shallower points are ignored");
        assert!(p.keep_deeper(ManifoldPoint { phi: -0.2, ..p }));
        assert_eq!(p.phi, -0.2);
    }

    #[test]
    fn test_contact_helpers() {
        let mut c = RigidBodyContact::new(4, 1);
        assert!(!c.is_touching(0.0), "fresh contact is not touching");
        c.set_point(ManifoldPoint {
            location: Vec3::ONE,
            normal: Vec3::UNIT_X,
            phi: -0.1,
        });
        assert!(c.is_touching(0.0));
        assert_eq!(c.other(4), 1);
        assert_eq!(c.pair_key(), (1, 4));
        assert!(c.involves(1) && !c.involves(2));
        assert_eq!(c.point().flipped().normal, -Vec3::UNIT_X);
    }
}
