//! Rigid Body Store
//!
//! Structure-of-arrays storage for every simulated body. Each field is a
//! parallel `Vec` indexed by body id, so solver passes touch only the
//! columns they need.
//!
//! # Poses
//!
//! - `x` / `q`: the committed transform at the start of the step
//! - `p` / `q_pred`: the predicted transform the solvers correct
//!
//! Bodies with `inv_m == 0` (static or kinematic) have infinite mass and are
//! never moved by the solver; their pose is written by the host.

use std::borrow::Cow;

use crate::error::SolverError;
use crate::material::PhysicsMaterial;
use crate::math::{Mat3, Quat, Transform, Vec3};
use crate::shape::{Aabb, Shape, ShapeHandle};

/// Sentinel island id for bodies that take part in no island
pub const INVALID_ISLAND: i32 = -1;

/// Which transform of a body a query should read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pose {
    /// `x`, `q`
    Current,
    /// `p`, `q_pred`
    Predicted,
}

// ============================================================================
// Mass Properties
// ============================================================================

/// Inertia tensor of a solid shape with the given mass
///
/// Spheres and boxes are exact; other shapes use their local bounding box.
pub fn inertia_for(shape: &Shape, mass: f32) -> Mat3 {
    let box_inertia = |e: Vec3| {
        let f = mass / 12.0;
        Mat3::diagonal(
            f * (e.y * e.y + e.z * e.z),
            f * (e.x * e.x + e.z * e.z),
            f * (e.x * e.x + e.y * e.y),
        )
    };
    match shape {
        Shape::Sphere(s) => {
            let i = 0.4 * mass * s.radius * s.radius;
            Mat3::diagonal(i, i, i)
        }
        Shape::Box(b) => box_inertia(b.extents()),
        _ => match shape.bounding_box() {
            Some(b) => box_inertia(b.extents()),
            None => Mat3::diagonal(mass, mass, mass),
        },
    }
}

// ============================================================================
// Body Description
// ============================================================================

/// Everything needed to add one body to a [`RigidBodies`] store
#[derive(Clone, Debug)]
pub struct BodyDesc {
    /// Collision geometry
    pub shape: ShapeHandle,
    /// Initial position
    pub position: Vec3,
    /// Initial rotation
    pub rotation: Quat,
    /// Initial linear velocity
    pub velocity: Vec3,
    /// Initial angular velocity
    pub angular_velocity: Vec3,
    /// Mass (`f32::INFINITY` for static and kinematic bodies)
    pub mass: f32,
    /// Local inertia override
    pub inertia: Option<Mat3>,
    /// Surface material
    pub material: PhysicsMaterial,
    /// Explicit surface samples for level-set collision
    pub collision_particles: Option<Vec<Vec3>>,
}

impl BodyDesc {
    /// Dynamic body with finite mass
    pub fn new_dynamic(shape: ShapeHandle, position: Vec3, mass: f32) -> Self {
        Self {
            shape,
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass,
            inertia: None,
            material: PhysicsMaterial::default(),
            collision_particles: None,
        }
    }

    /// Immovable body (infinite mass)
    pub fn new_static(shape: ShapeHandle, position: Vec3) -> Self {
        Self::new_dynamic(shape, position, f32::INFINITY)
    }

    /// Set rotation
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation.normalize();
        self
    }

    /// Set linear velocity (kinematic bodies keep it as their driven velocity)
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set angular velocity
    pub fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    /// Set material
    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = material;
        self
    }

    /// Override the local inertia tensor
    pub fn with_inertia(mut self, inertia: Mat3) -> Self {
        self.inertia = Some(inertia);
        self
    }

    /// Provide explicit collision samples (local space)
    pub fn with_collision_particles(mut self, points: Vec<Vec3>) -> Self {
        self.collision_particles = Some(points);
        self
    }
}

// ============================================================================
// Rigid Body Store
// ============================================================================

/// Structure-of-arrays rigid body storage
#[derive(Clone, Debug, Default)]
pub struct RigidBodies {
    /// Position
    pub x: Vec<Vec3>,
    /// Rotation
    pub q: Vec<Quat>,
    /// Predicted position
    pub p: Vec<Vec3>,
    /// Predicted rotation
    pub q_pred: Vec<Quat>,
    /// Linear velocity
    pub v: Vec<Vec3>,
    /// Angular velocity
    pub w: Vec<Vec3>,
    /// Accumulated external force (cleared every step)
    pub force: Vec<Vec3>,
    /// Accumulated external torque (cleared every step)
    pub torque: Vec<Vec3>,
    /// Mass
    pub m: Vec<f32>,
    /// Inverse mass (0 = static/kinematic)
    pub inv_m: Vec<f32>,
    /// Local inertia tensor
    pub inertia: Vec<Mat3>,
    /// Local inverse inertia tensor
    pub inv_inertia: Vec<Mat3>,
    /// Shared geometry
    pub shape: Vec<ShapeHandle>,
    /// Optional explicit collision samples
    pub collision_particles: Vec<Option<Vec<Vec3>>>,
    /// Surface material
    pub material: Vec<PhysicsMaterial>,
    /// Removed from simulation
    pub disabled: Vec<bool>,
    /// Asleep (island-wide)
    pub sleeping: Vec<bool>,
    /// Island id or [`INVALID_ISLAND`]
    pub island: Vec<i32>,
    /// Touched by a contact during the last solve
    pub collided: Vec<bool>,
}

impl RigidBodies {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bodies (including disabled ones)
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// True when no body was ever added
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Append a body, returning its index
    pub fn add(&mut self, desc: BodyDesc) -> usize {
        let index = self.len();
        let dynamic = desc.mass.is_finite() && desc.mass > 0.0;
        let (m, inv_m) = if dynamic {
            (desc.mass, 1.0 / desc.mass)
        } else {
            (f32::INFINITY, 0.0)
        };
        let (inertia, inv_inertia) = if dynamic {
            let inertia = desc.inertia.unwrap_or_else(|| inertia_for(&desc.shape, m));
            (inertia, inertia.inverse().unwrap_or(Mat3::ZERO))
        } else {
            (Mat3::ZERO, Mat3::ZERO)
        };

        self.x.push(desc.position);
        self.q.push(desc.rotation);
        self.p.push(desc.position);
        self.q_pred.push(desc.rotation);
        self.v.push(desc.velocity);
        self.w.push(desc.angular_velocity);
        self.force.push(Vec3::ZERO);
        self.torque.push(Vec3::ZERO);
        self.m.push(m);
        self.inv_m.push(inv_m);
        self.inertia.push(inertia);
        self.inv_inertia.push(inv_inertia);
        self.shape.push(desc.shape);
        self.collision_particles.push(desc.collision_particles);
        self.material.push(desc.material);
        self.disabled.push(false);
        self.sleeping.push(false);
        self.island.push(INVALID_ISLAND);
        self.collided.push(false);
        index
    }

    /// Validate a body index
    #[inline]
    pub fn check_index(&self, index: usize) -> Result<(), SolverError> {
        if index < self.len() {
            Ok(())
        } else {
            Err(SolverError::InvalidBodyIndex {
                index,
                count: self.len(),
            })
        }
    }

    /// Finite mass
    #[inline]
    pub fn is_dynamic(&self, index: usize) -> bool {
        self.inv_m[index] > 0.0
    }

    /// Indices of bodies that are not disabled
    pub fn active_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.disabled[i]).collect()
    }

    /// Transform of a body at the requested pose
    #[inline]
    pub fn transform(&self, index: usize, pose: Pose) -> Transform {
        match pose {
            Pose::Current => Transform::new(self.x[index], self.q[index]),
            Pose::Predicted => Transform::new(self.p[index], self.q_pred[index]),
        }
    }

    /// Position at the requested pose
    #[inline]
    pub fn position(&self, index: usize, pose: Pose) -> Vec3 {
        match pose {
            Pose::Current => self.x[index],
            Pose::Predicted => self.p[index],
        }
    }

    /// World-space inverse inertia `R * I^-1 * R^T`
    #[inline]
    pub fn world_inv_inertia(&self, index: usize, pose: Pose) -> Mat3 {
        let rotation = match pose {
            Pose::Current => self.q[index],
            Pose::Predicted => self.q_pred[index],
        };
        self.inv_inertia[index].rotated(rotation)
    }

    /// World-space inertia `R * I * R^T`
    #[inline]
    pub fn world_inertia(&self, index: usize, pose: Pose) -> Mat3 {
        let rotation = match pose {
            Pose::Current => self.q[index],
            Pose::Predicted => self.q_pred[index],
        };
        self.inertia[index].rotated(rotation)
    }

    /// World bounds at the requested pose, `None` for unbounded shapes
    #[inline]
    pub fn world_bounds(&self, index: usize, pose: Pose) -> Option<Aabb> {
        let tm = self.transform(index, pose);
        self.shape[index].bounding_box().map(|b| b.transformed(&tm))
    }

    /// Local sample points used by level-set collision
    pub fn sample_points(&self, index: usize) -> Cow<'_, [Vec3]> {
        match &self.collision_particles[index] {
            Some(points) => Cow::Borrowed(points.as_slice()),
            None => Cow::Owned(self.shape[index].sample_points()),
        }
    }

    /// Accumulate an external force (wakes the body's island on the next step)
    #[inline]
    pub fn apply_force(&mut self, index: usize, force: Vec3) {
        self.force[index] += force;
    }

    /// Accumulate an external torque
    #[inline]
    pub fn apply_torque(&mut self, index: usize, torque: Vec3) {
        self.torque[index] += torque;
    }

    /// Whether an external force or torque is pending
    #[inline]
    pub fn has_external_load(&self, index: usize) -> bool {
        self.force[index] != Vec3::ZERO || self.torque[index] != Vec3::ZERO
    }

    /// Kinetic energy of one body
    pub fn kinetic_energy(&self, index: usize) -> f32 {
        if !self.is_dynamic(index) {
            return 0.0;
        }
        let iw = self.world_inertia(index, Pose::Current).mul_vec(self.w[index]);
        0.5 * (self.m[index] * self.v[index].length_squared() + self.w[index].dot(iw))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dynamic_and_static() {
        let mut bodies = RigidBodies::new();
        let a = bodies.add(BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::ZERO, 2.0));
        let b = bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
        assert_eq!((a, b), (0, 1));
        assert!(bodies.is_dynamic(a));
        assert!(!bodies.is_dynamic(b));
        assert_eq!(bodies.inv_m[a], 0.5);
        assert!(bodies.m[b].is_infinite(), "static bodies have infinite mass");
        assert_eq!(bodies.inv_inertia[b], Mat3::ZERO);
        assert_eq!(bodies.island[a], INVALID_ISLAND);
    }

    #[test]
    fn test_sphere_inertia() {
        let i = inertia_for(&Shape::Sphere(crate::shape::Sphere::new(Vec3::ZERO, 2.0)), 5.0);
        assert!((i.m[0][0] - 8.0).abs() < 1e-5, "2/5 * 5 * 4 = 8");
    }

    #[test]
    fn test_box_inertia_unit_cube() {
        let i = inertia_for(&Shape::Box(Aabb::from_center_half(Vec3::ZERO, Vec3::splat(0.5))), 12.0);
        assert!((i.m[1][1] - 2.0).abs() < 1e-5, "m/12 * (1 + 1) = 2");
    }

    #[test]
    fn test_check_index() {
        let mut bodies = RigidBodies::new();
        bodies.add(BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::ZERO, 1.0));
        assert!(bodies.check_index(0).is_ok());
        assert_eq!(
            bodies.check_index(3),
            Err(SolverError::InvalidBodyIndex { index: 3, count: 1 })
        );
    }

    #[test]
    fn test_world_bounds_follow_pose() {
        let mut bodies = RigidBodies::new();
        let i = bodies.add(BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::ZERO, 1.0));
        bodies.p[i] = Vec3::new(5.0, 0.0, 0.0);
        let current = bodies.world_bounds(i, Pose::Current).expect("bounded");
        let predicted = bodies.world_bounds(i, Pose::Predicted).expect("bounded");
        assert_eq!(current.center(), Vec3::ZERO);
        assert_eq!(predicted.center(), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_sample_points_override() {
        let mut bodies = RigidBodies::new();
        let i = bodies.add(
            BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::ZERO, 1.0)
                .with_collision_particles(vec![Vec3::UNIT_X]),
        );
        let j = bodies.add(BodyDesc::new_dynamic(Shape::sphere(1.0), Vec3::ZERO, 1.0));
        assert_eq!(bodies.sample_points(i).len(), 1);
        assert_eq!(bodies.sample_points(j).len(), 26);
    }
}
