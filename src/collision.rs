//! Collision Constraint Set
//!
//! Owns the contacts of one world and rebuilds them from the broad phase.
//!
//! # Features
//!
//! - Full rebuild: every dynamic body queries a BVH of all active bodies
//! - Incremental update: newly added bodies query the BVH of the active set
//! - Removal of contacts that reference removed bodies
//! - Per-pair margin widened by the faster body's travel this step, plus the
//!   distance gravity adds over one step (contacts are found before integration)
//!
//! Pair candidates are evaluated in parallel and merged in body order, so the
//! contact list is deterministic with or without the `parallel` feature.

use std::collections::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use crate::bvh::{world_space_boxes, BoundingVolumeHierarchy};
use crate::config::{BvhConfig, SolverConfig};
use crate::contact::RigidBodyContact;
use crate::narrow_phase::{compute_constraint, update_constraint, ContactQuery};
use crate::particles::{Pose, RigidBodies};
use crate::shape::Aabb;

/// Contacts of one world plus the parameters used to build them
#[derive(Clone, Debug)]
pub struct CollisionConstraints {
    constraints: Vec<RigidBodyContact>,
    thickness: f32,
    velocity_bounds_multiplier: f32,
    gravity_speed: f32,
    normal_averaging: bool,
    bvh: BvhConfig,
    last_candidate_count: usize,
}

impl CollisionConstraints {
    /// Empty constraint set using the collision parameters of `config`
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            constraints: Vec::new(),
            thickness: config.thickness,
            velocity_bounds_multiplier: config.velocity_bounds_multiplier,
            gravity_speed: config.gravity.length(),
            normal_averaging: config.use_normal_averaging,
            bvh: config.bvh,
            last_candidate_count: 0,
        }
    }

    /// Current contacts
    #[inline]
    pub fn constraints(&self) -> &[RigidBodyContact] {
        &self.constraints
    }

    /// Current contacts, mutable (solvers write impulses and points back)
    #[inline]
    pub fn constraints_mut(&mut self) -> &mut [RigidBodyContact] {
        &mut self.constraints
    }

    /// Number of contacts
    #[inline]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether there are no contacts
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Drop every contact
    pub fn clear(&mut self) {
        self.constraints.clear();
    }

    /// Contact margin
    #[inline]
    pub fn thickness(&self) -> f32 {
        self.thickness
    }

    /// Broad-phase candidates tested by the last compute/update call
    #[inline]
    pub fn last_candidate_count(&self) -> usize {
        self.last_candidate_count
    }

    /// Narrow-phase parameters at `pose` with the base margin
    #[inline]
    pub fn query(&self, pose: Pose) -> ContactQuery {
        ContactQuery {
            pose,
            thickness: self.thickness,
            normal_averaging: self.normal_averaging,
        }
    }

    /// Re-evaluate one contact at `pose`
    pub fn update_constraint(&self, bodies: &RigidBodies, pose: Pose, contact: &mut RigidBodyContact) {
        update_constraint(bodies, &self.query(pose), contact);
    }

    // ========================================================================
    // Full Rebuild
    // ========================================================================

    /// Rebuild every contact from the start-of-step poses
    ///
    /// Runs [`broad_phase`](Self::broad_phase) followed by
    /// [`narrow_phase`](Self::narrow_phase).
    pub fn compute_constraints(&mut self, bodies: &RigidBodies, dt: f32) {
        let pairs = self.broad_phase(bodies, dt);
        self.narrow_phase(bodies, dt, &pairs);
    }

    /// Candidate pairs `(dynamic, other)` whose velocity-expanded boxes overlap
    ///
    /// Each dynamic body is tested against the BVH hits of its box, or against
    /// everything when it is unbounded. A pair of two dynamic bodies is only
    /// reported from its higher-indexed body, bounded or not. Pairs
    /// come out grouped by body in ascending order.
    pub fn broad_phase(&mut self, bodies: &RigidBodies, dt: f32) -> Vec<(usize, usize)> {
        let active = bodies.active_indices();
        let velocity_dt = dt * self.velocity_bounds_multiplier;
        let settle = self.gravity_travel(dt);
        let mut boxes = world_space_boxes(bodies, &active, Pose::Current, velocity_dt);
        if settle > 0.0 {
            for (_, bounds) in &mut boxes {
                *bounds = bounds.map(|b| b.thicken(settle));
            }
        }
        let hierarchy = BoundingVolumeHierarchy::from_boxes(&boxes, &self.bvh);

        let per_body = |&(body1, box1): &(usize, Option<Aabb>)| -> (usize, Vec<(usize, usize)>) {
            if !bodies.is_dynamic(body1) {
                return (0, Vec::new());
            }
            let candidates = match &box1 {
                Some(query) => hierarchy.find_all_intersections(query),
                None => active.clone(),
            };
            let pairs = candidates
                .iter()
                .filter(|&&body2| !self.should_skip(bodies, &hierarchy, body1, box1.as_ref(), body2))
                .map(|&body2| (body1, body2))
                .collect();
            (candidates.len(), pairs)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<(usize, Vec<(usize, usize)>)> = boxes.par_iter().map(per_body).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<(usize, Vec<(usize, usize)>)> = boxes.iter().map(per_body).collect();

        self.last_candidate_count = 0;
        let mut pairs = Vec::new();
        for (candidates, found) in results {
            self.last_candidate_count += candidates;
            pairs.extend(found);
        }
        debug!(
            bodies = active.len(),
            candidates = self.last_candidate_count,
            pairs = pairs.len(),
            "broad phase"
        );
        pairs
    }

    /// Replace the contact list with the touching pairs among `pairs`
    ///
    /// Contact order follows pair order.
    pub fn narrow_phase(&mut self, bodies: &RigidBodies, dt: f32, pairs: &[(usize, usize)]) {
        let test = |&(body1, body2): &(usize, usize)| self.test_pair(bodies, body1, body2, dt);

        #[cfg(feature = "parallel")]
        let found: Vec<Option<RigidBodyContact>> = pairs.par_iter().map(test).collect();
        #[cfg(not(feature = "parallel"))]
        let found: Vec<Option<RigidBodyContact>> = pairs.iter().map(test).collect();

        self.constraints.clear();
        self.constraints.extend(found.into_iter().flatten());
        debug!(
            pairs = pairs.len(),
            contacts = self.constraints.len(),
            "narrow phase"
        );
    }

    /// Distance gravity adds to a body's fall over one step
    #[inline]
    fn gravity_travel(&self, dt: f32) -> f32 {
        self.gravity_speed * dt * dt
    }

    fn should_skip(
        &self,
        bodies: &RigidBodies,
        hierarchy: &BoundingVolumeHierarchy,
        body1: usize,
        box1: Option<&Aabb>,
        body2: usize,
    ) -> bool {
        if body2 == body1 || bodies.disabled[body2] {
            return true;
        }
        let box2 = hierarchy.world_space_bounding_box(body2);
        // dynamic pairs are visited from both ends; keep the higher-indexed one
        if bodies.is_dynamic(body2) && body2 > body1 {
            return true;
        }
        match (box1, box2) {
            (Some(a), Some(b)) => !a.intersects(b),
            _ => false,
        }
    }

    /// Narrow phase for one candidate pair with a velocity-widened margin
    fn test_pair(&self, bodies: &RigidBodies, body1: usize, body2: usize, dt: f32) -> Option<RigidBodyContact> {
        let travel = (bodies.v[body1].length() * dt).max(bodies.v[body2].length() * dt) + self.gravity_travel(dt);
        let query = ContactQuery {
            pose: Pose::Current,
            thickness: self.thickness + travel,
            normal_averaging: self.normal_averaging,
        };
        let mut contact = compute_constraint(bodies, body1, body2);
        update_constraint(bodies, &query, &mut contact);
        contact.is_touching(query.thickness).then_some(contact)
    }

    // ========================================================================
    // Incremental Maintenance
    // ========================================================================

    /// Drop contacts touching any body in `removed`
    pub fn remove_constraints(&mut self, removed: &HashSet<usize>) {
        let before = self.constraints.len();
        self.constraints
            .retain(|c| !removed.contains(&c.body_a) && !removed.contains(&c.body_b));
        debug!(removed = before - self.constraints.len(), "removed collision constraints");
    }

    /// Add contacts for bodies that just joined the simulation
    ///
    /// Each added body queries a BVH of `active` (plus the other added
    /// bodies). Pairs of dynamic bodies in different islands are left to the
    /// next full rebuild, and a pair is only ever added once.
    pub fn update_constraints(&mut self, bodies: &RigidBodies, dt: f32, added: &[usize], active: &[usize]) {
        let mut pool: Vec<usize> = active.iter().chain(added).copied().collect();
        pool.sort_unstable();
        pool.dedup();
        pool.retain(|&i| !bodies.disabled[i]);

        let velocity_dt = dt * self.velocity_bounds_multiplier;
        let boxes = world_space_boxes(bodies, &pool, Pose::Current, velocity_dt);
        let hierarchy = BoundingVolumeHierarchy::from_boxes(&boxes, &self.bvh);

        let mut seen: HashSet<(usize, usize)> = self.constraints.iter().map(RigidBodyContact::pair_key).collect();
        let mut candidates_tested = 0;
        let before = self.constraints.len();
        for &body1 in added {
            if bodies.disabled[body1] {
                continue;
            }
            let candidates = match hierarchy.world_space_bounding_box(body1) {
                Some(query) => hierarchy.find_all_intersections(query),
                None => pool.clone(),
            };
            candidates_tested += candidates.len();
            for body2 in candidates {
                if body2 == body1 || !(bodies.is_dynamic(body1) || bodies.is_dynamic(body2)) {
                    continue;
                }
                if bodies.is_dynamic(body1)
                    && bodies.is_dynamic(body2)
                    && bodies.island[body1] != bodies.island[body2]
                    && bodies.island[body1] >= 0
                    && bodies.island[body2] >= 0
                {
                    continue;
                }
                let key = (body1.min(body2), body1.max(body2));
                if !seen.insert(key) {
                    continue;
                }
                let (dynamic, other) = if bodies.is_dynamic(body1) { (body1, body2) } else { (body2, body1) };
                if let Some(contact) = self.test_pair(bodies, dynamic, other, dt) {
                    self.constraints.push(contact);
                }
            }
        }
        self.last_candidate_count = candidates_tested;
        debug!(
            added = added.len(),
            new_contacts = self.constraints.len() - before,
            "updated collision constraints"
        );
    }

    /// Copy of the current contacts
    pub fn copy_out(&self) -> Vec<RigidBodyContact> {
        self.constraints.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
