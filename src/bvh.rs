//! Bounding Volume Hierarchy for Broad-Phase Queries
//!
//! Top-down space partitioning over world-space bounding boxes.
//!
//! # Features
//!
//! - Binary splits along the longest axis, switching to 8-way (octal) splits
//!   when a node is roughly cubic and densely populated
//! - Objects straddling a split plane are stored in every child they touch
//! - Unbounded objects (planes) live in a flat "global objects" list that every
//!   query returns
//! - Leaf hits are re-validated against the true object box, so queries never
//!   report false positives
//! - Arena node storage: nodes refer to children by index

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::BvhConfig;
use crate::math::Vec3;
use crate::particles::{Pose, RigidBodies};
use crate::shape::Aabb;

/// Split-axis marker of an octal node
pub const OCTAL_SPLIT: i32 = -1;

/// Extents within this ratio of each other count as "comparable"
const CUBIC_RATIO: f32 = 1.25;

// ============================================================================
// World-Space Boxes
// ============================================================================

/// World-space boxes of the given bodies at `pose`
///
/// Boxes of moving bodies are thickened symmetrically by `|v| * velocity_dt`
/// so fast bodies find their partners for the whole step. Unbounded shapes
/// yield `None`.
pub fn world_space_boxes(
    bodies: &RigidBodies,
    indices: &[usize],
    pose: Pose,
    velocity_dt: f32,
) -> Vec<(usize, Option<Aabb>)> {
    let compute = |&i: &usize| {
        let bounds = bodies.world_bounds(i, pose).map(|b| {
            if velocity_dt > 0.0 {
                b.thicken_vec((bodies.v[i] * velocity_dt).abs())
            } else {
                b
            }
        });
        (i, bounds)
    };

    #[cfg(feature = "parallel")]
    {
        indices.par_iter().map(compute).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        indices.iter().map(compute).collect()
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// One node of the hierarchy
#[derive(Clone, Debug)]
pub struct BvhNode {
    /// Region covered by this node
    pub bounds: Aabb,
    /// Split axis (0..3), [`OCTAL_SPLIT`], or unused for leaves
    pub axis: i32,
    /// Child node indices (empty for leaves)
    pub children: Vec<usize>,
    /// Object indices (leaves only)
    pub objects: Vec<usize>,
}

impl BvhNode {
    /// Leaf check
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// BVH statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BvhStats {
    /// Total number of nodes
    pub node_count: usize,
    /// Number of leaf nodes
    pub leaf_count: usize,
    /// Number of internal nodes
    pub internal_count: usize,
    /// Number of octal internal nodes
    pub octal_count: usize,
    /// Number of bounded objects
    pub object_count: usize,
    /// Number of unbounded objects
    pub global_count: usize,
    /// Maximum objects in any leaf
    pub max_leaf_objects: usize,
    /// Deepest level reached
    pub depth: usize,
}

// ============================================================================
// Hierarchy
// ============================================================================

/// Bounding volume hierarchy over object boxes
#[derive(Clone, Debug, Default)]
pub struct BoundingVolumeHierarchy {
    nodes: Vec<BvhNode>,
    /// Object box by object index (`None` for absent or unbounded objects)
    boxes: Vec<Option<Aabb>>,
    global_objects: Vec<usize>,
    objects: Vec<usize>,
    depth: usize,
}

impl BoundingVolumeHierarchy {
    /// Build over the world boxes of `indices` at `pose`
    pub fn build(
        bodies: &RigidBodies,
        indices: &[usize],
        pose: Pose,
        velocity_dt: f32,
        config: &BvhConfig,
    ) -> Self {
        Self::from_boxes(&world_space_boxes(bodies, indices, pose, velocity_dt), config)
    }

    /// Build over explicit `(object, box)` entries; `None` marks an unbounded object
    pub fn from_boxes(entries: &[(usize, Option<Aabb>)], config: &BvhConfig) -> Self {
        let size = entries.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        let mut tree = Self {
            nodes: Vec::new(),
            boxes: vec![None; size],
            global_objects: Vec::new(),
            objects: Vec::new(),
            depth: 0,
        };

        let mut bounded = Vec::with_capacity(entries.len());
        let mut root_bounds: Option<Aabb> = None;
        for &(index, bounds) in entries {
            match bounds {
                Some(b) => {
                    tree.boxes[index] = Some(b);
                    bounded.push(index);
                    root_bounds = Some(root_bounds.map_or(b, |r| r.union(&b)));
                }
                None => tree.global_objects.push(index),
            }
        }
        tree.objects = bounded.clone();

        if let Some(bounds) = root_bounds {
            tree.build_node(bounded, bounds, 0, config);
        }
        tree
    }

    fn build_node(&mut self, objects: Vec<usize>, bounds: Aabb, level: usize, config: &BvhConfig) -> usize {
        let index = self.nodes.len();
        self.depth = self.depth.max(level);
        self.nodes.push(BvhNode {
            bounds,
            axis: 0,
            children: Vec::new(),
            objects: Vec::new(),
        });

        if objects.len() <= config.min_objects || level >= config.max_levels {
            self.nodes[index].objects = objects;
            return index;
        }

        let extents = bounds.extents();
        let comparable = extents.max_element() <= CUBIC_RATIO * extents.min_element();
        let (axis, child_bounds) = if comparable && objects.len() > 4 * config.min_objects {
            (OCTAL_SPLIT, octants(&bounds))
        } else {
            let axis = extents.max_axis();
            let mid = bounds.center()[axis];
            let lower = Aabb::new(bounds.min, bounds.max.with_axis(axis, mid));
            let upper = Aabb::new(bounds.min.with_axis(axis, mid), bounds.max);
            (axis as i32, vec![lower, upper])
        };

        let partitions: Vec<Vec<usize>> = child_bounds
            .iter()
            .enumerate()
            .map(|(c, child)| {
                objects
                    .iter()
                    .copied()
                    .filter(|&o| self.belongs(o, axis, c, child))
                    .collect()
            })
            .collect();

        // Every object straddles every split: splitting would only duplicate work
        if partitions.iter().all(|p| p.len() == objects.len()) {
            self.nodes[index].objects = objects;
            return index;
        }

        let mut children = Vec::with_capacity(partitions.len());
        for (part, child) in partitions.into_iter().zip(child_bounds) {
            if !part.is_empty() {
                children.push(self.build_node(part, child, level + 1, config));
            }
        }
        let node = &mut self.nodes[index];
        node.axis = axis;
        node.children = children;
        index
    }

    /// Partition rule: min child if the box starts below the plane, max child
    /// if it ends at or above it. Octal children use plain overlap.
    #[inline]
    fn belongs(&self, object: usize, axis: i32, child: usize, child_bounds: &Aabb) -> bool {
        let Some(b) = self.boxes[object] else {
            return false;
        };
        if axis == OCTAL_SPLIT {
            return b.intersects(child_bounds);
        }
        let axis = axis as usize;
        if child == 0 {
            b.min[axis] < child_bounds.max[axis]
        } else {
            b.max[axis] >= child_bounds.min[axis]
        }
    }

    /// True when nothing was inserted
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.global_objects.is_empty()
    }

    /// Root node, `None` for a tree without bounded objects
    #[inline]
    pub fn root(&self) -> Option<&BvhNode> {
        self.nodes.first()
    }

    /// Node arena
    #[inline]
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Unbounded objects
    #[inline]
    pub fn global_objects(&self) -> &[usize] {
        &self.global_objects
    }

    /// Every bounded object in insertion order
    #[inline]
    pub fn bounded_objects(&self) -> &[usize] {
        &self.objects
    }

    /// Stored box of an object
    #[inline]
    pub fn world_space_bounding_box(&self, object: usize) -> Option<&Aabb> {
        self.boxes.get(object).and_then(Option::as_ref)
    }

    /// Bounded objects whose box intersects `query` (sorted, unique)
    pub fn query_box(&self, query: &Aabb) -> Vec<usize> {
        self.collect(|node| node.bounds.intersects(query), |b| b.intersects(query))
    }

    /// Bounded objects whose box contains `point` (sorted, unique)
    pub fn query_point(&self, point: Vec3) -> Vec<usize> {
        self.collect(|node| node.bounds.contains(point), |b| b.contains(point))
    }

    /// Broad-phase candidates for `query`: box hits followed by every global object
    pub fn find_all_intersections(&self, query: &Aabb) -> Vec<usize> {
        let mut out = self.query_box(query);
        out.extend_from_slice(&self.global_objects);
        out
    }

    fn collect(&self, visit: impl Fn(&BvhNode) -> bool, keep: impl Fn(&Aabb) -> bool) -> Vec<usize> {
        let mut result = Vec::new();
        if self.nodes.is_empty() {
            return result;
        }
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !visit(node) {
                continue;
            }
            if node.is_leaf() {
                result.extend(
                    node.objects
                        .iter()
                        .copied()
                        .filter(|&o| self.boxes[o].as_ref().is_some_and(&keep)),
                );
            } else {
                stack.extend_from_slice(&node.children);
            }
        }
        // Straddling objects appear in several leaves
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Get statistics about the BVH
    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats {
            node_count: self.nodes.len(),
            object_count: self.objects.len(),
            global_count: self.global_objects.len(),
            depth: self.depth,
            ..BvhStats::default()
        };
        for node in &self.nodes {
            if node.is_leaf() {
                stats.leaf_count += 1;
                stats.max_leaf_objects = stats.max_leaf_objects.max(node.objects.len());
            } else {
                stats.internal_count += 1;
                if node.axis == OCTAL_SPLIT {
                    stats.octal_count += 1;
                }
            }
        }
        stats
    }
}

fn octants(bounds: &Aabb) -> Vec<Aabb> {
    let c = bounds.center();
    (0..8)
        .map(|i| {
            let pick = |bit: usize, axis: usize| {
                if i & bit == 0 {
                    (bounds.min[axis], c[axis])
                } else {
                    (c[axis], bounds.max[axis])
                }
            };
            let (x0, x1) = pick(1, 0);
            let (y0, y1) = pick(2, 1);
            let (z0, z1) = pick(4, 2);
            Aabb::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::BodyDesc;
    use crate::shape::Shape;

    fn unit_box(center: Vec3) -> Aabb {
        Aabb::from_center_half(center, Vec3::splat(0.5))
    }

    fn grid_entries(n: usize) -> Vec<(usize, Option<Aabb>)> {
        let mut entries = Vec::new();
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    let c = Vec3::new(x as f32 * 2.0, y as f32 * 2.0, z as f32 * 2.0);
                    entries.push((entries.len(), Some(unit_box(c))));
                }
            }
        }
        entries
    }

    #[test]
    fn test_empty_tree() {
        let tree = BoundingVolumeHierarchy::from_boxes(&[], &BvhConfig::default());
        assert!(tree.root().is_none(), "empty input has no root");
        assert!(tree.is_empty());
        assert!(tree.query_box(&unit_box(Vec3::ZERO)).is_empty());
    }

    #[test]
    fn test_small_tree_is_single_leaf() {
        let entries: Vec<_> = (0..5).map(|i| (i, Some(unit_box(Vec3::new(i as f32 * 3.0, 0.0, 0.0))))).collect();
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &BvhConfig::default());
        let stats = tree.stats();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.max_leaf_objects, 5);
    }

    #[test]
    fn test_axis_split_on_elongated_set() {
        let entries: Vec<_> = (0..20).map(|i| (i, Some(unit_box(Vec3::new(i as f32 * 3.0, 0.0, 0.0))))).collect();
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &BvhConfig::default());
        let root = tree.root().expect("root");
        assert_eq!(root.axis, 0, "longest axis is x");
        assert_eq!(tree.stats().octal_count, 0);
    }

    #[test]
    fn test_octal_split_on_cubic_set() {
        let tree = BoundingVolumeHierarchy::from_boxes(&grid_entries(4), &BvhConfig::default());
        let root = tree.root().expect("root");
        assert_eq!(root.axis, OCTAL_SPLIT, "64 objects in a cube should split 8 ways");
        assert_eq!(root.children.len(), 8);
    }

    #[test]
    fn test_query_matches_brute_force() {
        let entries = grid_entries(4);
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &BvhConfig::default());
        let query = Aabb::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.2, 2.6, 4.1));
        let mut expected: Vec<usize> = entries
            .iter()
            .filter(|(_, b)| b.is_some_and(|b| b.intersects(&query)))
            .map(|(i, _)| *i)
            .collect();
        expected.sort_unstable();
        assert_eq!(tree.query_box(&query), expected);
    }

    #[test]
    fn test_query_point() {
        let tree = BoundingVolumeHierarchy::from_boxes(&grid_entries(3), &BvhConfig::default());
        let hits = tree.query_point(Vec3::new(2.1, 0.0, 0.0));
        assert_eq!(hits.len(), 1);
        assert!(tree.query_point(Vec3::new(1.0, 1.0, 1.0)).is_empty(), "gap between boxes");
    }

    #[test]
    fn test_global_objects() {
        let entries = vec![(0, Some(unit_box(Vec3::ZERO))), (1, None)];
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &BvhConfig::default());
        assert_eq!(tree.global_objects(), &[1]);
        let far = unit_box(Vec3::splat(100.0));
        assert_eq!(tree.find_all_intersections(&far), vec![1], "globals are always candidates");
    }

    #[test]
    fn test_max_levels_respected() {
        // Identical boxes can never be separated
        let entries: Vec<_> = (0..50).map(|i| (i, Some(unit_box(Vec3::ZERO)))).collect();
        let config = BvhConfig { min_objects: 1, max_levels: 3 };
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &config);
        assert!(tree.stats().depth <= 3);
        assert_eq!(tree.query_box(&unit_box(Vec3::ZERO)).len(), 50);
    }

    #[test]
    fn test_build_from_bodies_uses_velocity() {
        let mut bodies = RigidBodies::new();
        let a = bodies.add(
            BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::ZERO, 1.0).with_velocity(Vec3::new(60.0, 0.0, 0.0)),
        );
        let plane = bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
        let tree = BoundingVolumeHierarchy::build(&bodies, &[a, plane], Pose::Current, 1.0 / 60.0, &BvhConfig::default());
        let b = tree.world_space_bounding_box(a).expect("sphere is bounded");
        assert!((b.max.x - 1.5).abs() < 1e-5, "box grows by |v| * dt");
        assert_eq!(tree.global_objects(), &[plane]);
    }
}
