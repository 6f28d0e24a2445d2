//! Contact Graph and Islands
//!
//! Bodies are graph nodes and contacts are edges. Connected components of
//! dynamic bodies form islands, the unit of solving and of sleeping.
//!
//! # Features
//!
//! - Union-find island construction with path halving and union by rank
//! - Incremental update that only re-partitions islands touched by added or
//!   removed contacts
//! - Per-island contact levels (breadth-first distance from the static world)
//!   and greedy per-level coloring, so contacts of one color share no
//!   dynamic body
//! - All-or-nothing island sleep with an inactivity counter
//!
//! Static and kinematic bodies never join an island: they connect nothing,
//! since their state is never written by the solver.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::config::SleepConfig;
use crate::contact::RigidBodyContact;
use crate::math::Vec3;
use crate::particles::{RigidBodies, INVALID_ISLAND};

/// One island: connected dynamic bodies and the contacts between them
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IslandData {
    /// Island id (index into [`ContactGraph::islands`])
    pub id: usize,
    /// Dynamic bodies, ascending
    pub bodies: Vec<usize>,
    /// Contact indices, ascending
    pub constraints: Vec<usize>,
    /// Whole island asleep
    pub sleeping: bool,
    /// Consecutive idle steps
    pub idle_frames: u32,
    /// Contact indices by level, then by color
    pub batches: Vec<Vec<Vec<usize>>>,
}

impl IslandData {
    /// Number of contact levels
    #[inline]
    pub fn num_levels(&self) -> usize {
        self.batches.len()
    }

    /// Largest color count over all levels
    pub fn num_colors(&self) -> usize {
        self.batches.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Contact batches in solve order (level, then color)
    pub fn ordered_batches(&self) -> impl Iterator<Item = &[usize]> {
        self.batches.iter().flatten().map(Vec::as_slice)
    }
}

/// Island partition of one world
#[derive(Clone, Debug, Default)]
pub struct ContactGraph {
    parent: Vec<usize>,
    rank: Vec<u32>,
    islands: Vec<IslandData>,
    constraint_level: Vec<i32>,
    constraint_color: Vec<i32>,
    pair_keys: HashSet<(usize, usize)>,
    last_recomputed: usize,
}

impl ContactGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Current islands
    #[inline]
    pub fn islands(&self) -> &[IslandData] {
        &self.islands
    }

    /// One island
    #[inline]
    pub fn island(&self, id: usize) -> Option<&IslandData> {
        self.islands.get(id)
    }

    /// Number of islands
    #[inline]
    pub fn num_islands(&self) -> usize {
        self.islands.len()
    }

    /// Number of sleeping islands
    pub fn num_sleeping(&self) -> usize {
        self.islands.iter().filter(|i| i.sleeping).count()
    }

    /// Islands rebuilt by the last compute/update call
    #[inline]
    pub fn last_recomputed(&self) -> usize {
        self.last_recomputed
    }

    /// Level of a contact (`-1` if it belongs to no island)
    #[inline]
    pub fn constraint_level(&self, constraint: usize) -> i32 {
        self.constraint_level.get(constraint).copied().unwrap_or(-1)
    }

    /// Color of a contact within its level (`-1` if it belongs to no island)
    #[inline]
    pub fn constraint_color(&self, constraint: usize) -> i32 {
        self.constraint_color.get(constraint).copied().unwrap_or(-1)
    }

    // ========================================================================
    // Union-Find
    // ========================================================================

    fn reset_sets(&mut self, n: usize) {
        self.parent.clear();
        self.parent.extend(0..n);
        self.rank.clear();
        self.rank.resize(n, 0);
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]]; // Path halving
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Group `members` by their union-find root, ordered by smallest member
    fn components(&mut self, members: &[usize]) -> Vec<Vec<usize>> {
        let mut root_slot: Vec<Option<usize>> = vec![None; self.parent.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &body in members {
            let root = self.find(body);
            let slot = match root_slot[root] {
                Some(slot) => slot,
                None => {
                    root_slot[root] = Some(groups.len());
                    groups.push(Vec::new());
                    groups.len() - 1
                }
            };
            groups[slot].push(body);
        }
        groups
    }

    // ========================================================================
    // Island Construction
    // ========================================================================

    /// Rebuild every island from `constraints`
    pub fn compute_graph(&mut self, bodies: &mut RigidBodies, constraints: &[RigidBodyContact]) {
        let members: Vec<usize> = (0..bodies.len())
            .filter(|&i| bodies.is_dynamic(i) && !bodies.disabled[i])
            .collect();
        self.reset_sets(bodies.len());
        for c in constraints {
            if is_member(bodies, c.body_a) && is_member(bodies, c.body_b) {
                self.union(c.body_a, c.body_b);
            }
        }
        let groups = self.components(&members);
        let previous = std::mem::take(&mut self.islands);
        self.last_recomputed = groups.len();
        let islands = groups
            .into_iter()
            .map(|group| merge_sleep_state(bodies, &previous, group))
            .collect();
        self.install(bodies, islands, constraints);
        debug!(
            islands = self.islands.len(),
            recomputed = self.last_recomputed,
            "computed contact graph"
        );
    }

    /// Re-partition only the islands touched by changed contacts
    ///
    /// A contact is "changed" when its body pair was not present in the last
    /// call, or a pair from the last call is gone. Bodies that are new,
    /// disabled or no longer dynamic also invalidate their island. Untouched
    /// islands keep their bodies and sleep state.
    pub fn update_islands_from_constraints(&mut self, bodies: &mut RigidBodies, constraints: &[RigidBodyContact]) {
        if self.islands.is_empty() || self.parent.len() != bodies.len() {
            self.compute_graph(bodies, constraints);
            return;
        }

        let keys: HashSet<(usize, usize)> = constraints.iter().map(RigidBodyContact::pair_key).collect();
        let mut affected_islands: HashSet<usize> = HashSet::new();
        let mut loose_bodies: Vec<usize> = Vec::new();
        let mut touch = |body: usize, bodies: &RigidBodies| match usize::try_from(bodies.island[body]) {
            Ok(id) => {
                affected_islands.insert(id);
            }
            Err(_) => {
                if is_member(bodies, body) {
                    loose_bodies.push(body);
                }
            }
        };
        for &(a, b) in keys.symmetric_difference(&self.pair_keys) {
            touch(a, bodies);
            touch(b, bodies);
        }
        for body in 0..bodies.len() {
            let member = is_member(bodies, body);
            let has_island = bodies.island[body] != INVALID_ISLAND;
            if member != has_island {
                touch(body, bodies);
            }
        }

        let previous = std::mem::take(&mut self.islands);
        let mut rebuilt: Vec<usize> = loose_bodies;
        let mut kept: Vec<IslandData> = Vec::new();
        for island in &previous {
            if affected_islands.contains(&island.id) {
                rebuilt.extend(island.bodies.iter().copied().filter(|&b| is_member(bodies, b)));
            } else {
                kept.push(island.clone());
            }
        }
        rebuilt.sort_unstable();
        rebuilt.dedup();

        let rebuilt_set: HashSet<usize> = rebuilt.iter().copied().collect();
        for &b in &rebuilt {
            self.parent[b] = b;
            self.rank[b] = 0;
        }
        for c in constraints {
            if rebuilt_set.contains(&c.body_a) && rebuilt_set.contains(&c.body_b) {
                self.union(c.body_a, c.body_b);
            }
        }
        let groups = self.components(&rebuilt);
        self.last_recomputed = groups.len();
        let mut islands = kept;
        islands.extend(groups.into_iter().map(|g| merge_sleep_state(bodies, &previous, g)));
        islands.sort_by_key(|island| island.bodies.first().copied().unwrap_or(usize::MAX));
        self.install(bodies, islands, constraints);
        debug!(
            islands = self.islands.len(),
            recomputed = self.last_recomputed,
            "updated contact graph"
        );
    }

    /// Number islands, write body island ids and assign contacts
    fn install(&mut self, bodies: &mut RigidBodies, mut islands: Vec<IslandData>, constraints: &[RigidBodyContact]) {
        bodies.island.iter_mut().for_each(|id| *id = INVALID_ISLAND);
        for (id, island) in islands.iter_mut().enumerate() {
            island.id = id;
            island.constraints.clear();
            island.batches.clear();
            for &b in &island.bodies {
                bodies.island[b] = id as i32;
            }
        }
        for (index, c) in constraints.iter().enumerate() {
            let owner = [c.body_a, c.body_b]
                .into_iter()
                .find_map(|b| usize::try_from(bodies.island[b]).ok());
            if let Some(id) = owner {
                debug_assert!(
                    !(is_member(bodies, c.body_a) && is_member(bodies, c.body_b))
                        || bodies.island[c.body_a] == bodies.island[c.body_b],
                    "constrained dynamic bodies must share an island"
                );
                islands[id].constraints.push(index);
            }
        }

        self.constraint_level = vec![-1; constraints.len()];
        self.constraint_color = vec![-1; constraints.len()];
        for island in &mut islands {
            let levels = compute_levels(island, constraints);
            island.batches = color_levels(bodies, levels, constraints);
            for (level, colors) in island.batches.iter().enumerate() {
                for (color, batch) in colors.iter().enumerate() {
                    for &c in batch {
                        self.constraint_level[c] = level as i32;
                        self.constraint_color[c] = color as i32;
                    }
                }
            }
        }
        self.islands = islands;
        self.pair_keys = constraints.iter().map(RigidBodyContact::pair_key).collect();
    }

    // ========================================================================
    // Sleeping
    // ========================================================================

    /// Advance island inactivity counters and put idle islands to sleep
    ///
    /// Returns the ids of islands that fell asleep in this call. An island
    /// sleeps as soon as its idle counter reaches `frames_to_sleep`.
    pub fn sleep_inactive(&mut self, bodies: &mut RigidBodies, config: &SleepConfig) -> Vec<usize> {
        let mut slept = Vec::new();
        for island in &mut self.islands {
            if island.sleeping {
                continue;
            }
            let idle = island.bodies.iter().all(|&b| {
                bodies.v[b].length() < config.linear_threshold
                    && bodies.w[b].length() < config.angular_threshold
                    && !bodies.has_external_load(b)
            });
            if !idle {
                island.idle_frames = 0;
                continue;
            }
            island.idle_frames += 1;
            if island.idle_frames >= config.frames_to_sleep {
                island.sleeping = true;
                for &b in &island.bodies {
                    bodies.sleeping[b] = true;
                    bodies.v[b] = Vec3::ZERO;
                    bodies.w[b] = Vec3::ZERO;
                }
                debug!(island = island.id, bodies = island.bodies.len(), "island fell asleep");
                slept.push(island.id);
            }
        }
        slept
    }

    /// Wake every body of an island and reset its counter
    pub fn wake_island(&mut self, bodies: &mut RigidBodies, id: usize) {
        let Some(island) = self.islands.get_mut(id) else {
            return;
        };
        if island.sleeping {
            debug!(island = id, "island woke up");
        }
        island.sleeping = false;
        island.idle_frames = 0;
        for &b in &island.bodies {
            bodies.sleeping[b] = false;
        }
    }

    /// Wake the island of `body` (or just the body when it has none)
    pub fn wake_body(&mut self, bodies: &mut RigidBodies, body: usize) {
        match usize::try_from(bodies.island[body]) {
            Ok(id) => self.wake_island(bodies, id),
            Err(_) => bodies.sleeping[body] = false,
        }
    }

    /// Wake islands of sleeping bodies that carry a pending force or torque
    pub fn wake_loaded(&mut self, bodies: &mut RigidBodies) -> usize {
        let loaded: Vec<usize> = (0..bodies.len())
            .filter(|&b| bodies.sleeping[b] && bodies.has_external_load(b))
            .collect();
        for &b in &loaded {
            self.wake_body(bodies, b);
        }
        loaded.len()
    }
}

#[inline]
fn is_member(bodies: &RigidBodies, body: usize) -> bool {
    bodies.is_dynamic(body) && !bodies.disabled[body]
}

/// New island from `group`, inheriting sleep state from the islands its
/// bodies came from. The island sleeps only if every body was asleep;
/// otherwise any sleeping body in it is woken.
fn merge_sleep_state(bodies: &mut RigidBodies, previous: &[IslandData], group: Vec<usize>) -> IslandData {
    let all_sleeping = group.iter().all(|&b| bodies.sleeping[b]);
    let woken = !all_sleeping && group.iter().any(|&b| bodies.sleeping[b]);
    let idle_frames = group
        .iter()
        .map(|&b| {
            usize::try_from(bodies.island[b])
                .ok()
                .and_then(|id| previous.get(id))
                .map_or(0, |island| island.idle_frames)
        })
        .min()
        .unwrap_or(0);
    if !all_sleeping {
        for &b in &group {
            bodies.sleeping[b] = false;
        }
    }
    IslandData {
        id: 0,
        bodies: group,
        constraints: Vec::new(),
        sleeping: all_sleeping,
        idle_frames: if woken { 0 } else { idle_frames },
        batches: Vec::new(),
    }
}

// ============================================================================
// Levels and Colors
// ============================================================================

/// Contacts of an island grouped by level
///
/// Bodies touching the static world are level 0 and levels grow with
/// breadth-first distance. An island that touches nothing static is rooted
/// at its lowest body. A contact takes the lower level of its two bodies.
fn compute_levels(island: &IslandData, constraints: &[RigidBodyContact]) -> Vec<Vec<usize>> {
    if island.constraints.is_empty() {
        return Vec::new();
    }
    let local = |b: usize| island.bodies.binary_search(&b).ok();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); island.bodies.len()];
    let mut body_level: Vec<i32> = vec![-1; island.bodies.len()];
    let mut queue = VecDeque::new();
    for &c in &island.constraints {
        let contact = &constraints[c];
        match (local(contact.body_a), local(contact.body_b)) {
            (Some(a), Some(b)) => {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
            (Some(a), None) | (None, Some(a)) => {
                if body_level[a] < 0 {
                    body_level[a] = 0;
                    queue.push_back(a);
                }
            }
            (None, None) => {}
        }
    }
    if queue.is_empty() {
        body_level[0] = 0;
        queue.push_back(0);
    }
    while let Some(b) = queue.pop_front() {
        for &n in &adjacency[b] {
            if body_level[n] < 0 {
                body_level[n] = body_level[b] + 1;
                queue.push_back(n);
            }
        }
    }

    let mut levels: Vec<Vec<usize>> = Vec::new();
    for &c in &island.constraints {
        let contact = &constraints[c];
        let level = [contact.body_a, contact.body_b]
            .into_iter()
            .filter_map(local)
            .map(|b| body_level[b].max(0) as usize)
            .min()
            .unwrap_or(0);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(c);
    }
    levels.retain(|l| !l.is_empty());
    levels
}

/// Greedy coloring per level: a contact takes the smallest color unused by
/// both of its dynamic bodies within the level
fn color_levels(bodies: &RigidBodies, levels: Vec<Vec<usize>>, constraints: &[RigidBodyContact]) -> Vec<Vec<Vec<usize>>> {
    levels
        .into_iter()
        .map(|level| {
            let mut used: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
            let mut colors: Vec<Vec<usize>> = Vec::new();
            for c in level {
                let contact = &constraints[c];
                let dynamic: Vec<usize> = [contact.body_a, contact.body_b]
                    .into_iter()
                    .filter(|&b| is_member(bodies, b))
                    .collect();
                let color = (0..)
                    .find(|color| {
                        dynamic
                            .iter()
                            .all(|b| used.get(b).map_or(true, |taken| !taken.contains(color)))
                    })
                    .unwrap_or(0);
                for b in dynamic {
                    used.entry(b).or_default().push(color);
                }
                if colors.len() <= color {
                    colors.resize_with(color + 1, Vec::new);
                }
                colors[color].push(c);
            }
            colors
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

    fn world(dynamic: usize) -> RigidBodies {
        let mut bodies = RigidBodies::new();
        bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
        for i in 0..dynamic {
            bodies.add(BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::new(i as f32, 0.0, 0.5), 1.0));
        }
        bodies
    }

    fn link(a: usize, b: usize) -> RigidBodyContact {
        RigidBodyContact::new(a, b)
    }

    #[test]
    fn test_static_bodies_join_no_island() {
        let mut bodies = world(2);
        let constraints = vec![link(1, 0), link(2, 0)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        assert_eq!(graph.num_islands(), 2, "the floor does not connect islands");
        assert_eq!(bodies.island[0], INVALID_ISLAND);
        assert_ne!(bodies.island[1], bodies.island[2]);
    }

    #[test]
    fn test_chain_forms_one_island_with_levels() {
        let mut bodies = world(3);
        // floor - 1 - 2 - 3
        let constraints = vec![link(1, 0), link(2, 1), link(3, 2)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        assert_eq!(graph.num_islands(), 1);
        let island = &graph.islands()[0];
        assert_eq!(island.bodies, vec![1, 2, 3]);
        assert_eq!(island.num_levels(), 2);
        assert_eq!(graph.constraint_level(0), 0);
        assert_eq!(graph.constraint_level(1), 0, "contact takes the lower body level");
        assert_eq!(graph.constraint_level(2), 1);
    }

    #[test]
    fn test_colors_never_share_dynamic_body() {
        let mut bodies = world(4);
        // Star around body 1, all touching the floor
        let constraints = vec![link(1, 0), link(2, 1), link(3, 1), link(4, 1), link(2, 0), link(3, 0), link(4, 0)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        for island in graph.islands() {
            for batch in island.ordered_batches() {
                let mut seen = HashSet::new();
                for &c in batch {
                    for b in [constraints[c].body_a, constraints[c].body_b] {
                        if bodies.is_dynamic(b) {
                            assert!(seen.insert(b), "body {b} appears twice in one color");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_incremental_update_only_touches_changed_islands() {
        let mut bodies = world(4);
        let mut constraints = vec![link(1, 0), link(2, 0), link(3, 0), link(4, 0)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        assert_eq!(graph.num_islands(), 4);

        constraints.push(link(2, 1));
        graph.update_islands_from_constraints(&mut bodies, &constraints);
        assert_eq!(graph.num_islands(), 3);
        assert_eq!(graph.last_recomputed(), 1, "only the merged island is rebuilt");
        assert_eq!(bodies.island[1], bodies.island[2]);

        constraints.pop();
        graph.update_islands_from_constraints(&mut bodies, &constraints);
        assert_eq!(graph.num_islands(), 4);
        assert_ne!(bodies.island[1], bodies.island[2]);
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut bodies = world(2);
        let constraints = vec![link(1, 0), link(2, 1)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        let config = SleepConfig {
            frames_to_sleep: 3,
            ..SleepConfig::default()
        };
        assert!(graph.sleep_inactive(&mut bodies, &config).is_empty());
        assert!(graph.sleep_inactive(&mut bodies, &config).is_empty());
        assert_eq!(graph.sleep_inactive(&mut bodies, &config), vec![0]);
        assert!(graph.sleep_inactive(&mut bodies, &config).is_empty(), "sleeps exactly once");
        assert!(bodies.sleeping[1] && bodies.sleeping[2]);

        bodies.apply_force(2, Vec3::new(0.0, 0.0, 10.0));
        assert_eq!(graph.wake_loaded(&mut bodies), 1);
        assert!(!bodies.sleeping[1] && !bodies.sleeping[2], "the whole island wakes");
        assert_eq!(graph.islands()[0].idle_frames, 0);
    }

    #[test]
    fn test_sleeps_on_exactly_the_nth_idle_step() {
        for frames_to_sleep in 1..=5u32 {
            let mut bodies = world(1);
            let mut graph = ContactGraph::new();
            graph.compute_graph(&mut bodies, &[link(1, 0)]);
            let config = SleepConfig {
                frames_to_sleep,
                ..SleepConfig::default()
            };
            for step in 1..frames_to_sleep {
                assert!(graph.sleep_inactive(&mut bodies, &config).is_empty(), "awake after {step} of {frames_to_sleep}");
            }
            assert_eq!(graph.sleep_inactive(&mut bodies, &config), vec![0], "asleep on step {frames_to_sleep}");
            assert!(bodies.sleeping[1]);
        }
    }

    #[test]
    fn test_moving_body_resets_counter() {
        let mut bodies = world(1);
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &[link(1, 0)]);
        let config = SleepConfig {
            frames_to_sleep: 2,
            ..SleepConfig::default()
        };
        graph.sleep_inactive(&mut bodies, &config);
        bodies.v[1] = Vec3::new(5.0, 0.0, 0.0);
        graph.sleep_inactive(&mut bodies, &config);
        assert_eq!(graph.islands()[0].idle_frames, 0);
        assert!(!bodies.sleeping[1]);
    }

    #[test]
    fn test_sleeping_island_woken_by_new_contact() {
        let mut bodies = world(2);
        let mut constraints = vec![link(1, 0)];
        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);
        let sleepy = bodies.island[1] as usize;
        graph.islands[sleepy].sleeping = true;
        bodies.sleeping[1] = true;

        constraints.push(link(2, 1));
        graph.update_islands_from_constraints(&mut bodies, &constraints);
        assert!(!bodies.sleeping[1], "merging with an awake body wakes the island");
        assert_eq!(graph.num_sleeping(), 0);
    }
}
