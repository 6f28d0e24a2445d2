//! Property tests for ALICE-Rigid
//!
//! Randomized checks of the structural guarantees: BVH queries agree with a
//! brute-force scan, pair evaluation does not depend on argument order,
//! islands match connected components, and contact frames are orthonormal.

use proptest::prelude::*;

use alice_rigid::narrow_phase::{compute_constraint, update_constraint};
use alice_rigid::pgs::tangent_basis;
use alice_rigid::{
    Aabb, BodyDesc, BoundingVolumeHierarchy, BvhConfig, ContactGraph, ContactQuery, ConvexHull, Pose, RigidBodies,
    RigidBodyContact, Shape, Vec3,
};
use std::sync::Arc;

// ============================================================================
// Strategies
// ============================================================================

fn coord() -> impl Strategy<Value = f32> {
    -50.0f32..50.0
}

fn vec3() -> impl Strategy<Value = Vec3> {
    (coord(), coord(), coord()).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn aabb() -> impl Strategy<Value = Aabb> {
    (vec3(), 0.1f32..8.0, 0.1f32..8.0, 0.1f32..8.0)
        .prop_map(|(center, hx, hy, hz)| Aabb::from_center_half(center, Vec3::new(hx, hy, hz)))
}

fn unit_vec3() -> impl Strategy<Value = Vec3> {
    vec3().prop_filter_map("non-degenerate direction", Vec3::try_normalize)
}

fn half_extents() -> impl Strategy<Value = Vec3> {
    (0.3f32..1.5, 0.3f32..1.5, 0.3f32..1.5).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn axis() -> impl Strategy<Value = Vec3> {
    prop_oneof![
        Just(Vec3::UNIT_X),
        Just(-Vec3::UNIT_X),
        Just(Vec3::UNIT_Y),
        Just(-Vec3::UNIT_Y),
        Just(Vec3::UNIT_Z),
        Just(-Vec3::UNIT_Z),
    ]
}

// ============================================================================
// Helpers
// ============================================================================

fn brute_force(entries: &[(usize, Option<Aabb>)], query: &Aabb) -> Vec<usize> {
    let mut hits: Vec<usize> = entries
        .iter()
        .filter(|(_, b)| b.as_ref().is_some_and(|b| b.intersects(query)))
        .map(|(i, _)| *i)
        .collect();
    hits.sort_unstable();
    hits
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

// Wide margin so separated pairs still report their distance
fn evaluate(bodies: &RigidBodies, body1: usize, body2: usize) -> RigidBodyContact {
    let mut contact = compute_constraint(bodies, body1, body2);
    update_constraint(bodies, &ContactQuery::new(Pose::Current, 100.0), &mut contact);
    contact
}

fn hull_body(half: Vec3) -> Arc<Shape> {
    let hull = ConvexHull::from_points(&Aabb::from_center_half(Vec3::ZERO, half).corners()).expect("box hull");
    Arc::new(Shape::Convex(hull))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_bvh_query_matches_brute_force(
        boxes in prop::collection::vec(aabb(), 0..64),
        query in aabb(),
        min_objects in 1usize..8,
        max_levels in 1usize..12,
    ) {
        let entries: Vec<(usize, Option<Aabb>)> =
            boxes.into_iter().enumerate().map(|(i, b)| (i, Some(b))).collect();
        let config = BvhConfig { min_objects, max_levels };
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &config);

        prop_assert_eq!(tree.query_box(&query), brute_force(&entries, &query));
    }

    #[test]
    fn prop_unbounded_objects_are_always_candidates(
        boxes in prop::collection::vec(aabb(), 1..32),
        query in aabb(),
    ) {
        let mut entries: Vec<(usize, Option<Aabb>)> =
            boxes.into_iter().enumerate().map(|(i, b)| (i, Some(b))).collect();
        let global = entries.len();
        entries.push((global, None));
        let tree = BoundingVolumeHierarchy::from_boxes(&entries, &BvhConfig::default());

        let candidates = tree.find_all_intersections(&query);
        prop_assert!(candidates.contains(&global));
        prop_assert!(!tree.query_box(&query).contains(&global));
    }

    #[test]
    fn prop_sphere_pair_is_order_independent(
        center_a in vec3(),
        offset in unit_vec3(),
        distance in 0.2f32..6.0,
        radius_a in 0.1f32..2.0,
        radius_b in 0.1f32..2.0,
    ) {
        let mut bodies = RigidBodies::new();
        let a = bodies.add(BodyDesc::new_dynamic(Shape::sphere(radius_a), center_a, 1.0));
        let b = bodies.add(BodyDesc::new_dynamic(Shape::sphere(radius_b), center_a + offset * distance, 1.0));

        let forward = evaluate(&bodies, a, b);
        let backward = evaluate(&bodies, b, a);
        let expected = distance - radius_a - radius_b;

        prop_assert!((forward.phi - expected).abs() < 1e-3, "phi {} vs {}", forward.phi, expected);
        prop_assert!((forward.phi - backward.phi).abs() < 1e-3);
        prop_assert!((forward.normal + backward.normal).length() < 1e-3, "normals are antiparallel");
    }

    #[test]
    fn prop_sphere_plane_ignores_argument_order(
        height in -1.0f32..3.0,
        radius in 0.1f32..2.0,
        lateral in vec3(),
    ) {
        let mut bodies = RigidBodies::new();
        let floor = bodies.add(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));
        let position = Vec3::new(lateral.x, lateral.y, height);
        let ball = bodies.add(BodyDesc::new_dynamic(Shape::sphere(radius), position, 1.0));

        let forward = evaluate(&bodies, ball, floor);
        let backward = evaluate(&bodies, floor, ball);

        prop_assert_eq!(forward.body_a, ball, "the sampled body is body_a");
        prop_assert_eq!(backward.body_a, ball);
        prop_assert!((forward.phi - (height - radius)).abs() < 1e-3);
        prop_assert!((forward.phi - backward.phi).abs() < 1e-6);
        prop_assert!((forward.normal - Vec3::UNIT_Z).length() < 1e-4);
    }

    #[test]
    fn prop_box_pair_is_order_independent(
        center_a in vec3(),
        half_a in half_extents(),
        half_b in half_extents(),
        normal in axis(),
        gap in 0.05f32..3.0,
        lateral in (-0.2f32..0.2, -0.2f32..0.2, -0.2f32..0.2),
    ) {
        // faces overlap in projection, so the closest distance is the gap along `normal`
        let along = half_a.dot(normal.abs()) + half_b.dot(normal.abs()) + gap;
        let slide = Vec3::new(lateral.0, lateral.1, lateral.2);
        let slide = slide - normal * slide.dot(normal);
        let mut bodies = RigidBodies::new();
        let a = bodies.add(BodyDesc::new_dynamic(Shape::cuboid(half_a), center_a, 1.0));
        let b = bodies.add(BodyDesc::new_dynamic(Shape::cuboid(half_b), center_a + normal * along + slide, 1.0));

        let forward = evaluate(&bodies, a, b);
        let backward = evaluate(&bodies, b, a);

        prop_assert!((forward.phi - gap).abs() < 1e-3, "phi {} vs gap {}", forward.phi, gap);
        prop_assert!((forward.phi - backward.phi).abs() < 1e-3, "{} vs {}", forward.phi, backward.phi);
        prop_assert!((forward.normal + backward.normal).length() < 1e-3, "normals are antiparallel");
    }

    #[test]
    fn prop_convex_pair_is_order_independent(
        center_a in vec3(),
        half_a in half_extents(),
        half_b in half_extents(),
        direction in unit_vec3(),
        gap in 0.05f32..3.0,
    ) {
        // beyond both circumscribed radii, so the hulls never overlap
        let distance = half_a.length() + half_b.length() + gap;
        let mut bodies = RigidBodies::new();
        let a = bodies.add(BodyDesc::new_dynamic(hull_body(half_a), center_a, 1.0));
        let b = bodies.add(BodyDesc::new_dynamic(hull_body(half_b), center_a + direction * distance, 1.0));

        let forward = evaluate(&bodies, a, b);
        let backward = evaluate(&bodies, b, a);

        prop_assert!(forward.phi > 0.0, "separated hulls report positive distance, got {}", forward.phi);
        prop_assert!((forward.phi - backward.phi).abs() < 1e-2, "{} vs {}", forward.phi, backward.phi);
        prop_assert!((forward.normal + backward.normal).length() < 1e-2, "normals are antiparallel");
    }

    #[test]
    fn prop_islands_are_connected_components(
        count in 2usize..24,
        raw_pairs in prop::collection::vec((0usize..24, 0usize..24), 0..40),
    ) {
        let mut bodies = RigidBodies::new();
        for i in 0..count {
            bodies.add(BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::new(i as f32 * 3.0, 0.0, 0.0), 1.0));
        }
        let constraints: Vec<RigidBodyContact> = raw_pairs
            .into_iter()
            .map(|(a, b)| (a % count, b % count))
            .filter(|(a, b)| a != b)
            .map(|(a, b)| RigidBodyContact::new(a, b))
            .collect();

        let mut graph = ContactGraph::new();
        graph.compute_graph(&mut bodies, &constraints);

        let mut parent: Vec<usize> = (0..count).collect();
        for c in &constraints {
            let (ra, rb) = (find(&mut parent, c.body_a), find(&mut parent, c.body_b));
            parent[ra] = rb;
        }
        for i in 0..count {
            for j in (i + 1)..count {
                let connected = find(&mut parent, i) == find(&mut parent, j);
                prop_assert_eq!(bodies.island[i] == bodies.island[j], connected, "bodies {} and {}", i, j);
            }
        }
        let assigned: usize = graph.islands().iter().map(|island| island.constraints.len()).sum();
        prop_assert_eq!(assigned, constraints.len(), "every contact belongs to one island");
    }

    #[test]
    fn prop_tangent_basis_is_orthonormal(normal in unit_vec3()) {
        let (t0, t1) = tangent_basis(normal);
        prop_assert!((t0.length() - 1.0).abs() < 1e-4);
        prop_assert!((t1.length() - 1.0).abs() < 1e-4);
        prop_assert!(t0.dot(normal).abs() < 1e-4);
        prop_assert!(t1.dot(normal).abs() < 1e-4);
        prop_assert!(t0.dot(t1).abs() < 1e-4);
    }
}
