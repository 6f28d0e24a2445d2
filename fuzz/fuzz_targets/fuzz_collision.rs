#![no_main]
use alice_rigid::narrow_phase::{compute_constraint, update_constraint, update_manifold};
use alice_rigid::{BodyDesc, ContactQuery, Pose, Quat, RigidBodies, Shape, ShapeHandle, Vec3};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Placement {
    /// Shape selector
    kind: u8,
    /// Size in tenths (sphere radius or box half extent)
    size: u8,
    /// Position in tenths
    position: (i8, i8, i8),
    /// Rotation vector in tenths of a radian
    rotation: (i8, i8, i8),
}

#[derive(Debug, Arbitrary)]
struct CollisionInput {
    a: Placement,
    b: Placement,
    /// Collision margin in hundredths
    thickness: u8,
}

fn shape(p: &Placement) -> ShapeHandle {
    let size = 0.1 + f32::from(p.size) / 10.0;
    match p.kind % 3 {
        0 => Shape::sphere(size),
        1 => Shape::cuboid(Vec3::new(size, size * 0.5 + 0.05, size * 1.5)),
        _ => Shape::plane(Vec3::new(0.0, 0.0, 1.0)),
    }
}

fn desc(p: &Placement) -> BodyDesc {
    let (x, y, z) = p.position;
    let (rx, ry, rz) = p.rotation;
    let position = Vec3::new(f32::from(x), f32::from(y), f32::from(z)) / 10.0;
    let rotation = Quat::from_rotation_vector(Vec3::new(f32::from(rx), f32::from(ry), f32::from(rz)) / 10.0);
    BodyDesc::new_dynamic(shape(p), position, 1.0).with_rotation(rotation)
}

// Any pair of placed shapes evaluates without panicking and yields a finite
// separation and a unit normal.
fuzz_target!(|input: CollisionInput| {
    let mut bodies = RigidBodies::new();
    let a = bodies.add(desc(&input.a));
    let b = bodies.add(desc(&input.b));
    let query = ContactQuery::new(Pose::Current, f32::from(input.thickness) / 100.0);

    let mut contact = compute_constraint(&bodies, a, b);
    update_constraint(&bodies, &query, &mut contact);
    assert!(contact.phi.is_finite());
    assert!((contact.normal.length() - 1.0).abs() < 1e-2);

    update_manifold(&bodies, &query, &mut contact);
    for point in &contact.manifold {
        assert!(point.phi.is_finite());
        assert!(point.location.is_finite());
    }
});
