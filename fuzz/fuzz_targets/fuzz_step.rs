#![no_main]
use alice_rigid::{BodyDesc, Evolution, Shape, SolverConfig, Vec3};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Use the PGS solver instead of sequential impulses
    pgs: bool,
    /// Per body: shape selector, position in tenths, velocity in units
    bodies: Vec<(bool, (i8, i8, u8), (i8, i8, i8))>,
    /// Number of simulation steps (capped)
    step_count: u8,
}

// Fuzz the evolution loop: random spheres and boxes dropped on a floor.
// Must never panic, and positions stay finite.
fuzz_target!(|input: FuzzInput| {
    let config = if input.pgs {
        SolverConfig::pgs()
    } else {
        SolverConfig::default()
    };
    let Ok(mut world) = Evolution::new(config) else {
        return;
    };
    world.add_body(BodyDesc::new_static(Shape::plane(Vec3::new(0.0, 0.0, 1.0)), Vec3::ZERO));

    for &(is_box, (x, y, z), (vx, vy, vz)) in input.bodies.iter().take(16) {
        let shape = if is_box {
            Shape::cuboid(Vec3::new(0.5, 0.5, 0.5))
        } else {
            Shape::sphere(0.5)
        };
        let position = Vec3::new(f32::from(x), f32::from(y), f32::from(z)) / 10.0;
        let velocity = Vec3::new(f32::from(vx), f32::from(vy), f32::from(vz));
        world.add_body(BodyDesc::new_dynamic(shape, position, 1.0).with_velocity(velocity));
    }

    for _ in 0..usize::from(input.step_count).min(32) {
        world.advance_one_time_step(1.0 / 60.0);
    }
    assert!(world.bodies().x.iter().all(|x| x.is_finite()));
});
