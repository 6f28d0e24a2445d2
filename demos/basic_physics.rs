//! Basic Rigid-Body Example
//!
//! Drops a sphere and a two-box stack onto a floor, steps the simulation and
//! prints positions and per-step counters.
//!
//! ```bash
//! RUST_LOG=alice_rigid=debug cargo run --example basic_physics
//! ```

use alice_rigid::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), SolverError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SolverConfig {
        iterations: 4,
        push_out_iterations: 8,
        ..SolverConfig::default()
    };
    let mut world = Evolution::new(config)?;

    // Static floor at z=0
    world.add_body(BodyDesc::new_static(Shape::plane(Vec3::UNIT_Z), Vec3::ZERO));

    // A bouncy ball and a stack of two crates
    let ball = world.add_body(
        BodyDesc::new_dynamic(Shape::sphere(0.5), Vec3::new(-2.0, 0.0, 4.0), 1.0)
            .with_material(PhysicsMaterial::new(0.2, 0.6)),
    );
    let crates = world.add_bodies([
        BodyDesc::new_dynamic(Shape::cuboid(Vec3::splat(0.5)), Vec3::new(1.0, 0.0, 0.5), 2.0),
        BodyDesc::new_dynamic(Shape::cuboid(Vec3::splat(0.5)), Vec3::new(1.0, 0.0, 2.0), 2.0),
    ]);

    println!("ALICE-Rigid Basic Example");
    println!("=========================");
    println!("Bodies: {}  Solver: {}", world.bodies().len(), world.solver_name());
    println!();

    // Simulate 3 seconds at 60 FPS
    let dt = 1.0 / 60.0;
    for frame in 0..180 {
        world.advance_one_time_step(dt);

        if frame % 30 == 0 {
            let bodies = world.bodies();
            let stats = world.last_stats();
            println!(
                "Frame {:3}: ball z={:.3}  crates z={:.3}/{:.3}  contacts={} islands={} asleep={}",
                frame,
                bodies.x[ball].z,
                bodies.x[crates[0]].z,
                bodies.x[crates[1]].z,
                stats.contacts,
                stats.islands,
                stats.sleeping_islands,
            );
        }
    }

    println!();
    for (name, last, average, peak) in world.profiler().summary() {
        println!("{name:>14}: last {last:>8} ns  avg {average:>8} ns  peak {peak:>8} ns");
    }
    Ok(())
}
