//! End-to-end scenarios driven through the public facade: literal initial
//! conditions in, particle planes read back and checked after a fixed
//! number of steps.

use glam::Vec3;
use pointgravity::{
    ParticleInit, RenderContext, Simulation, SimulationOptions, SolverKind, WorldBounds,
};

fn context() -> Option<std::sync::Arc<RenderContext>> {
    match RenderContext::new_blocking() {
        Ok(context) => Some(context),
        Err(_) => {
            eprintln!("skipping: no GPU adapter available");
            None
        }
    }
}

fn simulate(
    context: std::sync::Arc<RenderContext>,
    options: SimulationOptions,
    init: ParticleInit,
    steps: u32,
) -> Simulation {
    let mut sim = Simulation::new(context, options, init).expect("construction");
    for _ in 0..steps {
        sim.step();
    }
    sim
}

fn particle(sim: &Simulation, index: usize) -> ([f32; 3], [f32; 3]) {
    let positions = sim.read_positions();
    let velocities = sim.read_velocities();
    (
        [
            positions[index * 4],
            positions[index * 4 + 1],
            positions[index * 4 + 2],
        ],
        [
            velocities[index * 4],
            velocities[index * 4 + 1],
            velocities[index * 4 + 2],
        ],
    )
}

fn assert_all_finite(sim: &Simulation) {
    assert!(sim.read_positions().iter().all(|v| v.is_finite()));
    assert!(sim.read_velocities().iter().all(|v| v.is_finite()));
}

// Story: a single particle at rest feels no net force from itself and stays
// put, under both force models.
#[test]
fn single_particle_stays_at_rest() {
    for solver in [SolverKind::Monopole, SolverKind::Spectral] {
        let Some(context) = context() else { return };
        let options = SimulationOptions {
            solver,
            dt: 0.01,
            ..Default::default()
        };
        let init = ParticleInit::new(vec![0.0, 0.0, 0.0, 1.0]).unwrap();
        let sim = simulate(context, options, init, 10);

        let (p, v) = particle(&sim, 0);
        for axis in 0..3 {
            assert!(p[axis].abs() < 1e-5, "{solver:?} drifted: {p:?}");
            assert!(v[axis].abs() < 1e-5, "{solver:?} moved: {v:?}");
        }
    }
}

fn two_body_init() -> ParticleInit {
    ParticleInit::new(vec![-1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]).unwrap()
}

// Story: two equal masses released at rest fall toward each other.
#[test]
fn two_bodies_attract_monopole() {
    let Some(context) = context() else { return };
    if !context.capabilities().float_blending {
        eprintln!("skipping: no float32 blending");
        return;
    }
    let options = SimulationOptions {
        solver: SolverKind::Monopole,
        dt: 0.01,
        ..Default::default()
    };
    let sim = simulate(context, options, two_body_init(), 20);

    let (p0, v0) = particle(&sim, 0);
    let (p1, v1) = particle(&sim, 1);
    assert!(p0[0] > -1.0 && p1[0] < 1.0, "no contraction: {p0:?} {p1:?}");
    assert!(v0[0] > 0.0 && v1[0] < 0.0, "no infall: {v0:?} {v1:?}");
    assert_all_finite(&sim);
}

// Story: the same scenario through the spectral pipeline. The FFT implies a
// periodic box, so the pair gets a world box much larger than its
// separation to keep the wrap-around images negligible.
#[test]
fn two_bodies_attract_spectral() {
    let Some(context) = context() else { return };
    if !context.capabilities().float_blending {
        eprintln!("skipping: no float32 blending");
        return;
    }
    let options = SimulationOptions {
        solver: SolverKind::Spectral,
        dt: 0.01,
        world_bounds: Some(WorldBounds::new(Vec3::splat(-4.0), Vec3::splat(4.0))),
        ..Default::default()
    };
    let sim = simulate(context, options, two_body_init(), 20);

    let (p0, v0) = particle(&sim, 0);
    let (p1, v1) = particle(&sim, 1);
    assert!(p0[0] > -1.0 && p1[0] < 1.0, "no contraction: {p0:?} {p1:?}");
    assert!(v0[0] > 0.0 && v1[0] < 0.0, "no infall: {v0:?} {v1:?}");
    assert_all_finite(&sim);
}

// Story: an equilateral triangle on tangential orbits neither collapses nor
// flies apart over a hundred steps.
#[test]
fn triangle_orbit_keeps_its_shape() {
    let Some(context) = context() else { return };
    if !context.capabilities().float_blending {
        eprintln!("skipping: no float32 blending");
        return;
    }
    let r = 0.5f32;
    let h = r * 3.0f32.sqrt() / 2.0;
    let positions = vec![
        r, 0.0, 0.0, 1.0, //
        -r / 2.0, h, 0.0, 1.0, //
        -r / 2.0, -h, 0.0, 1.0,
    ];
    // Tangential speed 0.05 perpendicular to each radius, in-plane.
    let velocities = vec![
        0.0, 0.05, 0.0, 0.0, //
        -0.05 * h / r, -0.025, 0.0, 0.0, //
        0.05 * h / r, -0.025, 0.0, 0.0,
    ];
    let init = ParticleInit::new(positions.clone())
        .unwrap()
        .with_velocities(velocities)
        .unwrap();
    let options = SimulationOptions {
        solver: SolverKind::Monopole,
        ..Default::default()
    };
    let sim = simulate(context, options, init, 100);

    let after = sim.read_positions();
    for (i, j) in [(0usize, 1usize), (1, 2), (0, 2)] {
        let initial = distance(&positions, i, j);
        let current = distance(&after, i, j);
        let drift = (current - initial).abs() / initial;
        assert!(drift < 0.3, "pair ({i},{j}) drifted {drift}");
    }
}

fn distance(quads: &[f32], i: usize, j: usize) -> f32 {
    let a = &quads[i * 4..i * 4 + 3];
    let b = &quads[j * 4..j * 4 + 3];
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

// Story: with gravity switched off nothing moves, for either solver.
#[test]
fn zero_gravity_stasis() {
    for solver in [SolverKind::Monopole, SolverKind::Spectral] {
        let Some(context) = context() else { return };
        let options = SimulationOptions {
            solver,
            gravity: 0.0,
            ..Default::default()
        };
        let positions = vec![
            0.3, -0.4, 0.2, 1.0, //
            -0.1, 0.5, -0.6, 2.0, //
            0.7, 0.1, 0.4, 0.5, //
            -0.5, -0.3, -0.2, 1.5,
        ];
        let init = ParticleInit::new(positions.clone()).unwrap();
        let sim = simulate(context, options, init, 50);

        let after = sim.read_positions();
        for (before, after) in positions.iter().zip(&after) {
            assert!((before - after).abs() < 1e-3, "{solver:?} moved");
        }
        let velocities = sim.read_velocities();
        assert!(velocities.iter().all(|v| v.abs() < 1e-6));
    }
}

// Story: fast particles are capped at max_speed no matter how hard the
// solver kicks them.
#[test]
fn speed_stays_clamped() {
    let Some(context) = context() else { return };
    let options = SimulationOptions {
        solver: SolverKind::Monopole,
        gravity: 1.0,
        max_speed: 2.0,
        dt: 0.01,
        ..Default::default()
    };
    let mut positions = Vec::new();
    let mut rng = fastrand::Rng::with_seed(21);
    for _ in 0..50 {
        positions.extend_from_slice(&[
            rng.f32() * 0.4 - 0.2,
            rng.f32() * 0.4 - 0.2,
            rng.f32() * 0.4 - 0.2,
            1.0,
        ]);
    }
    let init = ParticleInit::new(positions).unwrap();
    let sim = simulate(context, options, init, 50);

    let velocities = sim.read_velocities();
    for quad in velocities.chunks_exact(4) {
        let speed = (quad[0] * quad[0] + quad[1] * quad[1] + quad[2] * quad[2]).sqrt();
        assert!(speed <= 2.0 * 1.01, "speed {speed} over the clamp");
    }
}

// Story: four particles launched well above the speed clamp stay bounded
// and finite through the spectral pipeline.
#[test]
fn high_speed_spectral_stays_bounded() {
    let Some(context) = context() else { return };
    let options = SimulationOptions {
        solver: SolverKind::Spectral,
        dt: 0.01,
        ..Default::default()
    };
    let init = ParticleInit::new(vec![
        -1.0, 0.0, 0.0, 1.0, //
        1.0, 0.0, 0.0, 1.0, //
        0.0, 1.0, 0.0, 1.0, //
        0.0, -1.0, 0.0, 1.0,
    ])
    .unwrap()
    .with_velocities(vec![
        2.0, 1.0, 0.5, 0.0, //
        -2.0, -1.0, -0.5, 0.0, //
        1.0, -2.0, 0.5, 0.0, //
        -1.0, 2.0, -0.5, 0.0,
    ])
    .unwrap();
    let sim = simulate(context, options, init, 100);

    assert_all_finite(&sim);
    let velocities = sim.read_velocities();
    for quad in velocities.chunks_exact(4) {
        let speed = (quad[0] * quad[0] + quad[1] * quad[1] + quad[2] * quad[2]).sqrt();
        assert!(speed < 20.0);
    }
}

// Story: a cold cluster contracts under its own gravity without its center
// of mass drifting away.
#[test]
fn dense_cluster_contracts() {
    let Some(context) = context() else { return };
    if !context.capabilities().float_blending {
        eprintln!("skipping: no float32 blending");
        return;
    }
    let options = SimulationOptions {
        solver: SolverKind::Monopole,
        gravity: 1e-3,
        softening: 0.15,
        dt: 0.005,
        ..Default::default()
    };
    let mut rng = fastrand::Rng::with_seed(13);
    let mut positions = Vec::new();
    for _ in 0..10 {
        // Uniform in a 0.2-radius ball via rejection.
        loop {
            let p = [
                rng.f32() * 0.4 - 0.2,
                rng.f32() * 0.4 - 0.2,
                rng.f32() * 0.4 - 0.2,
            ];
            if p[0] * p[0] + p[1] * p[1] + p[2] * p[2] <= 0.04 {
                positions.extend_from_slice(&[p[0], p[1], p[2], 1.0]);
                break;
            }
        }
    }
    let init = ParticleInit::new(positions.clone()).unwrap();
    let sim = simulate(context, options, init, 50);

    let after = sim.read_positions();
    let initial_radius = mean_radius(&positions, 10);
    let final_radius = mean_radius(&after, 10);
    assert!(
        final_radius < initial_radius,
        "no contraction: {initial_radius} -> {final_radius}"
    );

    let com_before = center_of_mass(&positions, 10);
    let com_after = center_of_mass(&after, 10);
    let drift = ((com_after[0] - com_before[0]).powi(2)
        + (com_after[1] - com_before[1]).powi(2)
        + (com_after[2] - com_before[2]).powi(2))
    .sqrt();
    assert!(drift < 0.1, "center of mass drifted {drift}");
}

fn center_of_mass(quads: &[f32], count: usize) -> [f32; 3] {
    let mut com = [0.0f32; 3];
    let mut mass = 0.0f32;
    for quad in quads.chunks_exact(4).take(count) {
        for axis in 0..3 {
            com[axis] += quad[axis] * quad[3];
        }
        mass += quad[3];
    }
    com.map(|c| c / mass)
}

fn mean_radius(quads: &[f32], count: usize) -> f32 {
    let com = center_of_mass(quads, count);
    let sum: f32 = quads
        .chunks_exact(4)
        .take(count)
        .map(|quad| {
            ((quad[0] - com[0]).powi(2) + (quad[1] - com[1]).powi(2) + (quad[2] - com[2]).powi(2))
                .sqrt()
        })
        .sum();
    sum / count as f32
}

// Story: every solver, including the hybrid with an active near field,
// keeps all particle state finite over a long run.
#[test]
fn all_solvers_stay_finite() {
    let mut rng = fastrand::Rng::with_seed(99);
    let mut positions = Vec::new();
    let mut velocities = Vec::new();
    for i in 0..64 {
        positions.extend_from_slice(&[
            rng.f32() * 6.0 - 3.0,
            rng.f32() * 6.0 - 3.0,
            rng.f32() * 6.0 - 3.0,
            // Mix of zero, unit, and heavy masses.
            match i % 5 {
                0 => 0.0,
                4 => 50.0,
                _ => 1.0,
            },
        ]);
        velocities.extend_from_slice(&[
            rng.f32() * 2.0 - 1.0,
            rng.f32() * 2.0 - 1.0,
            rng.f32() * 2.0 - 1.0,
            0.0,
        ]);
    }

    for solver in [SolverKind::Monopole, SolverKind::Spectral, SolverKind::TreePm] {
        let Some(context) = context() else { return };
        let options = SimulationOptions {
            solver,
            split_sigma: 0.2,
            near_field_radius: 2,
            ..Default::default()
        };
        let init = ParticleInit::new(positions.clone())
            .unwrap()
            .with_velocities(velocities.clone())
            .unwrap();
        let sim = simulate(context, options, init, 100);
        assert_all_finite(&sim);
        assert_eq!(sim.frame_count(), 100);
    }
}

// Story: the periodic bounds estimator grows the world box as particles
// leave it.
#[test]
fn bounds_refresh_follows_particles() {
    let Some(context) = context() else { return };
    let options = SimulationOptions {
        solver: SolverKind::Monopole,
        gravity: 0.0,
        bounds_interval: 10,
        ..Default::default()
    };
    let init = ParticleInit::new(vec![0.0, 0.0, 0.0, 1.0])
        .unwrap()
        .with_velocities(vec![1.0, 0.0, 0.0, 0.0])
        .unwrap();
    let mut sim = Simulation::new(context, options, init).expect("construction");

    let initial_max = sim.world_bounds().unwrap().max.x;
    for _ in 0..25 {
        sim.step();
    }
    let final_max = sim.world_bounds().unwrap().max.x;
    assert!(
        final_max > initial_max,
        "bounds did not grow: {initial_max} -> {final_max}"
    );
}

// Story: profiling enabled is harmless whether or not timers exist, and
// whatever stats appear are finite.
#[test]
fn profiling_stats_are_sane() {
    let Some(context) = context() else { return };
    let options = SimulationOptions {
        solver: SolverKind::Spectral,
        enable_profiling: true,
        ..Default::default()
    };
    let init = ParticleInit::new(vec![0.1, 0.0, 0.0, 1.0, -0.1, 0.0, 0.0, 1.0]).unwrap();
    let mut sim = Simulation::new(context, options, init).expect("construction");
    for _ in 0..10 {
        sim.step();
    }
    for (label, ms) in sim.stats() {
        assert!(ms.is_finite() && ms >= 0.0, "{label}: {ms}");
    }
}
