//! Headless demo: a cold cluster collapsing under the monopole solver.
//!
//!     cargo run --example cluster -- [monopole|spectral|treepm]

use pointgravity::{ParticleInit, RenderContext, Simulation, SimulationOptions, SolverKind};

fn main() {
    let solver = match std::env::args().nth(1).as_deref() {
        Some("spectral") => SolverKind::Spectral,
        Some("treepm") => SolverKind::TreePm,
        _ => SolverKind::Monopole,
    };

    let context = RenderContext::new_blocking().expect("GPU context");

    let mut rng = fastrand::Rng::with_seed(42);
    let count = 4096;
    let mut positions = Vec::with_capacity(count * 4);
    for _ in 0..count {
        // Uniform ball of radius 1 by rejection.
        loop {
            let p = [
                rng.f32() * 2.0 - 1.0,
                rng.f32() * 2.0 - 1.0,
                rng.f32() * 2.0 - 1.0,
            ];
            if p[0] * p[0] + p[1] * p[1] + p[2] * p[2] <= 1.0 {
                positions.extend_from_slice(&[p[0], p[1], p[2], 1.0]);
                break;
            }
        }
    }

    let options = SimulationOptions {
        solver,
        gravity: 1e-5,
        split_sigma: 0.15,
        enable_profiling: true,
        ..Default::default()
    };
    let mut sim = Simulation::new(context, options, ParticleInit::new(positions).unwrap())
        .expect("simulation");

    println!("{count} particles, {solver:?} solver");
    for frame in 0..600u32 {
        sim.step();
        if frame % 100 == 99 {
            let quads = sim.read_positions();
            let radius: f32 = quads
                .chunks_exact(4)
                .take(count)
                .map(|q| (q[0] * q[0] + q[1] * q[1] + q[2] * q[2]).sqrt())
                .sum::<f32>()
                / count as f32;
            println!("frame {:4}  mean radius {radius:.4}", frame + 1);
        }
    }

    let stats = sim.stats();
    if !stats.is_empty() {
        let mut entries: Vec<_> = stats.into_iter().collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        println!("\npass timings (avg ms):");
        for (label, ms) in entries {
            println!("  {label:<20} {ms:.3}");
        }
    }
}
