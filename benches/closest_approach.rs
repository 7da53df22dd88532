use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kinfit::closest_approach::{ClosestApproach, ClosestApproachHint, ClosestApproachSettings};
use kinfit::constants::{ParamMatrix, MUON_MASS};
use kinfit::particle_state::ParticleState;
use kinfit::time_range::TimeRange;
use kinfit::trajectory::{LoopHelix, MomentumBasis, SensorLine, Trajectory};

fn helix() -> LoopHelix {
    let state = ParticleState::new(
        Vector3::new(12.0, -7.0, 100.0),
        0.0,
        Vector3::new(65.0, 35.0, 73.0),
        MUON_MASS,
        -1,
    );
    LoopHelix::from_state(
        &state,
        Vector3::new(0.0, 0.0, 1.0),
        TimeRange::new(-5.0, 5.0),
        ParamMatrix::identity(),
    )
    .expect("valid helix")
}

/// Wire perpendicular to the helix at `time`, passing at `doca`, with a hint off by a few
/// hundred picoseconds.
fn wire_case(
    helix: &LoopHelix,
    time: f64,
    doca: f64,
    rng: &mut StdRng,
) -> (SensorLine, ClosestApproachHint) {
    let pdir = helix.direction(time, MomentumBasis::MomDir);
    let wdir = helix.direction(time, MomentumBasis::PerpDir);
    let center = helix.position(time) + wdir.cross(&pdir).normalize() * doca;
    let wire = SensorLine::from_endpoints(
        center - wdir * 500.0,
        center + wdir * 500.0,
        time + 10.0,
        200.0,
    )
    .expect("valid wire");
    let hint = ClosestApproachHint::new(time + rng.random_range(-0.3..0.3), time + 7.5);
    (wire, hint)
}

/// Closest approach of a helix and a wire, with parameter derivatives.
fn bench_helix_wire(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let helix = helix();
    let settings = ClosestApproachSettings::default();
    let samples = 1_000usize;

    c.bench_function("closest_approach/helix_wire", |b| {
        b.iter_batched(
            || {
                (0..samples)
                    .map(|_| {
                        let time = rng.random_range(-4.5..4.5);
                        let doca = rng.random_range(-2.5..2.5);
                        wire_case(&helix, time, doca, &mut rng)
                    })
                    .collect::<Vec<_>>()
            },
            |cases| {
                for (wire, hint) in &cases {
                    let ca = ClosestApproach::with_derivatives(
                        black_box(&helix),
                        black_box(wire),
                        *hint,
                        &settings,
                    );
                    black_box(ca.doca);
                }
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_helix_wire);
criterion_main!(benches);
