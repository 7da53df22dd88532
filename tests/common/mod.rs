#![allow(dead_code)]

use std::f64::consts::TAU;

use kinfit::constants::{ParamMatrix, ParamVector, MUON_MASS};
use kinfit::hits::{DistanceHit, Hit, TimeHit, WireAmbiguity};
use kinfit::material::{CrossingGeometry, StrawMaterial};
use kinfit::parameters::Parameters;
use kinfit::particle_state::ParticleState;
use kinfit::time_range::TimeRange;
use kinfit::trajectory::{
    KinematicLine, KinematicTrajectory, LoopHelix, MomentumBasis, SensorLine, Trajectory,
};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Drift distance resolution, (0.1 mm)²
pub const DRIFT_VARIANCE: f64 = 0.01;
/// Time resolution of the time sensors, (0.1 ns)²
pub const TIME_VARIANCE: f64 = 0.01;
pub const WIRE_HALF_LENGTH: f64 = 500.0;
/// Signal propagation speed along the wires, mm/ns
pub const SIGNAL_SPEED: f64 = 200.0;
pub const STRAW_RADIUS: f64 = 2.5;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn field() -> Vector3<f64> {
    Vector3::new(0.0, 0.0, 1.0)
}

/// Negative muon of 105 MeV/c, cosθ = 0.7, in a 1 T field along z.
pub fn truth_helix() -> LoopHelix {
    let (mom, cost, phi): (f64, f64, f64) = (105.0, 0.7, 0.5);
    let sint = (1.0 - cost * cost).sqrt();
    let momentum = Vector3::new(mom * sint * phi.cos(), mom * sint * phi.sin(), mom * cost);
    let state = ParticleState::new(Vector3::new(12.0, -7.0, 100.0), 0.0, momentum, MUON_MASS, -1);
    LoopHelix::from_state(
        &state,
        field(),
        TimeRange::new(-5.0, 5.0),
        ParamMatrix::identity(),
    )
    .unwrap()
}

/// Muon of 100 MeV/c along y without field.
pub fn truth_line() -> KinematicLine {
    let state = ParticleState::new(
        Vector3::zeros(),
        0.0,
        Vector3::new(0.0, 100.0, 0.0),
        MUON_MASS,
        -1,
    );
    KinematicLine::from_state(
        &state,
        Vector3::zeros(),
        TimeRange::new(-1.0, 2.0),
        ParamMatrix::identity() * 1e-2,
    )
    .unwrap()
}

/// Copy of `truth` with its parameters shifted by gaussian noise of width `sigmas`, and the
/// matching diagonal covariance.
pub fn smeared_seed<T: KinematicTrajectory>(truth: &T, sigmas: &ParamVector, rng: &mut StdRng) -> T {
    let noise = ParamVector::from_fn(|i, _| {
        let n: f64 = StandardNormal.sample(rng);
        n * sigmas[i]
    });
    let covariance = ParamMatrix::from_diagonal(&sigmas.component_mul(sigmas));
    truth.with_params(Parameters::new(truth.params().values + noise, covariance))
}

/// A wire passed by the true trajectory at a known signed distance and time.
#[derive(Debug, Clone, Copy)]
pub struct ToyWire {
    pub line: SensorLine,
    pub time: f64,
    pub doca: f64,
}

/// Wire perpendicular to the true momentum at `time`, rotated by `angle` around it, passing at
/// signed distance `doca`.
pub fn toy_wire<T: KinematicTrajectory>(truth: &T, time: f64, angle: f64, doca: f64) -> ToyWire {
    let pdir = truth.direction(time, MomentumBasis::MomDir);
    let wdir = truth.direction(time, MomentumBasis::PerpDir) * angle.cos()
        + truth.direction(time, MomentumBasis::PhiDir) * angle.sin();
    let normal = wdir.cross(&pdir).normalize();
    let center = truth.position(time) + normal * doca;
    let line = SensorLine::from_endpoints(
        center - wdir * WIRE_HALF_LENGTH,
        center + wdir * WIRE_HALF_LENGTH,
        time + 10.0,
        SIGNAL_SPEED,
    )
    .unwrap();
    ToyWire { line, time, doca }
}

/// Wires evenly spaced in time over `[begin, end]`, with stereo angles cycling by 120°.
pub fn toy_wires<T: KinematicTrajectory>(
    truth: &T,
    nwires: usize,
    begin: f64,
    end: f64,
    rng: &mut StdRng,
) -> Vec<ToyWire> {
    (0..nwires)
        .map(|i| {
            let time = begin + (end - begin) * i as f64 / (nwires - 1).max(1) as f64;
            let angle = TAU * (i % 3) as f64 / 3.0;
            let mut doca = rng.random_range(0.5..2.2);
            if rng.random::<bool>() {
                doca = -doca;
            }
            toy_wire(truth, time, angle, doca)
        })
        .collect()
}

/// Drift hits on the wires, with gaussian resolution when `smear` is set.
pub fn distance_hits<T: KinematicTrajectory>(
    wires: &[ToyWire],
    smear: bool,
    rng: &mut StdRng,
) -> Vec<Box<dyn Hit<T>>> {
    wires
        .iter()
        .map(|wire| {
            let noise: f64 = if smear {
                let n: f64 = StandardNormal.sample(rng);
                n * DRIFT_VARIANCE.sqrt()
            } else {
                0.0
            };
            let hit = DistanceHit::new(
                wire.line,
                wire.doca.abs() + noise,
                DRIFT_VARIANCE,
                WireAmbiguity::from_doca(wire.doca),
            )
            .with_time_estimate(wire.time);
            Box::new(hit) as Box<dyn Hit<T>>
        })
        .collect()
}

/// Time sensors crossed by the true trajectory at the given times, their clock smeared by the
/// time resolution.
pub fn time_hits<T: KinematicTrajectory>(
    truth: &T,
    times: &[f64],
    rng: &mut StdRng,
) -> Vec<Box<dyn Hit<T>>> {
    times
        .iter()
        .map(|&time| {
            let n: f64 = StandardNormal.sample(rng);
            let clock = time + n * TIME_VARIANCE.sqrt();
            let pdir = truth.direction(time, MomentumBasis::MomDir);
            let sdir = truth.direction(time, MomentumBasis::PhiDir);
            let origin = truth.position(time) + sdir.cross(&pdir).normalize();
            let half = WIRE_HALF_LENGTH / SIGNAL_SPEED;
            let line = SensorLine::new(
                origin,
                clock,
                sdir * SIGNAL_SPEED,
                TimeRange::new(clock - half, clock + half),
            )
            .unwrap();
            Box::new(TimeHit::new(line, TIME_VARIANCE).with_time_estimate(time)) as Box<dyn Hit<T>>
        })
        .collect()
}

/// Straws around the wires.
pub fn straws(wires: &[ToyWire]) -> Vec<CrossingGeometry> {
    wires
        .iter()
        .map(|wire| {
            CrossingGeometry::straw_near(
                wire.line,
                StrawMaterial::mylar_straw(STRAW_RADIUS, 0.015),
                wire.time,
            )
        })
        .collect()
}

/// Mean and standard deviation.
pub fn mean_and_sigma(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}
