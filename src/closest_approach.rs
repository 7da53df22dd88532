//! # Closest approach between a particle and a sensor
//!
//! Every hit is interpreted through the point of closest approach (POCA) between the particle
//! trajectory and a [`SensorLine`](crate::trajectory::SensorLine). [`ClosestApproach`] solves for
//! the pair of times `(tp, ts)` at which the separation `x_s(ts) - x_p(tp)` is perpendicular to
//! both velocities, by Newton iteration on the linearized problem:
//!
//! ```text
//! ddot  = p̂ · ŝ,            denom = 1 - ddot²
//! dtp   = (Δ·p̂ - (Δ·ŝ) ddot) / (denom · vp)
//! dts   = ((Δ·p̂) ddot - Δ·ŝ) / (denom · vs)
//! ```
//!
//! The iteration stops as soon as both time corrections fall below the requested precision.
//! Failure modes are reported in [`ClosestApproachStatus`] rather than as errors: nearly parallel
//! directions (`PocaFailed`), growing separation (`Diverged`), corrections alternating in sign
//! without shrinking (`Oscillating`), an unusable hint (`Invalid`) or an exhausted iteration
//! budget (`Unconverged`).
//!
//! ## Outputs
//! ------------
//! * `doca`: separation projected on the mutual normal `ŝ × p̂`, so its sign is stable through zero.
//! * `delta_t`: `ts - tp`.
//! * `d_doca_dpar`, `d_dt_dpar`: first derivatives with respect to the particle parameters, filled
//!   by [`ClosestApproach::with_derivatives`].
//!
//! ## See also
//! ------------
//! * [`crate::hits`] – measurements expressed through the closest approach.
//! * [`crate::material::StrawCrossing`] – material crossings located by the same solve.

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ParamMatrix, ParamVector, PARALLEL_LIMIT, POCA_MAX_ITERATIONS, POCA_PRECISION,
};
use crate::trajectory::{KinematicTrajectory, PieceTrajectory, SensorLine, Trajectory};

/// Number of consecutive bad iterations tolerated before declaring divergence or oscillation.
const BAD_ITERATION_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosestApproachStatus {
    Converged,
    Unconverged,
    Oscillating,
    Diverged,
    PocaFailed,
    Invalid,
}

impl ClosestApproachStatus {
    pub fn usable(self) -> bool {
        self == ClosestApproachStatus::Converged
    }
}

impl fmt::Display for ClosestApproachStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosestApproachStatus::Converged => "converged",
            ClosestApproachStatus::Unconverged => "unconverged",
            ClosestApproachStatus::Oscillating => "oscillating",
            ClosestApproachStatus::Diverged => "diverged",
            ClosestApproachStatus::PocaFailed => "pocafailed",
            ClosestApproachStatus::Invalid => "invalid",
        };
        write!(f, "{name}")
    }
}

/// Starting times for the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosestApproachHint {
    pub particle_time: f64,
    pub sensor_time: f64,
}

impl ClosestApproachHint {
    pub fn new(particle_time: f64, sensor_time: f64) -> Self {
        ClosestApproachHint {
            particle_time,
            sensor_time,
        }
    }

    /// Starting point for a sensor with no prior estimate: the middle of the sensor projected
    /// onto the particle trajectory, linearized at the middle of its range.
    pub fn from_projection<P: Trajectory>(particle: &P, sensor: &SensorLine) -> Self {
        let srange = sensor.range();
        let sensor_time = if srange.is_infinite() {
            sensor.t0()
        } else {
            srange.mid()
        };
        let target = sensor.position(sensor_time);
        let prange = particle.range();
        let t = if prange.is_infinite() { 0.0 } else { prange.mid() };
        let v = particle.velocity(t);
        let particle_time =
            prange.force_range(t + (target - particle.position(t)).dot(&v) / v.norm_squared());
        ClosestApproachHint {
            particle_time,
            sensor_time: srange.force_range(sensor.toca(&particle.position(particle_time))),
        }
    }
}

/// Convergence controls of the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosestApproachSettings {
    /// Time precision (ns) on both corrections.
    pub precision: f64,
    pub max_iterations: usize,
}

impl Default for ClosestApproachSettings {
    fn default() -> Self {
        ClosestApproachSettings {
            precision: POCA_PRECISION,
            max_iterations: POCA_MAX_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosestApproach {
    pub status: ClosestApproachStatus,
    pub iterations: usize,
    pub particle_toca: f64,
    pub sensor_toca: f64,
    pub particle_poca: Vector3<f64>,
    pub sensor_poca: Vector3<f64>,
    pub particle_dir: Vector3<f64>,
    pub sensor_dir: Vector3<f64>,
    /// Separation `sensor_poca - particle_poca`.
    pub delta: Vector3<f64>,
    pub doca: f64,
    pub dir_dot: f64,
    pub d_doca_dpar: ParamVector,
    pub d_dt_dpar: ParamVector,
}

fn hint_in_range(time: f64, begin: f64, end: f64) -> bool {
    time.is_finite() && time >= begin && time <= end
}

impl ClosestApproach {
    /// Solve the geometric closest approach, without parameter derivatives.
    pub fn new<P: Trajectory, S: Trajectory>(
        particle: &P,
        sensor: &S,
        hint: ClosestApproachHint,
        settings: &ClosestApproachSettings,
    ) -> Self {
        let prange = particle.range();
        let srange = sensor.range();
        let mut tp = hint.particle_time;
        let mut ts = hint.sensor_time;
        let mut status = ClosestApproachStatus::Unconverged;
        let mut iterations = 0;

        if !hint_in_range(tp, prange.begin, prange.end)
            || !hint_in_range(ts, srange.begin, srange.end)
        {
            status = ClosestApproachStatus::Invalid;
        } else {
            let mut prev_separation = f64::INFINITY;
            let mut prev_dtp = 0.0_f64;
            let mut growing = 0;
            let mut oscillating = 0;
            while iterations < settings.max_iterations {
                iterations += 1;
                let vp = particle.velocity(tp);
                let vs = sensor.velocity(ts);
                let (pspeed, sspeed) = (vp.norm(), vs.norm());
                let (pdir, sdir) = (vp / pspeed, vs / sspeed);
                let ddot = pdir.dot(&sdir);
                let denom = 1.0 - ddot * ddot;
                if !(denom >= PARALLEL_LIMIT) {
                    status = ClosestApproachStatus::PocaFailed;
                    break;
                }
                let delta = sensor.position(ts) - particle.position(tp);
                let pdd = delta.dot(&pdir);
                let sdd = delta.dot(&sdir);
                let dtp = (pdd - sdd * ddot) / (denom * pspeed);
                let dts = (pdd * ddot - sdd) / (denom * sspeed);
                tp += dtp;
                ts += dts;
                if dtp.abs() < settings.precision && dts.abs() < settings.precision {
                    status = ClosestApproachStatus::Converged;
                    break;
                }

                let separation = delta.norm();
                if separation > prev_separation * (1.0 + 1e-9) {
                    growing += 1;
                    if growing >= BAD_ITERATION_LIMIT {
                        status = ClosestApproachStatus::Diverged;
                        break;
                    }
                } else {
                    growing = 0;
                }
                prev_separation = separation;

                if dtp * prev_dtp < 0.0 && dtp.abs() >= prev_dtp.abs() {
                    oscillating += 1;
                    if oscillating >= BAD_ITERATION_LIMIT {
                        status = ClosestApproachStatus::Oscillating;
                        break;
                    }
                } else {
                    oscillating = 0;
                }
                prev_dtp = dtp;
            }
        }

        let particle_poca = particle.position(tp);
        let sensor_poca = sensor.position(ts);
        let particle_dir = particle.velocity(tp).normalize();
        let sensor_dir = sensor.velocity(ts).normalize();
        let delta = sensor_poca - particle_poca;
        let normal = sensor_dir.cross(&particle_dir);
        let normal_mag = normal.norm();
        let doca = if normal_mag > 0.0 {
            delta.dot(&normal) / normal_mag
        } else {
            delta.norm()
        };

        ClosestApproach {
            status,
            iterations,
            particle_toca: tp,
            sensor_toca: ts,
            particle_poca,
            sensor_poca,
            particle_dir,
            sensor_dir,
            delta,
            doca,
            dir_dot: particle_dir.dot(&sensor_dir),
            d_doca_dpar: ParamVector::zeros(),
            d_dt_dpar: ParamVector::zeros(),
        }
    }

    /// Solve and, when the solution is usable, fill the parameter derivatives of DOCA and Δt.
    pub fn with_derivatives<P: KinematicTrajectory, S: Trajectory>(
        particle: &P,
        sensor: &S,
        hint: ClosestApproachHint,
        settings: &ClosestApproachSettings,
    ) -> Self {
        let mut ca = Self::new(particle, sensor, hint, settings);
        if ca.usable() {
            let dxdp = particle.dx_dpar(ca.particle_toca);
            let normal = ca.sensor_dir.cross(&ca.particle_dir).normalize();
            ca.d_doca_dpar = -(dxdp.transpose() * normal);

            let vp = particle.velocity(ca.particle_toca);
            let vs = sensor.velocity(ca.sensor_toca);
            let (a, b, c) = (vp.norm_squared(), vp.dot(&vs), vs.norm_squared());
            let projector = (vp * (c - b) + vs * (a - b)) / (a * c - b * b);
            ca.d_dt_dpar = dxdp.transpose() * projector;
        }
        ca
    }

    /// Solve against a piecewise trajectory, moving to the piece covering the particle TOCA until
    /// the solution stays on the same piece.
    pub fn on_pieces<T: KinematicTrajectory, S: Trajectory>(
        pieces: &PieceTrajectory<T>,
        sensor: &S,
        hint: ClosestApproachHint,
        settings: &ClosestApproachSettings,
    ) -> Self {
        let solve = |hint: ClosestApproachHint| {
            let piece = pieces.nearest_piece(hint.particle_time);
            let start = ClosestApproachHint::new(
                piece.range().force_range(hint.particle_time),
                hint.sensor_time,
            );
            Self::with_derivatives(piece, sensor, start, settings)
        };
        let mut index = pieces.nearest_index(hint.particle_time);
        let mut ca = solve(hint);
        // bounded: each retry moves to a different piece
        for _ in 0..pieces.len() {
            if !ca.usable() {
                break;
            }
            let next = pieces.nearest_index(ca.particle_toca);
            if next == index {
                break;
            }
            index = next;
            ca = solve(ClosestApproachHint::new(ca.particle_toca, ca.sensor_toca));
        }
        ca
    }

    pub fn usable(&self) -> bool {
        self.status.usable()
    }

    /// `ts - tp`.
    pub fn delta_t(&self) -> f64 {
        self.sensor_toca - self.particle_toca
    }

    /// Variance of the DOCA given a parameter covariance.
    pub fn doca_variance(&self, covariance: &ParamMatrix) -> f64 {
        (self.d_doca_dpar.transpose() * covariance * self.d_doca_dpar)[(0, 0)]
    }
}

impl fmt::Display for ClosestApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClosestApproach {} after {} iterations: doca = {:.6} mm, tp = {:.6} ns, ts = {:.6} ns, dirdot = {:.4}",
            self.status,
            self.iterations,
            self.doca,
            self.particle_toca,
            self.sensor_toca,
            self.dir_dot
        )
    }
}

#[cfg(test)]
mod closest_approach_test {
    use super::*;
    use crate::constants::NPARAMS;
    use crate::time_range::TimeRange;
    use crate::trajectory::trajectory_test::{reference_state, unit_covariance};
    use crate::trajectory::{KinematicLine, LoopHelix, SensorLine};
    use approx::assert_relative_eq;

    fn helix() -> LoopHelix {
        LoopHelix::from_state(
            &reference_state(-1),
            Vector3::new(0.0, 0.0, 1.0),
            TimeRange::default(),
            unit_covariance(),
        )
        .unwrap()
    }

    /// Wire crossing the trajectory at `time`, displaced by `offset` along the mutual normal.
    fn wire_near<T: Trajectory>(traj: &T, time: f64, offset: f64) -> SensorLine {
        let wire_dir = Vector3::new(0.3, 1.0, 0.1).normalize();
        let normal = traj.velocity(time).cross(&wire_dir).normalize();
        SensorLine::new(
            traj.position(time) + normal * offset,
            0.0,
            wire_dir * 200.0,
            TimeRange::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_line_line_solution() {
        let particle = SensorLine::new(
            Vector3::zeros(),
            0.0,
            Vector3::new(100.0, 0.0, 0.0),
            TimeRange::default(),
        )
        .unwrap();
        let sensor = SensorLine::new(
            Vector3::new(50.0, -20.0, 3.0),
            0.0,
            Vector3::new(0.0, 150.0, 0.0),
            TimeRange::default(),
        )
        .unwrap();
        let ca = ClosestApproach::new(
            &particle,
            &sensor,
            ClosestApproachHint::new(0.0, 0.0),
            &ClosestApproachSettings::default(),
        );
        assert_eq!(ca.status, ClosestApproachStatus::Converged);
        assert_relative_eq!(ca.particle_toca, 0.5, epsilon = 1e-12);
        assert_relative_eq!(ca.sensor_toca, 20.0 / 150.0, epsilon = 1e-12);
        // ŝ × p̂ = ŷ × x̂ = -ẑ, separation is +3 ẑ
        assert_relative_eq!(ca.doca, -3.0, epsilon = 1e-12);
        assert_relative_eq!(ca.dir_dot, 0.0, epsilon = 1e-15);
        assert!(ca.iterations <= 3);
    }

    #[test]
    fn test_helix_wire_solution_is_perpendicular() {
        let h = helix();
        let wire = wire_near(&h, 5.0, 2.0);
        let ca = ClosestApproach::with_derivatives(
            &h,
            &wire,
            ClosestApproachHint::new(4.0, 0.3),
            &ClosestApproachSettings::default(),
        );
        assert!(ca.usable(), "{ca}");
        assert_relative_eq!(ca.delta.dot(&ca.particle_dir), 0.0, epsilon = 1e-6);
        assert_relative_eq!(ca.delta.dot(&ca.sensor_dir), 0.0, epsilon = 1e-6);
        assert_relative_eq!(ca.doca.abs(), ca.delta.norm(), epsilon = 1e-9);
        assert!(ca.doca < 0.0);
        assert!((ca.doca.abs() - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_doca_derivative_matches_finite_differences() {
        let h = helix();
        let wire = wire_near(&h, 5.0, 1.5);
        let settings = ClosestApproachSettings::default();
        let hint = ClosestApproachHint::new(5.0, 0.0);
        let ca = ClosestApproach::with_derivatives(&h, &wire, hint, &settings);
        assert!(ca.usable());
        for ipar in 0..NPARAMS {
            let step = 1e-6 * (1.0 + h.param_value(ipar).abs());
            let mut plus = h.clone();
            plus.params_mut().values[ipar] += step;
            let mut minus = h.clone();
            minus.params_mut().values[ipar] -= step;
            let hint = ClosestApproachHint::new(ca.particle_toca, ca.sensor_toca);
            let dp = ClosestApproach::new(&plus, &wire, hint, &settings).doca;
            let dm = ClosestApproach::new(&minus, &wire, hint, &settings).doca;
            let numeric = (dp - dm) / (2.0 * step);
            assert!(
                (numeric - ca.d_doca_dpar[ipar]).abs() < 1e-4 * (1.0 + numeric.abs()),
                "parameter {ipar}: numeric {numeric} analytic {}",
                ca.d_doca_dpar[ipar]
            );
        }
    }

    #[test]
    fn test_time_derivative_matches_finite_differences() {
        let line = KinematicLine::from_state(
            &reference_state(1),
            Vector3::zeros(),
            TimeRange::default(),
            unit_covariance(),
        )
        .unwrap();
        let wire = wire_near(&line, 3.0, 0.0);
        let settings = ClosestApproachSettings::default();
        let ca = ClosestApproach::with_derivatives(
            &line,
            &wire,
            ClosestApproachHint::new(3.0, 0.0),
            &settings,
        );
        assert!(ca.usable());
        for ipar in 0..NPARAMS {
            let step = 1e-6 * (1.0 + line.param_value(ipar).abs());
            let mut plus = line.clone();
            plus.params_mut().values[ipar] += step;
            let mut minus = line.clone();
            minus.params_mut().values[ipar] -= step;
            let hint = ClosestApproachHint::new(ca.particle_toca, ca.sensor_toca);
            let tp = ClosestApproach::new(&plus, &wire, hint, &settings).delta_t();
            let tm = ClosestApproach::new(&minus, &wire, hint, &settings).delta_t();
            let numeric = (tp - tm) / (2.0 * step);
            assert!(
                (numeric - ca.d_dt_dpar[ipar]).abs() < 1e-5 * (1.0 + numeric.abs()),
                "parameter {ipar}: numeric {numeric} analytic {}",
                ca.d_dt_dpar[ipar]
            );
        }
    }

    #[test]
    fn test_parallel_lines_fail() {
        let particle = SensorLine::new(
            Vector3::zeros(),
            0.0,
            Vector3::new(0.0, 0.0, 250.0),
            TimeRange::default(),
        )
        .unwrap();
        let sensor = SensorLine::new(
            Vector3::new(1.0, 0.0, 0.0),
            0.0,
            Vector3::new(0.0, 0.0, 200.0),
            TimeRange::default(),
        )
        .unwrap();
        let ca = ClosestApproach::new(
            &particle,
            &sensor,
            ClosestApproachHint::new(0.0, 0.0),
            &ClosestApproachSettings::default(),
        );
        assert_eq!(ca.status, ClosestApproachStatus::PocaFailed);
        assert!(!ca.usable());
    }

    #[test]
    fn test_hint_outside_range_is_invalid() {
        let h = helix();
        let wire = SensorLine::from_endpoints(
            Vector3::new(0.0, -100.0, 0.0),
            Vector3::new(0.0, 100.0, 0.0),
            10.0,
            200.0,
        )
        .unwrap();
        let ca = ClosestApproach::new(
            &h,
            &wire,
            ClosestApproachHint::new(0.0, 50.0),
            &ClosestApproachSettings::default(),
        );
        assert_eq!(ca.status, ClosestApproachStatus::Invalid);
        assert_eq!(ca.iterations, 0);
    }

    #[test]
    fn test_iteration_budget() {
        let h = helix();
        let wire = wire_near(&h, 5.0, 1.0);
        let settings = ClosestApproachSettings {
            precision: 1e-10,
            max_iterations: 1,
        };
        let ca = ClosestApproach::new(&h, &wire, ClosestApproachHint::new(-20.0, 3.0), &settings);
        assert_eq!(ca.status, ClosestApproachStatus::Unconverged);
        assert_eq!(ca.iterations, 1);
    }

    #[test]
    fn test_on_pieces_moves_to_covering_piece() {
        let first = LoopHelix::from_state(
            &reference_state(-1),
            Vector3::new(0.0, 0.0, 1.0),
            TimeRange::new(-50.0, 50.0),
            unit_covariance(),
        )
        .unwrap();
        let mut second = first.clone();
        second.set_range(TimeRange::new(2.0, 50.0));
        second.params_mut().values[LoopHelix::CX] += 0.2;
        let mut pieces = PieceTrajectory::new(first);
        pieces.append(second.clone()).unwrap();

        let wire = wire_near(&second, 2.6, 1.0);
        let ca = ClosestApproach::on_pieces(
            &pieces,
            &wire,
            ClosestApproachHint::new(1.8, 0.0),
            &ClosestApproachSettings::default(),
        );
        assert!(ca.usable(), "{ca}");
        assert_eq!(pieces.nearest_index(ca.particle_toca), 1);
        let direct = ClosestApproach::with_derivatives(
            &second,
            &wire,
            ClosestApproachHint::new(2.6, 0.0),
            &ClosestApproachSettings::default(),
        );
        assert_relative_eq!(ca.doca, direct.doca, epsilon = 1e-9);
        assert_relative_eq!(ca.particle_toca, direct.particle_toca, epsilon = 1e-8);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ClosestApproachStatus::PocaFailed.to_string(), "pocafailed");
        assert!(ClosestApproachStatus::Converged.usable());
        assert!(!ClosestApproachStatus::Oscillating.usable());
    }
}
