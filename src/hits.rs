//! # Measurements
//!
//! A hit is a measurement made by a sensor, related to the particle trajectory through the
//! closest approach between the trajectory and the sensor's [`SensorLine`]. Every hit reduces
//! to one or more scalar [`Residual`]s: `measured - predicted`, their variance, the particle time
//! at which they are evaluated and the derivative of the *prediction* with respect to the
//! trajectory parameters.
//!
//! Two kinds of hits are provided:
//!
//! * [`DistanceHit`]: a drift-cell measurement of the distance to the wire, signed by a
//!   [`WireAmbiguity`]. With the ambiguity unresolved (`Null`) the hit measures zero distance
//!   with an inflated variance.
//! * [`TimeHit`]: a timing measurement (scintillator, resistive plate), comparing the clock of the
//!   sensor line with the particle time at the closest approach.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::closest_approach::{ClosestApproach, ClosestApproachHint, ClosestApproachSettings};
use crate::constants::ParamVector;
use crate::fit::MetaIterationConfig;
use crate::trajectory::{KinematicTrajectory, PieceTrajectory, SensorLine, Trajectory};

/// Linearized measurement residual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Residual {
    /// `measured - predicted`.
    pub value: f64,
    /// Nominal measurement variance.
    pub variance: f64,
    /// Particle time at which the residual is evaluated.
    pub time: f64,
    /// Derivative of the predicted value with respect to the parameters.
    pub dr_dpar: ParamVector,
}

impl Default for Residual {
    fn default() -> Self {
        Residual {
            value: 0.0,
            variance: 1.0,
            time: 0.0,
            dr_dpar: ParamVector::zeros(),
        }
    }
}

impl Residual {
    pub fn new(value: f64, variance: f64, time: f64, dr_dpar: ParamVector) -> Self {
        Residual {
            value,
            variance,
            time,
            dr_dpar,
        }
    }

    /// Residual in units of its nominal uncertainty.
    pub fn pull(&self) -> f64 {
        self.value / self.variance.sqrt()
    }
}

impl fmt::Display for Residual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Residual {:.6} ± {:.6} at t = {:.4} ns",
            self.value,
            self.variance.sqrt(),
            self.time
        )
    }
}

/// A measurement usable by the fit.
///
/// The closest approach to the sensor is solved by the fit and handed to the hit, which turns
/// it into a [`Residual`]. Hits are owned by the fit as boxed trait objects.
pub trait Hit<T: KinematicTrajectory>: fmt::Debug + Send {
    fn sensor(&self) -> &SensorLine;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Degrees of freedom contributed by the hit.
    fn ndof(&self) -> usize {
        1
    }

    /// Starting point of the first closest-approach solve.
    fn hint(&self, reference: &PieceTrajectory<T>) -> ClosestApproachHint {
        ClosestApproachHint::from_projection(reference, self.sensor())
    }

    fn closest_approach(
        &self,
        reference: &PieceTrajectory<T>,
        hint: ClosestApproachHint,
        settings: &ClosestApproachSettings,
    ) -> ClosestApproach {
        ClosestApproach::on_pieces(reference, self.sensor(), hint, settings)
    }

    /// Residual for a usable closest approach.
    fn residual(&self, approach: &ClosestApproach) -> Residual;

    /// Refresh the internal state of the hit from the current closest approach.
    fn update(&mut self, approach: &ClosestApproach, config: &MetaIterationConfig);
}

/// Hint built from a particle time estimate, falling back on the projection of the sensor.
fn time_hint<T: KinematicTrajectory>(
    reference: &PieceTrajectory<T>,
    sensor: &SensorLine,
    time: Option<f64>,
) -> ClosestApproachHint {
    match time {
        Some(t) => {
            let particle_time = reference.range().force_range(t);
            let sensor_time = sensor
                .range()
                .force_range(sensor.toca(&reference.position(particle_time)));
            ClosestApproachHint::new(particle_time, sensor_time)
        }
        None => ClosestApproachHint::from_projection(reference, sensor),
    }
}

/// Side of the wire on which the particle passed, in the sign convention of
/// [`ClosestApproach::doca`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireAmbiguity {
    Left,
    Null,
    Right,
}

impl WireAmbiguity {
    pub fn sign(self) -> f64 {
        match self {
            WireAmbiguity::Left => -1.0,
            WireAmbiguity::Null => 0.0,
            WireAmbiguity::Right => 1.0,
        }
    }

    pub fn from_doca(doca: f64) -> Self {
        if doca < 0.0 {
            WireAmbiguity::Left
        } else {
            WireAmbiguity::Right
        }
    }
}

impl fmt::Display for WireAmbiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireAmbiguity::Left => "left",
            WireAmbiguity::Null => "null",
            WireAmbiguity::Right => "right",
        };
        write!(f, "{name}")
    }
}

/// Drift distance measured to a wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceHit {
    wire: SensorLine,
    /// Unsigned drift distance (mm).
    distance: f64,
    variance: f64,
    /// Variance used while the ambiguity is `Null`.
    null_variance: f64,
    ambiguity: WireAmbiguity,
    /// Reference DOCA magnitude below which the ambiguity is left unresolved on update.
    ambiguity_threshold: f64,
    time_estimate: Option<f64>,
    active: bool,
}

impl DistanceHit {
    pub fn new(wire: SensorLine, distance: f64, variance: f64, ambiguity: WireAmbiguity) -> Self {
        DistanceHit {
            wire,
            distance: distance.abs(),
            variance,
            null_variance: distance * distance + variance,
            ambiguity,
            ambiguity_threshold: variance.sqrt(),
            time_estimate: None,
            active: true,
        }
    }

    pub fn with_null_variance(mut self, null_variance: f64) -> Self {
        self.null_variance = null_variance;
        self
    }

    pub fn with_ambiguity_threshold(mut self, threshold: f64) -> Self {
        self.ambiguity_threshold = threshold;
        self
    }

    /// Estimate of the particle time at the wire, used to start the first solve.
    pub fn with_time_estimate(mut self, time: f64) -> Self {
        self.time_estimate = Some(time);
        self
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn ambiguity(&self) -> WireAmbiguity {
        self.ambiguity
    }

    pub fn set_ambiguity(&mut self, ambiguity: WireAmbiguity) {
        self.ambiguity = ambiguity;
    }

    /// Signed measured distance.
    pub fn signed_distance(&self) -> f64 {
        self.ambiguity.sign() * self.distance
    }
}

impl<T: KinematicTrajectory> Hit<T> for DistanceHit {
    fn sensor(&self) -> &SensorLine {
        &self.wire
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn hint(&self, reference: &PieceTrajectory<T>) -> ClosestApproachHint {
        time_hint(reference, &self.wire, self.time_estimate)
    }

    fn residual(&self, approach: &ClosestApproach) -> Residual {
        let variance = match self.ambiguity {
            WireAmbiguity::Null => self.null_variance,
            _ => self.variance,
        };
        Residual::new(
            self.signed_distance() - approach.doca,
            variance,
            approach.particle_toca,
            approach.d_doca_dpar,
        )
    }

    fn update(&mut self, approach: &ClosestApproach, _config: &MetaIterationConfig) {
        self.ambiguity = if approach.doca.abs() > self.ambiguity_threshold {
            WireAmbiguity::from_doca(approach.doca)
        } else {
            WireAmbiguity::Null
        };
    }
}

impl fmt::Display for DistanceHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DistanceHit {:.4} ± {:.4} mm ({}) on {}",
            self.distance,
            self.variance.sqrt(),
            self.ambiguity,
            self.wire
        )
    }
}

/// Time measured by a sensor whose signal propagates along a [`SensorLine`].
///
/// The line carries the measurement: its clock gives the time at which the signal left each
/// point. The residual is the difference between the sensor clock and the particle time at the
/// closest approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHit {
    line: SensorLine,
    variance: f64,
    time_estimate: Option<f64>,
    active: bool,
}

impl TimeHit {
    pub fn new(line: SensorLine, variance: f64) -> Self {
        TimeHit {
            line,
            variance,
            time_estimate: None,
            active: true,
        }
    }

    pub fn with_time_estimate(mut self, time: f64) -> Self {
        self.time_estimate = Some(time);
        self
    }
}

impl<T: KinematicTrajectory> Hit<T> for TimeHit {
    fn sensor(&self) -> &SensorLine {
        &self.line
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn hint(&self, reference: &PieceTrajectory<T>) -> ClosestApproachHint {
        time_hint(reference, &self.line, self.time_estimate)
    }

    fn residual(&self, approach: &ClosestApproach) -> Residual {
        Residual::new(
            approach.delta_t(),
            self.variance,
            approach.particle_toca,
            -approach.d_dt_dpar,
        )
    }

    fn update(&mut self, _approach: &ClosestApproach, _config: &MetaIterationConfig) {}
}

impl fmt::Display for TimeHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimeHit ± {:.4} ns on {}",
            self.variance.sqrt(),
            self.line
        )
    }
}

#[cfg(test)]
mod hits_test {
    use super::*;
    use crate::time_range::TimeRange;
    use crate::trajectory::KinematicLine;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use crate::constants::{ParamMatrix, MUON_MASS};
    use crate::particle_state::ParticleState;

    fn line() -> PieceTrajectory<KinematicLine> {
        let state = ParticleState::new(
            Vector3::zeros(),
            0.0,
            Vector3::new(0.0, 100.0, 0.0),
            MUON_MASS,
            -1,
        );
        let traj = KinematicLine::from_state(
            &state,
            Vector3::zeros(),
            TimeRange::new(-10.0, 10.0),
            ParamMatrix::identity() * 1e-2,
        )
        .unwrap();
        PieceTrajectory::new(traj)
    }

    /// Wire along z crossing the x axis at `x`.
    fn wire(x: f64) -> SensorLine {
        SensorLine::from_endpoints(
            Vector3::new(x, 50.0, -500.0),
            Vector3::new(x, 50.0, 500.0),
            20.0,
            200.0,
        )
        .unwrap()
    }

    fn solve(hit: &dyn Hit<KinematicLine>) -> ClosestApproach {
        let reference = line();
        let hint = hit.hint(&reference);
        hit.closest_approach(&reference, hint, &ClosestApproachSettings::default())
    }

    #[test]
    fn test_distance_residual_uses_signed_doca() {
        let ca_wire = wire(2.0);
        let probe = DistanceHit::new(ca_wire, 2.0, 0.01, WireAmbiguity::Null);
        let ca = solve(&probe);
        assert!(ca.usable());
        assert_relative_eq!(ca.doca.abs(), 2.0, epsilon = 1e-9);

        let hit = DistanceHit::new(ca_wire, 1.9, 0.01, WireAmbiguity::from_doca(ca.doca));
        let resid = Hit::<KinematicLine>::residual(&hit, &ca);
        assert_relative_eq!(resid.value, ca.doca.signum() * 1.9 - ca.doca, epsilon = 1e-12);
        assert_relative_eq!(resid.value.abs(), 0.1, epsilon = 1e-9);
        assert_eq!(resid.dr_dpar, ca.d_doca_dpar);
        assert_eq!(resid.variance, 0.01);
        assert_relative_eq!(resid.time, ca.particle_toca);
    }

    #[test]
    fn test_null_ambiguity_inflates_variance() {
        let hit = DistanceHit::new(wire(0.3), 0.3, 0.01, WireAmbiguity::Null);
        let ca = solve(&hit);
        let resid = Hit::<KinematicLine>::residual(&hit, &ca);
        assert_relative_eq!(resid.value, -ca.doca, epsilon = 1e-12);
        assert_relative_eq!(resid.variance, 0.09 + 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_update_resolves_ambiguity() {
        let mut hit = DistanceHit::new(wire(-3.0), 3.0, 0.01, WireAmbiguity::Null);
        let ca = solve(&hit);
        Hit::<KinematicLine>::update(&mut hit, &ca, &MetaIterationConfig::default());
        assert_eq!(hit.ambiguity(), WireAmbiguity::from_doca(ca.doca));
        assert_ne!(hit.ambiguity(), WireAmbiguity::Null);

        let mut close = DistanceHit::new(wire(0.05), 0.05, 0.01, WireAmbiguity::Right);
        let ca = solve(&close);
        Hit::<KinematicLine>::update(&mut close, &ca, &MetaIterationConfig::default());
        assert_eq!(close.ambiguity(), WireAmbiguity::Null);
    }

    #[test]
    fn test_time_residual() {
        // signal leaves the crossing point 1.5 ns after the particle passes it
        let crossing = Vector3::new(0.0, 50.0, 0.0);
        let readout = Vector3::new(0.0, 50.0, 400.0);
        let t_particle = 50.0 / line().front().speed(0.0);
        let t_readout = t_particle + 1.5 + 400.0 / 150.0;
        let sensor = SensorLine::from_endpoints(
            Vector3::new(0.0, 50.0, -400.0),
            readout,
            t_readout,
            150.0,
        )
        .unwrap();
        assert_relative_eq!(sensor.toca(&crossing), t_particle + 1.5, epsilon = 1e-9);

        let hit = TimeHit::new(sensor, 0.04).with_time_estimate(t_particle);
        let ca = solve(&hit);
        assert!(ca.usable());
        let resid = Hit::<KinematicLine>::residual(&hit, &ca);
        assert_relative_eq!(resid.value, 1.5, epsilon = 1e-6);
        assert_eq!(resid.dr_dpar, -ca.d_dt_dpar);
        assert_eq!(Hit::<KinematicLine>::ndof(&hit), 1);
    }

    #[test]
    fn test_time_estimate_hint() {
        let hit =
            DistanceHit::new(wire(1.0), 1.0, 0.01, WireAmbiguity::Right).with_time_estimate(25.0);
        let hint = Hit::<KinematicLine>::hint(&hit, &line());
        assert_eq!(hint.particle_time, 10.0);
        assert!(wire(1.0).range().in_range(hint.sensor_time) || hint.sensor_time == 20.0);
    }
}
