//! Constant-velocity lines describing sensor geometry.
//!
//! A [`SensorLine`] is a point moving at constant velocity: for a drift cell it is the wire,
//! traversed at the signal propagation speed, for a scintillator it is the light path to the
//! photodetector. It is the `sensor` side of every closest-approach solve.

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::kinfit_errors::KinFitError;
use crate::time_range::TimeRange;
use crate::trajectory::{momentum_basis, MomentumBasis, Trajectory};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorLine {
    origin: Vector3<f64>,
    t0: f64,
    velocity: Vector3<f64>,
    range: TimeRange,
}

impl SensorLine {
    /// Line passing through `origin` at time `t0`.
    pub fn new(
        origin: Vector3<f64>,
        t0: f64,
        velocity: Vector3<f64>,
        range: TimeRange,
    ) -> Result<Self, KinFitError> {
        let speed = velocity.norm();
        if !speed.is_finite() || speed <= 0.0 {
            return Err(KinFitError::DegenerateState("sensor line speed must be positive"));
        }
        Ok(SensorLine {
            origin,
            t0,
            velocity,
            range,
        })
    }

    /// Signal line running from `end` towards `readout` at `speed`, reaching the readout at
    /// `t_readout`. The range covers the full length of the line.
    pub fn from_endpoints(
        end: Vector3<f64>,
        readout: Vector3<f64>,
        t_readout: f64,
        speed: f64,
    ) -> Result<Self, KinFitError> {
        let span = readout - end;
        let length = span.norm();
        if length <= 0.0 {
            return Err(KinFitError::DegenerateState("sensor line has zero length"));
        }
        let velocity = span * (speed / length);
        let t_end = t_readout - length / speed;
        Self::new(readout, t_readout, velocity, TimeRange::new(t_end, t_readout))
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn unit_direction(&self) -> Vector3<f64> {
        self.velocity.normalize()
    }

    /// Length of the line covered by its time range.
    pub fn length(&self) -> f64 {
        if self.range.is_infinite() {
            f64::INFINITY
        } else {
            self.range.span() * self.velocity.norm()
        }
    }

    /// Time at which the line passes closest to `point`.
    pub fn toca(&self, point: &Vector3<f64>) -> f64 {
        let speed = self.velocity.norm();
        self.t0 + (point - self.origin).dot(&self.velocity) / (speed * speed)
    }
}

impl Trajectory for SensorLine {
    fn position(&self, time: f64) -> Vector3<f64> {
        self.origin + self.velocity * (time - self.t0)
    }

    fn velocity(&self, _time: f64) -> Vector3<f64> {
        self.velocity
    }

    fn direction(&self, _time: f64, basis: MomentumBasis) -> Vector3<f64> {
        momentum_basis(&self.velocity)[basis.index()]
    }

    fn range(&self) -> TimeRange {
        self.range
    }
}

impl fmt::Display for SensorLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (o, v) = (self.origin, self.velocity);
        write!(
            f,
            "SensorLine origin = ({:.3}, {:.3}, {:.3}) mm at t0 = {:.4} ns, velocity = ({:.3}, {:.3}, {:.3}) mm/ns, range = {}",
            o.x, o.y, o.z, self.t0, v.x, v.y, v.z, self.range
        )
    }
}
