//! # Phase-space state of a charged particle
//!
//! [`ParticleState`] is the physical, parametrization-independent description of a particle at
//! one instant: position, time, momentum, mass and charge. Trajectory parametrizations are built
//! from it and can always be evaluated back into it.
//!
//! [`ParticleStateMeasurement`] adds a 6×6 covariance on the (position, momentum) phase-space
//! vector, ordered `[x, y, z, px, py, pz]`.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{StateMatrix, StateVector, C_LIGHT};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleState {
    pub position: Vector3<f64>,
    pub time: f64,
    pub momentum: Vector3<f64>,
    pub mass: f64,
    pub charge: i32,
}

impl ParticleState {
    pub fn new(
        position: Vector3<f64>,
        time: f64,
        momentum: Vector3<f64>,
        mass: f64,
        charge: i32,
    ) -> Self {
        ParticleState {
            position,
            time,
            momentum,
            mass,
            charge,
        }
    }

    /// Phase-space vector `[x, y, z, px, py, pz]`.
    pub fn state_vector(&self) -> StateVector {
        StateVector::new(
            self.position.x,
            self.position.y,
            self.position.z,
            self.momentum.x,
            self.momentum.y,
            self.momentum.z,
        )
    }

    pub fn momentum_mag(&self) -> f64 {
        self.momentum.norm()
    }

    pub fn energy(&self) -> f64 {
        (self.momentum.norm_squared() + self.mass * self.mass).sqrt()
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.momentum * (C_LIGHT / self.energy())
    }

    pub fn speed(&self) -> f64 {
        C_LIGHT * self.momentum_mag() / self.energy()
    }

    pub fn beta(&self) -> f64 {
        self.momentum_mag() / self.energy()
    }

    pub fn gamma(&self) -> f64 {
        self.energy() / self.mass
    }

    /// Same point in space, seen by the charge-conjugate particle running backwards in time.
    pub fn invert_ct(&self) -> Self {
        ParticleState {
            position: self.position,
            time: -self.time,
            momentum: -self.momentum,
            mass: self.mass,
            charge: -self.charge,
        }
    }
}

/// A [`ParticleState`] with its phase-space covariance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleStateMeasurement {
    pub state: ParticleState,
    pub covariance: StateMatrix,
}

impl ParticleStateMeasurement {
    pub fn new(state: ParticleState, covariance: StateMatrix) -> Self {
        ParticleStateMeasurement { state, covariance }
    }

    /// Position uncertainty along a unit direction.
    pub fn position_sigma(&self, dir: &Vector3<f64>) -> f64 {
        let cov = self.covariance.fixed_view::<3, 3>(0, 0);
        (dir.transpose() * cov * dir)[(0, 0)].max(0.0).sqrt()
    }

    /// Momentum uncertainty along a unit direction.
    pub fn momentum_sigma(&self, dir: &Vector3<f64>) -> f64 {
        let cov = self.covariance.fixed_view::<3, 3>(3, 3);
        (dir.transpose() * cov * dir)[(0, 0)].max(0.0).sqrt()
    }
}
