//! # Magnetic field description
//!
//! Trajectory parametrizations assume a constant *nominal* field. The true field seen by the
//! particle is provided through the [`FieldMap`] trait, and the [`FieldIntegrator`] measures how
//! far the two disagree along a trajectory.
//!
//! Two analytic providers are included:
//!
//! * [`UniformField`]: the same vector everywhere.
//! * [`GradientField`]: an axial field varying linearly along z, with the radial component
//!   required by `∇·B = 0`.
//!
//! Field maps are shared read-only between fits, hence the `Send + Sync` bound.

pub mod integrator;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use integrator::FieldIntegrator;

pub trait FieldMap: Send + Sync {
    /// Field vector (Tesla) at a position (mm).
    fn field_at(&self, position: &Vector3<f64>) -> Vector3<f64>;

    /// Rate of change of the field (Tesla/ns) seen by a particle at `position` moving with
    /// `velocity` (mm/ns).
    fn field_derivative(&self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> Vector3<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformField {
    field: Vector3<f64>,
}

impl UniformField {
    pub fn new(field: Vector3<f64>) -> Self {
        UniformField { field }
    }
}

impl FieldMap for UniformField {
    fn field_at(&self, _position: &Vector3<f64>) -> Vector3<f64> {
        self.field
    }

    fn field_derivative(&self, _position: &Vector3<f64>, _velocity: &Vector3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
}

/// Axial field `Bz(z) = bz0 + gradient · (z - z0)`, with `Bx = -gradient · x / 2` and
/// `By = -gradient · y / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientField {
    bz0: f64,
    z0: f64,
    /// dBz/dz in Tesla/mm
    gradient: f64,
}

impl GradientField {
    pub fn new(bz0: f64, z0: f64, gradient: f64) -> Self {
        GradientField { bz0, z0, gradient }
    }

    /// Field falling linearly from `b_start` at `z_start` to `b_end` at `z_end`.
    pub fn between(b_start: f64, z_start: f64, b_end: f64, z_end: f64) -> Self {
        GradientField {
            bz0: b_start,
            z0: z_start,
            gradient: (b_end - b_start) / (z_end - z_start),
        }
    }
}

impl FieldMap for GradientField {
    fn field_at(&self, position: &Vector3<f64>) -> Vector3<f64> {
        let half = -0.5 * self.gradient;
        Vector3::new(
            half * position.x,
            half * position.y,
            self.bz0 + self.gradient * (position.z - self.z0),
        )
    }

    fn field_derivative(&self, _position: &Vector3<f64>, velocity: &Vector3<f64>) -> Vector3<f64> {
        let half = -0.5 * self.gradient;
        Vector3::new(
            half * velocity.x,
            half * velocity.y,
            self.gradient * velocity.z,
        )
    }
}
