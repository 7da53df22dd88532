//! Integration of the field difference between the true field and a trajectory's nominal field.

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{CBAR, FIELD_INTEGRATION_STEPS};
use crate::field::FieldMap;
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, Trajectory};

/// Nominal step of the tolerance march (ns).
const NOMINAL_STEP: f64 = 0.1;

/// Field differences below this value (Tesla) do not limit the step.
const MIN_FIELD_DIFFERENCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldIntegrator {
    /// Number of midpoint steps used by [`FieldIntegrator::integrate`].
    pub steps: usize,
    /// Upper bound on the number of steps of [`FieldIntegrator::range_in_tolerance`].
    pub max_march_steps: usize,
}

impl Default for FieldIntegrator {
    fn default() -> Self {
        FieldIntegrator {
            steps: FIELD_INTEGRATION_STEPS,
            max_march_steps: 100_000,
        }
    }
}

impl FieldIntegrator {
    /// Momentum change (MeV/c) over `range` due to the difference between the true field and the
    /// nominal field of `traj`.
    ///
    /// This is the integral of the external force needed to keep the particle on `traj`:
    /// `Δp = CBAR · q · ∫ v × (B(x(t)) - B_nom) dt`.
    pub fn integrate<T: KinematicTrajectory, F: FieldMap + ?Sized>(
        &self,
        field: &F,
        traj: &T,
        range: &TimeRange,
    ) -> Vector3<f64> {
        let steps = self.steps.max(1);
        let dt = range.span() / steps as f64;
        let bnom = traj.bnom();
        let scale = CBAR * f64::from(traj.charge()) * dt;
        (0..steps)
            .map(|istep| {
                let t = range.begin + (istep as f64 + 0.5) * dt;
                let db = field.field_at(&traj.position(t)) - bnom;
                traj.velocity(t).cross(&db) * scale
            })
            .sum()
    }

    /// Latest time, starting from `tstart`, up to which `traj` stays within `tolerance` (mm) of the
    /// true motion in `field`, capped by the end of the trajectory range.
    ///
    /// The step combines a nominal value, a static term from the field difference at the start
    /// and a dynamic term from the rate of change of the field along the path. The position
    /// distortion accumulates as `sfac · (t - tstart) · step · |ΔB|`.
    pub fn range_in_tolerance<T: KinematicTrajectory, F: FieldMap + ?Sized>(
        &self,
        field: &F,
        traj: &T,
        tstart: f64,
        tolerance: f64,
    ) -> f64 {
        let speed = traj.speed(tstart);
        let sfac =
            (CBAR * f64::from(traj.charge()) * speed * speed / traj.momentum_mag(tstart)).abs();
        let tend_max = traj.range().end;
        if sfac == 0.0 {
            return tend_max;
        }
        let bnom = traj.bnom();
        let position = traj.position(tstart);
        let db = (field.field_at(&position) - bnom).norm();

        let mut tstep = NOMINAL_STEP;
        if db > MIN_FIELD_DIFFERENCE {
            tstep = tstep.min(0.2 * (tolerance / (sfac * db)).sqrt());
        }
        let dbdt = field.field_derivative(&position, &traj.velocity(tstart)).norm();
        if dbdt > 0.0 {
            tstep = tstep.min(0.5 * (tolerance / (sfac * dbdt)).cbrt());
        }

        let mut tend = tstart;
        let mut dx = 0.0;
        let mut nsteps = 0;
        while dx < tolerance && tend < tend_max && nsteps < self.max_march_steps {
            tend += tstep;
            nsteps += 1;
            let db = (field.field_at(&traj.position(tend)) - bnom).norm();
            dx += sfac * (tend - tstart) * tstep * db;
        }
        debug!(
            "field tolerance march from {tstart:.3} ns: {nsteps} steps of {tstep:.4} ns, distortion {dx:.3e} mm"
        );
        tend.min(tend_max)
    }
}
