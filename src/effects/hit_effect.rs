//! Measurement information of one hit.
//!
//! The residual `r` of the hit, linearized around the reference parameters `p₀` with the
//! derivative `D` of the prediction, constrains the parameters through
//! `χ²(p) = (r - D·(p - p₀))² / (T·σ²)`, with `T` the annealing temperature. In weight space:
//!
//! ```text
//! W = D·Dᵀ / (T·σ²)
//! w = W·p₀ + D·r / (T·σ²)
//! ```

use log::warn;

use crate::closest_approach::{ClosestApproach, ClosestApproachHint, ClosestApproachSettings};
use crate::fit::MetaIterationConfig;
use crate::hits::{Hit, Residual};
use crate::kinfit_errors::KinFitError;
use crate::parameters::{Parameters, Weights};
use crate::trajectory::{KinematicTrajectory, PieceTrajectory, Trajectory};

use super::{PassDirection, ProcessedFlags};

#[derive(Debug)]
pub struct HitEffect<T: KinematicTrajectory> {
    hit: Box<dyn Hit<T>>,
    settings: ClosestApproachSettings,
    hint: Option<ClosestApproachHint>,
    approach: Option<ClosestApproach>,
    residual: Residual,
    /// Parameters the residual is linearized around.
    reference: Parameters,
    weight: Weights,
    /// Sum of the weights seen in both passes, excluding this hit.
    cache: Weights,
    variance_scale: f64,
    /// Set when the closest approach could not be solved; cleared at each meta-iteration.
    dropped: bool,
    processed: ProcessedFlags,
}

impl<T: KinematicTrajectory> HitEffect<T> {
    pub fn new(
        hit: Box<dyn Hit<T>>,
        reference: &PieceTrajectory<T>,
        settings: ClosestApproachSettings,
    ) -> Self {
        let mut effect = HitEffect {
            hit,
            settings,
            hint: None,
            approach: None,
            residual: Residual::default(),
            reference: Parameters::default(),
            weight: Weights::default(),
            cache: Weights::default(),
            variance_scale: 1.0,
            dropped: false,
            processed: ProcessedFlags::default(),
        };
        effect.update(reference, None);
        effect
    }

    pub fn hit(&self) -> &dyn Hit<T> {
        self.hit.as_ref()
    }

    /// Enabled by the user and not dropped by a failed closest approach.
    pub fn is_active(&self) -> bool {
        self.hit.is_active() && !self.dropped
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// User activity flag, independent of closest-approach failures.
    pub fn set_active(&mut self, active: bool) {
        self.hit.set_active(active);
    }

    pub fn ndof(&self) -> usize {
        if self.is_active() {
            self.hit.ndof()
        } else {
            0
        }
    }

    /// Particle time of the closest approach to the sensor.
    pub fn time(&self) -> f64 {
        self.residual.time
    }

    pub fn residual(&self) -> &Residual {
        &self.residual
    }

    pub fn approach(&self) -> Option<&ClosestApproach> {
        self.approach.as_ref()
    }

    pub fn reference(&self) -> &Parameters {
        &self.reference
    }

    pub fn weight(&self) -> &Weights {
        &self.weight
    }

    pub fn cache(&self) -> &Weights {
        &self.cache
    }

    /// Recompute the residual against `reference`. At the start of a meta-iteration the
    /// annealing temperature is reset and the hit may refresh its internal state.
    ///
    /// A hit whose closest approach cannot be solved is dropped until the next meta-iteration,
    /// where it is tried again.
    pub fn update(&mut self, reference: &PieceTrajectory<T>, meta: Option<&MetaIterationConfig>) {
        if let Some(meta) = meta {
            self.variance_scale = meta.variance_scale();
            self.dropped = false;
        }
        self.cache = Weights::default();
        self.processed.reset();
        if !self.is_active() {
            return;
        }

        let hint = match self.hint {
            Some(hint) => ClosestApproachHint::new(
                hint.particle_time,
                self.hit.sensor().range().force_range(hint.sensor_time),
            ),
            None => self.hit.hint(reference),
        };
        let approach = self.hit.closest_approach(reference, hint, &self.settings);
        if !approach.usable() {
            warn!(
                "dropping hit at {:.4} ns: closest approach {} after {} iterations",
                hint.particle_time, approach.status, approach.iterations
            );
            self.dropped = true;
            self.approach = Some(approach);
            return;
        }
        if let Some(meta) = meta.filter(|m| m.update_hits) {
            self.hit.update(&approach, meta);
        }
        self.residual = self.hit.residual(&approach);
        self.hint = Some(ClosestApproachHint::new(
            approach.particle_toca,
            approach.sensor_toca,
        ));
        self.approach = Some(approach);
        self.reference = *reference.nearest_piece(self.residual.time).params();

        let tvar = self.residual.variance * self.variance_scale;
        let deriv = self.residual.dr_dpar;
        let matrix = deriv * deriv.transpose() / tvar;
        self.weight = Weights::new(
            matrix * self.reference.values + deriv * (self.residual.value / tvar),
            matrix,
        );
    }

    /// Hits add the same information in both directions.
    pub fn process(&mut self, state: &mut Weights, direction: PassDirection) {
        if self.is_active() {
            self.cache += &*state;
            *state += &self.weight;
        }
        self.processed.set(direction);
    }

    /// Residual with respect to `params`, normalized by the annealed measurement variance plus
    /// the parameter variance projected on the residual.
    pub fn chi(&self, params: &Parameters) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        let deriv = &self.residual.dr_dpar;
        let uresid = self.residual.value - (params.values - self.reference.values).dot(deriv);
        let rvar = (deriv.transpose() * params.covariance * deriv)[(0, 0)]
            + self.residual.variance * self.variance_scale;
        uresid / rvar.sqrt()
    }

    /// Unbiased reduced residual, once both passes have processed the hit.
    pub fn fit_chi(&self) -> Option<f64> {
        if !self.is_active() || !self.processed.both() {
            return None;
        }
        Parameters::from_weights(&self.cache)
            .ok()
            .map(|unbiased| self.chi(&unbiased))
    }

    /// Contribution to the fit χ²: the residual against the smoothed parameters including this
    /// hit, over the nominal measurement variance.
    pub fn chisq(&self) -> Result<f64, KinFitError> {
        if !self.is_active() {
            return Ok(0.0);
        }
        let smoothed = Parameters::from_weights(&(self.cache + self.weight))?;
        let uresid = self.residual.value
            - (smoothed.values - self.reference.values).dot(&self.residual.dr_dpar);
        Ok(uresid * uresid / self.residual.variance)
    }
}
