//! Energy loss and scattering in a detector element.
//!
//! The momentum effects of the crossings are mapped to parameter space through the momentum
//! derivatives of the reference piece at the crossing. The mean shift is the forward-time energy
//! loss: it is applied as is in the forward pass and negated in the backward pass, while the
//! scattering covariance is added in both.

use std::sync::Arc;

use log::{debug, warn};

use crate::closest_approach::ClosestApproachSettings;
use crate::constants::MATERIAL_TIME_OFFSET;
use crate::fit::MetaIterationConfig;
use crate::kinfit_errors::KinFitError;
use crate::material::{CrossingGeometry, Crossings, MaterialModel, MomentumEffects};
use crate::parameters::{Parameters, Weights};
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, MomentumBasis, PieceTrajectory, Trajectory};

use super::{PassDirection, ProcessedFlags};

pub struct MaterialEffect<T: KinematicTrajectory> {
    geometry: CrossingGeometry,
    model: Arc<dyn MaterialModel>,
    settings: ClosestApproachSettings,
    crossing_time: f64,
    crossings: Crossings,
    momentum_effects: MomentumEffects,
    reference: T,
    /// Forward-time parameter change, with the scattering covariance.
    effect: Parameters,
    cache: Weights,
    variance_scale: f64,
    active: bool,
    processed: ProcessedFlags,
}

impl<T: KinematicTrajectory> MaterialEffect<T> {
    pub fn new(
        geometry: CrossingGeometry,
        model: Arc<dyn MaterialModel>,
        reference: &PieceTrajectory<T>,
        settings: ClosestApproachSettings,
        active: bool,
    ) -> Self {
        let crossing_time = geometry.nominal_time(reference);
        let mut effect = MaterialEffect {
            geometry,
            model,
            settings,
            crossing_time,
            crossings: Crossings::new(),
            momentum_effects: MomentumEffects::default(),
            reference: reference.nearest_piece(crossing_time).clone(),
            effect: Parameters::default(),
            cache: Weights::default(),
            variance_scale: 1.0,
            active,
            processed: ProcessedFlags::default(),
        };
        effect.relocate(reference);
        effect.update(reference, None);
        effect
    }

    fn relocate(&mut self, reference: &PieceTrajectory<T>) {
        match self
            .geometry
            .locate(reference, self.crossing_time, &self.settings)
        {
            Ok(location) => {
                self.crossing_time = location.time;
                self.crossings = location.crossings;
            }
            Err(err) => warn!(
                "keeping material crossing at {:.4} ns: {err}",
                self.crossing_time
            ),
        }
    }

    /// Effects without crossings never contribute.
    pub fn is_active(&self) -> bool {
        self.active && !self.crossings.is_empty()
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Just after the crossing, so that a hit on the same element is processed first.
    pub fn time(&self) -> f64 {
        self.crossing_time + MATERIAL_TIME_OFFSET
    }

    pub fn crossing_time(&self) -> f64 {
        self.crossing_time
    }

    pub fn geometry(&self) -> &CrossingGeometry {
        &self.geometry
    }

    pub fn crossings(&self) -> &Crossings {
        &self.crossings
    }

    pub fn momentum_effects(&self) -> &MomentumEffects {
        &self.momentum_effects
    }

    pub fn effect(&self) -> &Parameters {
        &self.effect
    }

    pub fn cache(&self) -> &Weights {
        &self.cache
    }

    /// Parameter change applied by a pass in `direction`.
    pub fn directional_effect(&self, direction: PassDirection) -> Parameters {
        match direction {
            PassDirection::Forwards => self.effect,
            PassDirection::Backwards => -self.effect,
        }
    }

    /// Re-linearize around `reference`. At the start of a meta-iteration the scattering variance
    /// follows the new temperature and the crossing may be located again.
    pub fn update(&mut self, reference: &PieceTrajectory<T>, meta: Option<&MetaIterationConfig>) {
        if let Some(meta) = meta {
            self.variance_scale = meta.variance_scale();
            if meta.update_materials {
                self.relocate(reference);
            }
        }
        self.cache = Weights::default();
        self.processed.reset();
        self.reference = reference.nearest_piece(self.crossing_time).clone();

        let state = self.reference.state(self.crossing_time);
        self.momentum_effects = self.model.momentum_effects(&state, &self.crossings);
        self.effect = Parameters::default();
        for basis in MomentumBasis::ALL {
            let pder = self.reference.mom_deriv(self.crossing_time, basis);
            self.effect.values += pder * self.momentum_effects.mean(basis);
            self.effect.covariance += pder
                * pder.transpose()
                * (self.momentum_effects.variance(basis) * self.variance_scale);
        }
        debug!(
            "material at {:.4} ns: {} crossings, {}",
            self.crossing_time,
            self.crossings.len(),
            self.momentum_effects
        );
    }

    pub fn process(
        &mut self,
        state: &mut Weights,
        direction: PassDirection,
    ) -> Result<(), KinFitError> {
        if self.is_active() {
            match direction {
                PassDirection::Forwards => {
                    state.append_parameters(&self.effect)?;
                    self.cache += &*state;
                }
                PassDirection::Backwards => {
                    self.cache += &*state;
                    state.append_parameters(&-self.effect)?;
                }
            }
        }
        self.processed.set(direction);
        Ok(())
    }

    /// Start a new fit piece after the crossing, carrying the smoothed parameters.
    pub fn append(&self, fit: &mut PieceTrajectory<T>) -> Result<(), KinFitError> {
        if !self.is_active() {
            return Ok(());
        }
        let begin = self.time();
        let end = fit.range().end;
        if begin >= end {
            return Ok(());
        }
        let mut piece = self
            .reference
            .with_params(Parameters::from_weights(&self.cache)?);
        piece.set_range(TimeRange::new(begin, end));
        fit.append(piece)
    }
}
