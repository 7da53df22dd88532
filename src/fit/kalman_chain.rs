//! # Kalman chain
//!
//! [`KalmanChain`] owns every effect of one particle fit in an arena and drives the fit:
//!
//! 1. each effect is re-linearized around the current reference trajectory,
//! 2. the effects are ordered in time, the two chain ends first and last,
//! 3. a forward and a backward pass fold the effects into a running weight,
//! 4. the smoothed fit trajectory is assembled from the front end and the caches of the material
//!    and field effects,
//! 5. the χ² of the active hits is compared with the previous iteration.
//!
//! The fit trajectory then becomes the reference of the next iteration. Iterations are grouped in
//! meta-iterations following the annealing schedule of the [`FitConfig`]: the first iteration of
//! each meta-iteration sets the new temperature and lets hits and materials refresh their state.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kinfit::field::UniformField;
//! use kinfit::fit::{FitConfig, FitEnvironment, KalmanChain};
//! use kinfit::hits::Hit;
//! use kinfit::material::HighlandMaterial;
//! use kinfit::trajectory::LoopHelix;
//! use nalgebra::Vector3;
//!
//! # fn seed() -> LoopHelix { unimplemented!() }
//! # fn hits() -> Vec<Box<dyn Hit<LoopHelix>>> { unimplemented!() }
//! let environment = FitEnvironment::new(
//!     Arc::new(UniformField::new(Vector3::new(0.0, 0.0, 1.0))),
//!     Arc::new(HighlandMaterial::default()),
//! );
//! let mut chain =
//!     KalmanChain::new(seed(), hits(), Vec::new(), environment, FitConfig::default()).unwrap();
//! let status = chain.fit();
//! println!("{status}");
//! ```

use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::Vector3;

use crate::constants::NPARAMS;
use crate::effects::{
    Effect, EffectDiagnostics, EffectId, EndEffect, FieldEffect, HitEffect, MaterialEffect,
    PassDirection,
};
use crate::field::{FieldIntegrator, FieldMap, UniformField};
use crate::fit::{FieldCorrection, FitConfig, FitState, FitStatus, MetaIterationConfig};
use crate::hits::Hit;
use crate::kinfit_errors::KinFitError;
use crate::material::{CrossingGeometry, HighlandMaterial, MaterialModel};
use crate::parameters::Weights;
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, PieceTrajectory, Trajectory};

const FRONT: usize = 0;

/// External collaborators of a fit, shared read-only between fits.
#[derive(Clone)]
pub struct FitEnvironment {
    pub field: Arc<dyn FieldMap>,
    pub material: Arc<dyn MaterialModel>,
}

impl FitEnvironment {
    pub fn new(field: Arc<dyn FieldMap>, material: Arc<dyn MaterialModel>) -> Self {
        FitEnvironment { field, material }
    }

    /// Uniform field and the Highland material model.
    pub fn uniform(field: Vector3<f64>) -> Self {
        FitEnvironment {
            field: Arc::new(UniformField::new(field)),
            material: Arc::new(HighlandMaterial::default()),
        }
    }
}

/// Summary of one iteration, before the convergence tests.
struct IterationSummary {
    chisq: f64,
    ndof: i32,
    /// Parameter change of the fit front, as χ² per parameter.
    shift: f64,
    /// Hits skipped because their closest approach failed.
    dropped_hits: usize,
}

pub struct KalmanChain<T: KinematicTrajectory> {
    config: FitConfig,
    environment: FitEnvironment,
    effects: Vec<Effect<T>>,
    /// Arena indices in processing order.
    order: Vec<usize>,
    hit_ids: Vec<EffectId>,
    material_ids: Vec<EffectId>,
    field_ids: Vec<EffectId>,
    reference: PieceTrajectory<T>,
    fit: PieceTrajectory<T>,
    status: FitStatus,
    history: Vec<FitStatus>,
}

impl<T: KinematicTrajectory> KalmanChain<T> {
    /// Build the chain of one particle.
    ///
    /// Arguments
    /// -----------------
    /// * `seed`: first estimate of the trajectory; its range bounds the fit.
    /// * `hits`: the measurements, owned by the chain from now on.
    /// * `materials`: detector elements the particle may cross.
    /// * `environment`: field map and material model.
    /// * `config`: fit configuration.
    ///
    /// Return
    /// ----------
    /// * The chain, ready for [`KalmanChain::fit`]. Field effects are placed along the seed when
    ///   the configuration asks for field corrections.
    /// * `Err(KinFitError::TimeOutOfRange)` if the seed range is not finite, or any error of the
    ///   construction of the end and field effects.
    pub fn new(
        seed: T,
        hits: Vec<Box<dyn Hit<T>>>,
        materials: Vec<CrossingGeometry>,
        environment: FitEnvironment,
        config: FitConfig,
    ) -> Result<Self, KinFitError> {
        let range = seed.range();
        if range.is_infinite() || !range.span().is_finite() {
            return Err(KinFitError::TimeOutOfRange {
                time: range.begin,
                range,
            });
        }
        let mut reference = PieceTrajectory::new(seed);
        let fields = Self::field_effects(&mut reference, &environment, &config)?;
        let settings = config.poca_settings();

        let mut effects = Vec::with_capacity(2 + fields.len() + hits.len() + materials.len());
        effects.push(Effect::End(EndEffect::new(
            &reference,
            PassDirection::Forwards,
            config.seed_deweight,
        )?));
        effects.push(Effect::End(EndEffect::new(
            &reference,
            PassDirection::Backwards,
            config.seed_deweight,
        )?));

        let mut field_ids = Vec::with_capacity(fields.len());
        for field in fields {
            field_ids.push(EffectId(effects.len()));
            effects.push(Effect::Field(field));
        }
        let mut hit_ids = Vec::with_capacity(hits.len());
        for hit in hits {
            hit_ids.push(EffectId(effects.len()));
            effects.push(Effect::Hit(HitEffect::new(hit, &reference, settings)));
        }
        let mut material_ids = Vec::with_capacity(materials.len());
        for geometry in materials {
            material_ids.push(EffectId(effects.len()));
            effects.push(Effect::Material(MaterialEffect::new(
                geometry,
                environment.material.clone(),
                &reference,
                settings,
                config.add_material,
            )));
        }
        debug!(
            "chain built with {} hits, {} materials and {} field corrections over {}",
            hit_ids.len(),
            material_ids.len(),
            field_ids.len(),
            range
        );

        let mut chain = KalmanChain {
            config,
            environment,
            effects,
            order: Vec::new(),
            hit_ids,
            material_ids,
            field_ids,
            fit: reference.clone(),
            reference,
            status: FitStatus::default(),
            history: Vec::new(),
        };
        chain.sort_effects();
        Ok(chain)
    }

    /// March the nominal-field tolerance along the seed, one field effect per step. In variable
    /// mode the reference gains a piece under the local field at the middle of each step.
    fn field_effects(
        reference: &mut PieceTrajectory<T>,
        environment: &FitEnvironment,
        config: &FitConfig,
    ) -> Result<Vec<FieldEffect<T>>, KinFitError> {
        let mut effects = Vec::new();
        if config.field_correction == FieldCorrection::None {
            return Ok(effects);
        }
        let integrator = FieldIntegrator::default();
        let field = environment.field.as_ref();
        let range = reference.range();
        let mut tstart = range.begin;
        while tstart < range.end {
            let tend =
                integrator.range_in_tolerance(field, reference.back(), tstart, config.field_tolerance);
            if tend <= tstart {
                break;
            }
            let step = TimeRange::new(tstart, tend);
            if config.field_correction == FieldCorrection::Variable {
                let mid = step.mid();
                let back = reference.back();
                let local = field.field_at(&back.position(mid));
                let mut piece = back.with_field(&local, mid)?;
                piece.set_range(TimeRange::new(mid, range.end));
                reference.append(piece)?;
            }
            effects.push(FieldEffect::new(
                environment.field.clone(),
                reference,
                step,
                config.field_correction,
                integrator,
            )?);
            tstart = tend;
        }
        debug!("{} field corrections along {}", effects.len(), range);
        Ok(effects)
    }

    fn sort_effects(&mut self) {
        let effects = &self.effects;
        self.order = (0..effects.len())
            .sorted_by(|&a, &b| effects[a].sort_time().total_cmp(&effects[b].sort_time()))
            .collect();
    }

    /// Run the annealing schedule.
    ///
    /// The status of every iteration is kept in [`KalmanChain::history`]; the returned status is
    /// the one of the last meta-iteration run. A diverged or failed meta-iteration stops the fit.
    pub fn fit(&mut self) -> &FitStatus {
        let schedule = self.config.schedule.clone();
        for (imeta, meta) in schedule.iter().enumerate() {
            info!("meta-iteration {imeta} starts: {meta}");
            self.status = self.run_meta_iteration(imeta, meta);
            info!("meta-iteration {imeta} ends: {}", self.status);
            if self.status.is_terminal() {
                break;
            }
        }
        &self.status
    }

    fn run_meta_iteration(&mut self, meta_iteration: usize, meta: &MetaIterationConfig) -> FitStatus {
        let mut previous: Option<FitStatus> = None;
        for iteration in 0..self.config.max_iterations {
            let mut status = FitStatus::new(meta_iteration, iteration);
            let summary = match self.iterate((iteration == 0).then_some(meta)) {
                Ok(summary) => summary,
                Err(err) => {
                    warn!("fit failed at meta-iteration {meta_iteration}, iteration {iteration}: {err}");
                    status.fail(err.to_string());
                    self.history.push(status.clone());
                    return status;
                }
            };
            status.set_chisq(summary.chisq, summary.ndof);
            status.set_dropped_hits(summary.dropped_hits);
            status.state = FitState::Unconverged;

            if let Some(prev) = &previous {
                let norm = f64::from(status.ndof.max(1));
                let dchisq = (status.chisq - prev.chisq) / norm;
                debug!(
                    "iteration {iteration}: chisq = {:.4}, dchisq/ndof = {dchisq:.3e}, parameter shift = {:.3e}",
                    status.chisq, summary.shift
                );
                if dchisq > self.config.divergence_dchisq
                    && status.chisq > self.config.divergence_factor * prev.chisq
                {
                    warn!(
                        "fit diverged at meta-iteration {meta_iteration}: chisq {:.4} -> {:.4}",
                        prev.chisq, status.chisq
                    );
                    status.state = FitState::Diverged;
                    status.note("chi-square growth");
                    self.history.push(status.clone());
                    return status;
                }
                if dchisq.abs() < self.config.convergence_dchisq
                    && summary.shift < self.config.convergence_param_shift
                {
                    status.state = FitState::Converged;
                    self.history.push(status.clone());
                    return status;
                }
            } else {
                debug!(
                    "iteration {iteration}: chisq = {:.4}, parameter shift = {:.3e}",
                    status.chisq, summary.shift
                );
            }
            self.history.push(status.clone());
            previous = Some(status);
        }
        let mut last = previous.unwrap_or_else(|| FitStatus::new(meta_iteration, 0));
        last.note("iteration limit reached");
        last
    }

    /// One update, both passes and the new fit trajectory.
    fn iterate(&mut self, meta: Option<&MetaIterationConfig>) -> Result<IterationSummary, KinFitError> {
        for effect in &mut self.effects {
            effect.update(&self.reference, meta)?;
        }
        let (active_hits, dropped_hits) =
            self.hit_ids
                .iter()
                .fold((0, 0), |(active, dropped), id| match &self.effects[id.0] {
                    Effect::Hit(hit) => (
                        active + usize::from(hit.is_active()),
                        dropped + usize::from(hit.is_dropped()),
                    ),
                    _ => (active, dropped),
                });
        if dropped_hits > 0 {
            debug!("{dropped_hits} hits dropped by a failed closest approach");
        }
        if active_hits < self.config.min_active_hits.max(1) {
            return Err(KinFitError::NoUsableEffects);
        }
        self.sort_effects();

        let mut state = Weights::default();
        for &index in &self.order {
            self.effects[index].process(&mut state, PassDirection::Forwards)?;
        }
        let mut state = Weights::default();
        for &index in self.order.iter().rev() {
            self.effects[index].process(&mut state, PassDirection::Backwards)?;
        }

        let fit = self.build_fit()?;
        let (chisq, ndof) = self.chisq()?;
        let shift = fit
            .front()
            .params()
            .chisq_distance(&self.reference.front().params().values)?
            / NPARAMS as f64;
        self.reference = fit.clone();
        self.fit = fit;
        Ok(IterationSummary {
            chisq,
            ndof,
            shift,
            dropped_hits,
        })
    }

    fn front_end(&self) -> Result<&EndEffect<T>, KinFitError> {
        match self.effects.get(FRONT) {
            Some(Effect::End(end)) => Ok(end),
            _ => Err(KinFitError::UnknownEffect(FRONT)),
        }
    }

    fn build_fit(&self) -> Result<PieceTrajectory<T>, KinFitError> {
        let mut fit = PieceTrajectory::new(self.front_end()?.fit_piece(self.reference.range())?);
        for &index in &self.order {
            self.effects[index].append(&mut fit)?;
        }
        Ok(fit)
    }

    /// χ² of the active hits against the smoothed parameters, and the degrees of freedom left
    /// after fitting the parameters.
    fn chisq(&self) -> Result<(f64, i32), KinFitError> {
        let mut chisq = 0.0;
        let mut ndof = 0;
        for effect in self.hit_ids.iter().map(|id| &self.effects[id.0]) {
            if let Effect::Hit(hit) = effect {
                chisq += hit.chisq()?;
                ndof += hit.ndof();
            }
        }
        Ok((chisq, ndof as i32 - NPARAMS as i32))
    }

    pub fn status(&self) -> &FitStatus {
        &self.status
    }

    /// Status of every iteration run so far.
    pub fn history(&self) -> &[FitStatus] {
        &self.history
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn environment(&self) -> &FitEnvironment {
        &self.environment
    }

    /// Smoothed trajectory of the last iteration; the seed before any fit.
    pub fn fit_trajectory(&self) -> &PieceTrajectory<T> {
        &self.fit
    }

    /// Trajectory the effects are currently linearized around.
    pub fn reference(&self) -> &PieceTrajectory<T> {
        &self.reference
    }

    pub fn hit_ids(&self) -> &[EffectId] {
        &self.hit_ids
    }

    pub fn material_ids(&self) -> &[EffectId] {
        &self.material_ids
    }

    pub fn field_ids(&self) -> &[EffectId] {
        &self.field_ids
    }

    pub fn effect(&self, id: EffectId) -> Result<EffectDiagnostics, KinFitError> {
        self.effects
            .get(id.0)
            .map(Effect::diagnostics)
            .ok_or(KinFitError::UnknownEffect(id.0))
    }

    /// Diagnostics of all effects in processing order.
    pub fn diagnostics(&self) -> Vec<(EffectId, EffectDiagnostics)> {
        self.order
            .iter()
            .map(|&index| (EffectId(index), self.effects[index].diagnostics()))
            .collect()
    }

    /// Enable or disable an effect for the next fit. The chain ends cannot be disabled.
    pub fn set_effect_active(&mut self, id: EffectId, active: bool) -> Result<(), KinFitError> {
        let effect = self
            .effects
            .get_mut(id.0)
            .ok_or(KinFitError::UnknownEffect(id.0))?;
        effect.set_active(active);
        Ok(())
    }
}
