//! Correction for the difference between the true field and the nominal field of the fit.
//!
//! Over its time range the effect integrates the momentum kick the true field would give on top
//! of the nominal helix, and converts it to a parameter shift at the middle of the range. In
//! [`FieldCorrection::Variable`] mode the nominal field itself is moved to the local field value
//! at the middle of the range, and the shift includes the re-expression of the parameters under
//! the new nominal field.

use std::fmt;
use std::sync::Arc;

use nalgebra::Vector3;

use crate::constants::ParamMatrix;
use crate::field::{FieldIntegrator, FieldMap};
use crate::fit::FieldCorrection;
use crate::kinfit_errors::KinFitError;
use crate::parameters::{Parameters, Weights};
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, PieceTrajectory, Trajectory};

use super::{PassDirection, ProcessedFlags};

pub struct FieldEffect<T: KinematicTrajectory> {
    field: Arc<dyn FieldMap>,
    integrator: FieldIntegrator,
    correction: FieldCorrection,
    range: TimeRange,
    /// Nominal field after the effect in variable mode.
    new_field: Vector3<f64>,
    /// Reference piece covering the start of the range.
    before: T,
    effect: Parameters,
    cache: Weights,
    active: bool,
    processed: ProcessedFlags,
}

impl<T: KinematicTrajectory> FieldEffect<T> {
    pub fn new(
        field: Arc<dyn FieldMap>,
        reference: &PieceTrajectory<T>,
        range: TimeRange,
        correction: FieldCorrection,
        integrator: FieldIntegrator,
    ) -> Result<Self, KinFitError> {
        let mid = range.mid();
        let before = reference.piece_before(mid).clone();
        let new_field = field.field_at(&before.position(mid));
        let mut effect = FieldEffect {
            field,
            integrator,
            correction,
            range,
            new_field,
            before,
            effect: Parameters::default(),
            cache: Weights::default(),
            active: true,
            processed: ProcessedFlags::default(),
        };
        effect.update(reference)?;
        Ok(effect)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn time(&self) -> f64 {
        self.range.mid()
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn new_field(&self) -> Vector3<f64> {
        self.new_field
    }

    pub fn effect(&self) -> &Parameters {
        &self.effect
    }

    pub fn cache(&self) -> &Weights {
        &self.cache
    }

    pub fn update(&mut self, reference: &PieceTrajectory<T>) -> Result<(), KinFitError> {
        self.cache = Weights::default();
        self.processed.reset();
        let mid = self.range.mid();
        self.before = reference.piece_before(mid).clone();
        let field = self.field.as_ref();

        let mut shift = match self.correction {
            FieldCorrection::Variable => {
                let after = self.before.with_field(&self.new_field, mid)?;
                let dmom = self.integrator.integrate(
                    field,
                    &self.before,
                    &TimeRange::new(self.range.begin, mid),
                ) + self.integrator.integrate(
                    field,
                    &after,
                    &TimeRange::new(mid, self.range.end),
                );
                self.before.dpar_dm(mid) * dmom
            }
            FieldCorrection::Fixed | FieldCorrection::None => {
                let dmom = self.integrator.integrate(field, &self.before, &self.range);
                self.before.dpar_dm(mid) * dmom
            }
        };
        if self.correction == FieldCorrection::Variable {
            shift += self.before.dpar_db(mid, &self.new_field);
        }
        self.effect = Parameters::new(shift, ParamMatrix::zeros());
        Ok(())
    }

    pub fn process(
        &mut self,
        state: &mut Weights,
        direction: PassDirection,
    ) -> Result<(), KinFitError> {
        if self.active {
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

    /// Start a new fit piece at the middle of the range, under the new nominal field in variable
    /// mode.
    pub fn append(&self, fit: &mut PieceTrajectory<T>) -> Result<(), KinFitError> {
        if !self.active {
            return Ok(());
        }
        let begin = self.time();
        let end = fit.range().end;
        if begin >= end {
            return Ok(());
        }
        let base = match self.correction {
            FieldCorrection::Variable => self.before.with_field(&self.new_field, begin)?,
            FieldCorrection::Fixed | FieldCorrection::None => self.before.clone(),
        };
        let mut piece = base.with_params(Parameters::from_weights(&self.cache)?);
        piece.set_range(TimeRange::new(begin, end));
        fit.append(piece)
    }
}

impl<T: KinematicTrajectory> fmt::Display for FieldEffect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FieldEffect ({}) over {}, new field ({:.4}, {:.4}, {:.4}) T",
            self.correction, self.range, self.new_field.x, self.new_field.y, self.new_field.z
        )
    }
}

#[cfg(test)]
mod field_effect_test {
    use super::*;
    use crate::field::{GradientField, UniformField};
    use crate::trajectory::trajectory_test::{reference_state, unit_covariance};
    use crate::trajectory::LoopHelix;
    use approx::assert_relative_eq;

    fn reference() -> PieceTrajectory<LoopHelix> {
        PieceTrajectory::new(
            LoopHelix::from_state(
                &reference_state(-1),
                Vector3::new(0.0, 0.0, 1.0),
                TimeRange::new(-5.0, 5.0),
                unit_covariance(),
            )
            .unwrap(),
        )
    }

    fn effect(
        field: Arc<dyn FieldMap>,
        correction: FieldCorrection,
    ) -> FieldEffect<LoopHelix> {
        FieldEffect::new(
            field,
            &reference(),
            TimeRange::new(-1.0, 1.0),
            correction,
            FieldIntegrator::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_nominal_field_has_no_effect() {
        let effect = effect(
            Arc::new(UniformField::new(Vector3::new(0.0, 0.0, 1.0))),
            FieldCorrection::Fixed,
        );
        assert_relative_eq!(effect.effect().values.norm(), 0.0, epsilon = 1e-12);
        assert_eq!(effect.time(), 0.0);
        assert_eq!(effect.new_field(), Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_fixed_correction_integrates_kick() {
        let field: Arc<dyn FieldMap> = Arc::new(GradientField::new(1.0, 0.0, 1e-4));
        let effect = effect(field.clone(), FieldCorrection::Fixed);
        let helix = reference().front().clone();
        let dmom = FieldIntegrator::default().integrate(
            field.as_ref(),
            &helix,
            &TimeRange::new(-1.0, 1.0),
        );
        assert!(dmom.norm() > 0.0);
        assert_relative_eq!(
            effect.effect().values,
            helix.dpar_dm(0.0) * dmom,
            epsilon = 1e-12
        );
        assert_eq!(effect.effect().covariance, ParamMatrix::zeros());
    }

    #[test]
    fn test_process_negates_backwards() {
        let field: Arc<dyn FieldMap> = Arc::new(GradientField::new(1.0, 0.0, 1e-4));
        let mut effect = effect(field, FieldCorrection::Fixed);
        let seed = *reference().front().params();
        let prior = Weights::from_parameters(&seed).unwrap();

        let mut forward = prior;
        effect.process(&mut forward, PassDirection::Forwards).unwrap();
        let after = Parameters::from_weights(&forward).unwrap();
        assert_relative_eq!(
            after.values,
            seed.values + effect.effect().values,
            max_relative = 1e-9
        );

        let mut backward = prior;
        effect
            .process(&mut backward, PassDirection::Backwards)
            .unwrap();
        let after = Parameters::from_weights(&backward).unwrap();
        assert_relative_eq!(
            after.values,
            seed.values - effect.effect().values,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_variable_correction_moves_nominal_field() {
        let local = Vector3::new(0.0, 0.0, 1.01);
        let effect = effect(
            Arc::new(UniformField::new(local)),
            FieldCorrection::Variable,
        );
        assert_eq!(effect.new_field(), local);

        let helix = reference().front().clone();
        let dmom = FieldIntegrator::default().integrate(
            &UniformField::new(local),
            &helix,
            &TimeRange::new(-1.0, 0.0),
        );
        // the piece after the middle already moves in the true field
        let expected = helix.dpar_dm(0.0) * dmom + helix.dpar_db(0.0, &local);
        assert_relative_eq!(effect.effect().values, expected, epsilon = 1e-10);

        let mut effect = effect;
        let seed = *reference().front().params();
        let prior = Weights::from_parameters(&seed).unwrap();
        let mut forward = prior;
        effect.process(&mut forward, PassDirection::Forwards).unwrap();
        let mut backward = prior;
        effect
            .process(&mut backward, PassDirection::Backwards)
            .unwrap();

        let mut fit = reference();
        effect.append(&mut fit).unwrap();
        assert_eq!(fit.len(), 2);
        assert_relative_eq!(fit.back().bnom(), local, epsilon = 1e-12);
        assert_eq!(fit.back().range(), TimeRange::new(0.0, 5.0));
    }
}
