//! Seed information at the two ends of the chain.
//!
//! Each pass starts from an empty weight: the end effect opening the pass injects the current
//! reference parameters with the seed covariance inflated by the de-weighting factor, just enough
//! information to keep the running weight invertible. The covariance always comes from the seed,
//! so directions the measurements leave free keep a bounded variance over the iterations. The
//! end effect closing the pass records the weight it receives.

use crate::constants::ParamMatrix;
use crate::kinfit_errors::KinFitError;
use crate::parameters::{Parameters, Weights};
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, PieceTrajectory};

use super::{PassDirection, ProcessedFlags};

#[derive(Debug, Clone)]
pub struct EndEffect<T> {
    /// Pass opened by this end.
    direction: PassDirection,
    deweight: f64,
    /// Covariance of the seed end piece, before de-weighting.
    seed_covariance: ParamMatrix,
    reference: T,
    information: Weights,
    result: Weights,
    processed: ProcessedFlags,
}

impl<T: KinematicTrajectory> EndEffect<T> {
    /// The front end opens the forward pass, the back end the backward pass.
    pub fn new(
        reference: &PieceTrajectory<T>,
        direction: PassDirection,
        deweight: f64,
    ) -> Result<Self, KinFitError> {
        let piece = Self::end_piece(reference, direction);
        let seed_covariance = piece.params().covariance;
        let mut end = EndEffect {
            direction,
            deweight,
            seed_covariance,
            reference: piece,
            information: Weights::default(),
            result: Weights::default(),
            processed: ProcessedFlags::default(),
        };
        end.information = end.injected()?;
        Ok(end)
    }

    fn end_piece(reference: &PieceTrajectory<T>, direction: PassDirection) -> T {
        match direction {
            PassDirection::Forwards => reference.front().clone(),
            PassDirection::Backwards => reference.back().clone(),
        }
    }

    /// Reference values with the de-weighted seed covariance.
    fn injected(&self) -> Result<Weights, KinFitError> {
        let seed = Parameters::new(self.reference.params().values, self.seed_covariance);
        Weights::from_parameters(&seed.deweighted(self.deweight))
    }

    pub fn direction(&self) -> PassDirection {
        self.direction
    }

    pub fn time(&self) -> f64 {
        match self.direction {
            PassDirection::Forwards => self.reference.range().begin,
            PassDirection::Backwards => self.reference.range().end,
        }
    }

    pub fn sort_time(&self) -> f64 {
        match self.direction {
            PassDirection::Forwards => f64::NEG_INFINITY,
            PassDirection::Backwards => f64::INFINITY,
        }
    }

    pub fn update(&mut self, reference: &PieceTrajectory<T>) -> Result<(), KinFitError> {
        self.reference = Self::end_piece(reference, self.direction);
        self.information = self.injected()?;
        self.result = Weights::default();
        self.processed.reset();
        Ok(())
    }

    pub fn process(&mut self, state: &mut Weights, direction: PassDirection) {
        if direction == self.direction {
            *state += &self.information;
        } else {
            self.result = *state;
        }
        self.processed.set(direction);
    }

    pub fn was_processed(&self, direction: PassDirection) -> bool {
        self.processed.was_processed(direction)
    }

    /// Weight injected at the start of the pass.
    pub fn information(&self) -> &Weights {
        &self.information
    }

    /// Parameters accumulated by the pass ending here.
    pub fn fit_parameters(&self) -> Result<Parameters, KinFitError> {
        Parameters::from_weights(&self.result)
    }

    /// Both passes at this end: the injected seed plus the pass ending here. This is the same
    /// information the material and field caches hold downstream.
    pub fn smoothed_parameters(&self) -> Result<Parameters, KinFitError> {
        Parameters::from_weights(&(self.result + self.information))
    }

    /// First piece of the fit trajectory, spanning `range`.
    pub fn fit_piece(&self, range: TimeRange) -> Result<T, KinFitError> {
        let mut piece = self.reference.with_params(self.smoothed_parameters()?);
        piece.set_range(range);
        Ok(piece)
    }
}

#[cfg(test)]
mod end_effect_test {
    use super::*;
    use crate::trajectory::trajectory_test::{reference_state, unit_covariance};
    use crate::trajectory::{LoopHelix, Trajectory};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

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

    #[test]
    fn test_injects_deweighted_seed() {
        let reference = reference();
        let end = EndEffect::new(&reference, PassDirection::Forwards, 1e6).unwrap();
        let seed = reference.front().params();
        assert_relative_eq!(
            end.information().matrix,
            seed.covariance.try_inverse().unwrap() * 1e-6,
            max_relative = 1e-9
        );
        assert_eq!(end.sort_time(), f64::NEG_INFINITY);
        assert_eq!(end.time(), -5.0);

        let mut state = Weights::default();
        let mut end = end;
        end.process(&mut state, PassDirection::Forwards);
        assert_eq!(state, *end.information());
        assert!(end.fit_parameters().is_err());
    }

    #[test]
    fn test_records_closing_pass() {
        let reference = reference();
        let mut end = EndEffect::new(&reference, PassDirection::Backwards, 1e6).unwrap();
        assert_eq!(end.sort_time(), f64::INFINITY);
        let seed = *reference.front().params();
        let mut state = Weights::from_parameters(&seed).unwrap();
        end.process(&mut state, PassDirection::Forwards);
        let fitted = end.fit_parameters().unwrap();
        assert_relative_eq!(fitted.values, seed.values, max_relative = 1e-9);

        let piece = end.fit_piece(TimeRange::new(-5.0, 20.0)).unwrap();
        assert_eq!(piece.range(), TimeRange::new(-5.0, 20.0));
        assert_relative_eq!(piece.params().values, seed.values, max_relative = 1e-9);
    }

    #[test]
    fn test_update_keeps_seed_covariance() {
        let reference = reference();
        let mut end = EndEffect::new(&reference, PassDirection::Forwards, 1e6).unwrap();
        let injected = *end.information();

        // a poorly constrained fit must not feed its covariance back into the seed
        let mut loose = reference.front().clone();
        loose.params_mut().covariance *= 1e6;
        loose.params_mut().values[0] += 0.5;
        for _ in 0..3 {
            end.update(&PieceTrajectory::new(loose.clone())).unwrap();
        }
        assert_relative_eq!(end.information().matrix, injected.matrix, max_relative = 1e-9);
        let seed = Parameters::from_weights(end.information()).unwrap();
        assert_relative_eq!(seed.values, loose.params().values, max_relative = 1e-9);
    }
}
