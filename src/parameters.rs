//! # Parameter and weight representations of a Gaussian trajectory state
//!
//! The fit manipulates the same 6-dimensional Gaussian state in two dual forms:
//!
//! - [`Parameters`]: mean vector and covariance matrix. Natural for evaluating trajectories and
//!   for adding process noise (material scattering, energy-loss straggling).
//! - [`Weights`]: information matrix `W = C⁻¹` and information vector `w = W · mean`.
//!   Natural for fusing independent measurements: fusion is plain addition.
//!
//! Conversion between the two requires inverting a 6×6 symmetric matrix. Cholesky
//! decomposition is tried first since both matrices are expected to be positive definite;
//! a general LU inverse is the fallback for marginally conditioned matrices. Either way the
//! result is re-symmetrized to keep round-off from accumulating across a chain.
//!
//! ## See also
//! ------------
//! * [`crate::effects`] – producers of weight and parameter contributions.
//! * [`crate::fit::KalmanChain`] – forward/backward accumulation in weight space.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::constants::{ParamMatrix, ParamVector, NPARAMS};
use crate::kinfit_errors::KinFitError;

/// Invert a symmetric matrix, preferring Cholesky decomposition.
pub fn invert_symmetric(
    matrix: &ParamMatrix,
    context: &'static str,
) -> Result<ParamMatrix, KinFitError> {
    let inverse = match matrix.cholesky() {
        Some(chol) => chol.inverse(),
        None => matrix
            .try_inverse()
            .ok_or(KinFitError::SingularMatrix(context))?,
    };
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(KinFitError::SingularMatrix(context));
    }
    Ok((inverse + inverse.transpose()) * 0.5)
}

/// Parameter-space form of a Gaussian state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub values: ParamVector,
    pub covariance: ParamMatrix,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            values: ParamVector::zeros(),
            covariance: ParamMatrix::zeros(),
        }
    }
}

impl Parameters {
    pub fn new(values: ParamVector, covariance: ParamMatrix) -> Self {
        Parameters { values, covariance }
    }

    /// 1-sigma uncertainty of one parameter.
    pub fn sigma(&self, index: usize) -> f64 {
        self.covariance[(index, index)].max(0.0).sqrt()
    }

    /// Parameter uncertainties as a vector.
    pub fn sigmas(&self) -> ParamVector {
        ParamVector::from_fn(|i, _| self.sigma(i))
    }

    /// Convert an information state back to parameter form.
    pub fn from_weights(weights: &Weights) -> Result<Self, KinFitError> {
        let covariance = invert_symmetric(&weights.matrix, "weight matrix")?;
        Ok(Parameters {
            values: covariance * weights.vector,
            covariance,
        })
    }

    /// Scale the covariance, e.g. to deweight a seed.
    pub fn deweighted(&self, factor: f64) -> Self {
        Parameters {
            values: self.values,
            covariance: self.covariance * factor,
        }
    }

    /// Mahalanobis distance squared between two parameter vectors using this covariance.
    pub fn chisq_distance(&self, other: &ParamVector) -> Result<f64, KinFitError> {
        let weight = invert_symmetric(&self.covariance, "parameter covariance")?;
        let delta = other - self.values;
        Ok((delta.transpose() * weight * delta)[(0, 0)])
    }
}

impl AddAssign<&Parameters> for Parameters {
    fn add_assign(&mut self, other: &Parameters) {
        self.values += other.values;
        self.covariance += other.covariance;
    }
}

impl Neg for Parameters {
    type Output = Parameters;

    /// Negates the mean only: covariance contributions never change sign.
    fn neg(self) -> Parameters {
        Parameters {
            values: -self.values,
            covariance: self.covariance,
        }
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..NPARAMS {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6} ± {:.3e}", self.values[i], self.sigma(i))?;
        }
        write!(f, "]")
    }
}

/// Weight (information) form of a Gaussian state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub vector: ParamVector,
    pub matrix: ParamMatrix,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            vector: ParamVector::zeros(),
            matrix: ParamMatrix::zeros(),
        }
    }
}

impl Weights {
    pub fn new(vector: ParamVector, matrix: ParamMatrix) -> Self {
        Weights { vector, matrix }
    }

    /// Convert a parameter state to information form.
    pub fn from_parameters(params: &Parameters) -> Result<Self, KinFitError> {
        let matrix = invert_symmetric(&params.covariance, "parameter covariance")?;
        Ok(Weights {
            vector: matrix * params.values,
            matrix,
        })
    }

    /// True when no information has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.matrix.iter().all(|v| *v == 0.0)
    }

    /// Apply a parameter-space contribution (mean shift plus added covariance).
    ///
    /// The accumulated information must be invertible; this is the information-filter
    /// counterpart of a process-noise step.
    pub fn append_parameters(&mut self, contribution: &Parameters) -> Result<(), KinFitError> {
        let mut params = Parameters::from_weights(self)?;
        params += contribution;
        *self = Weights::from_parameters(&params)?;
        Ok(())
    }
}

impl AddAssign<&Weights> for Weights {
    fn add_assign(&mut self, other: &Weights) {
        self.vector += other.vector;
        self.matrix += other.matrix;
    }
}

impl SubAssign<&Weights> for Weights {
    fn sub_assign(&mut self, other: &Weights) {
        self.vector -= other.vector;
        self.matrix -= other.matrix;
    }
}

impl Add for Weights {
    type Output = Weights;

    fn add(mut self, other: Weights) -> Weights {
        self += &other;
        self
    }
}

impl Sub for Weights {
    type Output = Weights;

    fn sub(mut self, other: Weights) -> Weights {
        self -= &other;
        self
    }
}

#[cfg(test)]
mod parameters_test {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_parameters() -> Parameters {
        let values = ParamVector::new(1.0, -2.0, 0.5, 3.0, 0.1, 7.0);
        let mut covariance = ParamMatrix::from_diagonal(&ParamVector::new(
            0.04, 0.09, 0.01, 0.25, 1e-4, 0.36,
        ));
        covariance[(0, 1)] = 0.01;
        covariance[(1, 0)] = 0.01;
        covariance[(3, 5)] = -0.05;
        covariance[(5, 3)] = -0.05;
        Parameters::new(values, covariance)
    }

    #[test]
    fn test_parameter_weight_round_trip() {
        let params = sample_parameters();
        let weights = Weights::from_parameters(&params).unwrap();
        let back = Parameters::from_weights(&weights).unwrap();
        assert_relative_eq!(back.values, params.values, epsilon = 1e-10);
        assert_relative_eq!(back.covariance, params.covariance, epsilon = 1e-12);
        assert_relative_eq!(
            weights.matrix * params.covariance,
            ParamMatrix::identity(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_fusion_is_order_independent() {
        let a = Weights::from_parameters(&sample_parameters()).unwrap();
        let mut other = sample_parameters();
        other.values[2] = -1.5;
        other.covariance *= 3.0;
        let b = Weights::from_parameters(&other).unwrap();

        let mut ab = Weights::default();
        ab += &a;
        ab += &b;
        let mut ba = Weights::default();
        ba += &b;
        ba += &a;
        assert_eq!(ab.matrix, ba.matrix);
        assert_eq!(ab.vector, ba.vector);
        assert_relative_eq!((ab - b).matrix, a.matrix, epsilon = 1e-9);
    }

    #[test]
    fn test_fusion_of_identical_states_halves_covariance() {
        let params = sample_parameters();
        let w = Weights::from_parameters(&params).unwrap();
        let fused = Parameters::from_weights(&(w + w)).unwrap();
        assert_relative_eq!(fused.values, params.values, epsilon = 1e-10);
        assert_relative_eq!(fused.covariance, params.covariance * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_append_parameters_adds_mean_and_covariance() {
        let params = sample_parameters();
        let mut weights = Weights::from_parameters(&params).unwrap();
        let shift = Parameters::new(
            ParamVector::new(0.1, 0.0, 0.0, 0.0, 0.0, -0.2),
            ParamMatrix::from_diagonal(&ParamVector::new(0.01, 0.0, 0.0, 0.0, 0.0, 0.04)),
        );
        weights.append_parameters(&shift).unwrap();
        let result = Parameters::from_weights(&weights).unwrap();
        assert_relative_eq!(result.values, params.values + shift.values, epsilon = 1e-9);
        assert_relative_eq!(
            result.covariance,
            params.covariance + shift.covariance,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_singular_weight_is_an_error() {
        let weights = Weights::default();
        assert_eq!(
            Parameters::from_weights(&weights),
            Err(KinFitError::SingularMatrix("weight matrix"))
        );
        assert!(weights.is_empty());
    }

    #[test]
    fn test_negation_keeps_covariance() {
        let params = sample_parameters();
        let negated = -params;
        assert_eq!(negated.values, -params.values);
        assert_eq!(negated.covariance, params.covariance);
    }
}
