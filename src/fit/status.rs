//! Outcome of a fit, updated once per iteration.

use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FitState {
    /// No iteration has run yet.
    Unfit,
    Converged,
    /// The iteration budget of a meta-iteration was exhausted.
    Unconverged,
    Diverged,
    Failed,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitState::Unfit => "unfit",
            FitState::Converged => "converged",
            FitState::Unconverged => "unconverged",
            FitState::Diverged => "diverged",
            FitState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStatus {
    pub state: FitState,
    /// Iteration within the meta-iteration.
    pub iteration: usize,
    pub meta_iteration: usize,
    pub chisq: f64,
    pub ndof: i32,
    /// Upper-tail probability of `chisq` for `ndof` degrees of freedom.
    pub probability: f64,
    /// Hits skipped in this iteration because their closest approach failed.
    pub dropped_hits: usize,
    pub comment: String,
}

impl Default for FitStatus {
    fn default() -> Self {
        FitStatus {
            state: FitState::Unfit,
            iteration: 0,
            meta_iteration: 0,
            chisq: 0.0,
            ndof: 0,
            probability: 1.0,
            dropped_hits: 0,
            comment: String::new(),
        }
    }
}

impl FitStatus {
    pub fn new(meta_iteration: usize, iteration: usize) -> Self {
        FitStatus {
            meta_iteration,
            iteration,
            ..Default::default()
        }
    }

    pub fn set_chisq(&mut self, chisq: f64, ndof: i32) {
        self.chisq = chisq;
        self.ndof = ndof;
        self.probability = chisq_probability(chisq, ndof);
    }

    pub fn fail(&mut self, comment: impl Into<String>) {
        self.state = FitState::Failed;
        self.comment = comment.into();
    }

    /// Append to the comment, keeping what is already there.
    pub fn note(&mut self, text: impl AsRef<str>) {
        if !self.comment.is_empty() {
            self.comment.push_str("; ");
        }
        self.comment.push_str(text.as_ref());
    }

    /// Record hits dropped by a failed closest approach.
    pub fn set_dropped_hits(&mut self, dropped: usize) {
        self.dropped_hits = dropped;
        if dropped > 0 {
            self.note(format!("{dropped} hits dropped: closest approach failed"));
        }
    }

    /// Diverged and failed fits are not resumed by later meta-iterations.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, FitState::Diverged | FitState::Failed)
    }

    /// True when the fit trajectory can be trusted.
    pub fn usable(&self) -> bool {
        self.state == FitState::Converged
    }

    /// χ² per degree of freedom, with the degrees of freedom floored at one.
    pub fn chisq_per_ndof(&self) -> f64 {
        self.chisq / f64::from(self.ndof.max(1))
    }
}

/// Probability of a χ² at least as large as `chisq`; 1 without degrees of freedom.
pub fn chisq_probability(chisq: f64, ndof: i32) -> f64 {
    if ndof < 1 {
        return 1.0;
    }
    ChiSquared::new(f64::from(ndof))
        .map(|dist| dist.sf(chisq.max(0.0)))
        .unwrap_or(0.0)
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at meta-iteration {}, iteration {}: chisq = {:.4}, ndof = {}, prob = {:.4e}",
            self.state,
            self.meta_iteration,
            self.iteration,
            self.chisq,
            self.ndof,
            self.probability
        )?;
        if !self.comment.is_empty() {
            write!(f, " ({})", self.comment)?;
        }
        Ok(())
    }
}
