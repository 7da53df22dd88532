//! # Fit configuration
//!
//! [`FitConfig`] gathers every tunable of a [`KalmanChain`](crate::fit::KalmanChain) fit: the
//! annealing schedule, the convergence and divergence thresholds of the iteration loop, the
//! seed de-weighting, the magnetic field correction mode and the closest-approach controls.
//!
//! The schedule is a list of [`MetaIterationConfig`], one per meta-iteration. Each one carries
//! an annealing *temperature* (a multiplicative inflation of the measurement and material
//! variances) and two flags telling whether hits may refresh their internal state (wire
//! ambiguities) and whether material crossings are re-located on the updated trajectory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kinfit::fit::{FitConfig, MetaIterationConfig};
//!
//! let config = FitConfig::builder()
//!     .schedule(vec![
//!         MetaIterationConfig::new(100.0, true, true),
//!         MetaIterationConfig::new(10.0, true, true),
//!         MetaIterationConfig::new(1.0, false, true),
//!     ])
//!     .max_iterations(20)
//!     .convergence_dchisq(0.01)
//!     .build()
//!     .unwrap();
//! println!("{config:#}");
//! ```

use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::closest_approach::ClosestApproachSettings;
use crate::constants::{POCA_MAX_ITERATIONS, POCA_PRECISION};
use crate::kinfit_errors::KinFitError;

/// How the difference between the true field and the nominal field is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldCorrection {
    /// Ignore the field variation: the seed nominal field is used everywhere.
    None,
    /// Add the integrated momentum change of the field difference, keeping the nominal field.
    Fixed,
    /// As `Fixed`, and re-express the trajectory under the local field at each correction.
    Variable,
}

impl fmt::Display for FieldCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldCorrection::None => "none",
            FieldCorrection::Fixed => "fixed",
            FieldCorrection::Variable => "variable",
        };
        write!(f, "{name}")
    }
}

/// Settings of one meta-iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetaIterationConfig {
    /// Annealing temperature; 1 means nominal variances.
    pub temperature: f64,
    /// Let hits refresh their internal state (e.g. left/right ambiguity).
    pub update_hits: bool,
    /// Re-locate material crossings on the current reference trajectory.
    pub update_materials: bool,
}

impl Default for MetaIterationConfig {
    fn default() -> Self {
        MetaIterationConfig {
            temperature: 1.0,
            update_hits: false,
            update_materials: true,
        }
    }
}

impl MetaIterationConfig {
    pub fn new(temperature: f64, update_hits: bool, update_materials: bool) -> Self {
        MetaIterationConfig {
            temperature,
            update_hits,
            update_materials,
        }
    }

    /// Factor applied to measurement and material variances.
    pub fn variance_scale(&self) -> f64 {
        self.temperature
    }
}

impl fmt::Display for MetaIterationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "T={:.3e} update_hits={} update_materials={}",
            self.temperature, self.update_hits, self.update_materials
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    // --- Annealing / iterations ---
    pub schedule: Vec<MetaIterationConfig>,
    /// Maximum number of iterations within one meta-iteration.
    pub max_iterations: usize,

    // --- Convergence tests ---
    /// Convergence when |Δχ²| per degree of freedom falls below this value.
    pub convergence_dchisq: f64,
    /// Divergence when χ² grows by more than this value per degree of freedom...
    pub divergence_dchisq: f64,
    /// ...and by more than this factor relative to the previous iteration.
    pub divergence_factor: f64,
    /// Convergence also requires the parameter shift χ² per parameter to fall below this value.
    pub convergence_param_shift: f64,

    // --- Seed ---
    /// Inflation factor of the seed (and previous fit) covariance injected at the chain ends.
    pub seed_deweight: f64,

    // --- Field ---
    pub field_correction: FieldCorrection,
    /// Position tolerance (mm) of the nominal-field approximation between field corrections.
    pub field_tolerance: f64,

    // --- Material ---
    /// When false, material effects are created inactive.
    pub add_material: bool,

    // --- Closest approach ---
    pub poca_precision: f64,
    pub poca_max_iterations: usize,

    /// A fit with fewer active hits fails.
    pub min_active_hits: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            schedule: vec![MetaIterationConfig::default()],
            max_iterations: 10,

            convergence_dchisq: 0.01,
            divergence_dchisq: 10.0,
            divergence_factor: 10.0,
            convergence_param_shift: 1.0e-2,

            seed_deweight: 1.0e6,

            field_correction: FieldCorrection::None,
            field_tolerance: 0.1,

            add_material: true,

            poca_precision: POCA_PRECISION,
            poca_max_iterations: POCA_MAX_ITERATIONS,

            min_active_hits: 1,
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> FitConfigBuilder {
        FitConfigBuilder::new()
    }

    /// Closest-approach controls for hits and material crossings.
    pub fn poca_settings(&self) -> ClosestApproachSettings {
        ClosestApproachSettings {
            precision: self.poca_precision,
            max_iterations: self.poca_max_iterations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitConfigBuilder {
    config: FitConfig,
}

impl Default for FitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FitConfig::default(),
        }
    }

    pub fn schedule(mut self, v: Vec<MetaIterationConfig>) -> Self {
        self.config.schedule = v;
        self
    }
    /// Schedule built from temperatures only, with hit and material updates enabled.
    pub fn temperatures(mut self, temperatures: &[f64]) -> Self {
        self.config.schedule = temperatures
            .iter()
            .map(|&t| MetaIterationConfig::new(t, true, true))
            .collect();
        self
    }
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.config.max_iterations = v;
        self
    }
    pub fn convergence_dchisq(mut self, v: f64) -> Self {
        self.config.convergence_dchisq = v;
        self
    }
    pub fn divergence_dchisq(mut self, v: f64) -> Self {
        self.config.divergence_dchisq = v;
        self
    }
    pub fn divergence_factor(mut self, v: f64) -> Self {
        self.config.divergence_factor = v;
        self
    }
    pub fn convergence_param_shift(mut self, v: f64) -> Self {
        self.config.convergence_param_shift = v;
        self
    }
    pub fn seed_deweight(mut self, v: f64) -> Self {
        self.config.seed_deweight = v;
        self
    }
    pub fn field_correction(mut self, v: FieldCorrection) -> Self {
        self.config.field_correction = v;
        self
    }
    pub fn field_tolerance(mut self, v: f64) -> Self {
        self.config.field_tolerance = v;
        self
    }
    pub fn add_material(mut self, v: bool) -> Self {
        self.config.add_material = v;
        self
    }
    pub fn poca_precision(mut self, v: f64) -> Self {
        self.config.poca_precision = v;
        self
    }
    pub fn poca_max_iterations(mut self, v: usize) -> Self {
        self.config.poca_max_iterations = v;
        self
    }
    pub fn min_active_hits(mut self, v: usize) -> Self {
        self.config.min_active_hits = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff a <= b and comparable (i.e., not NaN).
    #[inline]
    fn le(a: f64, b: f64) -> bool {
        matches!(a.partial_cmp(&b), Some(Less) | Some(Equal))
    }

    /// Validate and produce the [`FitConfig`].
    ///
    /// Validation rules
    /// -----------------
    /// * the schedule is not empty,
    /// * every temperature is ≥ 1 and the temperatures never increase along the schedule,
    /// * `max_iterations ≥ 1` and `poca_max_iterations ≥ 1`,
    /// * tolerances, thresholds and `seed_deweight` are strictly positive,
    /// * `divergence_factor > 1`.
    ///
    /// Returns
    /// -----------------
    /// * `Err(KinFitError::InvalidFitParameter)` naming the first violated rule.
    pub fn build(self) -> Result<FitConfig, KinFitError> {
        let c = &self.config;
        let invalid = |msg: &str| -> Result<FitConfig, KinFitError> {
            Err(KinFitError::InvalidFitParameter(msg.into()))
        };

        if c.schedule.is_empty() {
            return invalid("schedule must contain at least one meta-iteration");
        }
        if !c.schedule.iter().all(|m| Self::le(1.0, m.temperature)) {
            return invalid("annealing temperatures must be >= 1");
        }
        if !c
            .schedule
            .windows(2)
            .all(|w| Self::le(w[1].temperature, w[0].temperature))
        {
            return invalid("annealing temperatures must not increase");
        }

        if c.max_iterations == 0 {
            return invalid("max_iterations must be >= 1");
        }
        if c.poca_max_iterations == 0 {
            return invalid("poca_max_iterations must be >= 1");
        }

        if !Self::gt0(c.convergence_dchisq) || !Self::gt0(c.divergence_dchisq) {
            return invalid("chi-square change thresholds must be > 0");
        }
        if !Self::gt0(c.convergence_param_shift) {
            return invalid("convergence_param_shift must be > 0");
        }
        if !Self::gt0(c.divergence_factor - 1.0) {
            return invalid("divergence_factor must be > 1");
        }
        if !Self::gt0(c.seed_deweight) {
            return invalid("seed_deweight must be > 0");
        }
        if !Self::gt0(c.field_tolerance) {
            return invalid("field_tolerance must be > 0");
        }
        if !Self::gt0(c.poca_precision) {
            return invalid("poca_precision must be > 0");
        }

        Ok(self.config)
    }
}

impl fmt::Display for FitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 50;
            writeln!(f, "Kinematic Fit Configuration")?;
            writeln!(f, "---------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Annealing schedule]")?;
            for (i, meta) in self.schedule.iter().enumerate() {
                line!("meta {:<3}", i, meta)?;
            }
            line!(
                "max_iterations          = {}",
                self.max_iterations,
                "Iterations per meta-iteration"
            )?;

            writeln!(f, "\n[Convergence]")?;
            line!(
                "convergence_dchisq      = {:.3e}",
                self.convergence_dchisq,
                "|dchi2|/ndof for convergence"
            )?;
            line!(
                "convergence_param_shift = {:.3e}",
                self.convergence_param_shift,
                "Parameter shift chi2 per parameter"
            )?;
            line!(
                "divergence_dchisq       = {:.3e}",
                self.divergence_dchisq,
                "dchi2/ndof growth for divergence"
            )?;
            line!(
                "divergence_factor       = {:.2}",
                self.divergence_factor,
                "Relative chi2 growth for divergence"
            )?;

            writeln!(f, "\n[Seed / field / material]")?;
            line!(
                "seed_deweight           = {:.1e}",
                self.seed_deweight,
                "Covariance inflation at the chain ends"
            )?;
            line!(
                "field_correction        = {}",
                self.field_correction,
                "Field difference treatment"
            )?;
            line!(
                "field_tolerance         = {:.3} mm",
                self.field_tolerance,
                "Nominal-field position tolerance"
            )?;
            line!(
                "add_material            = {}",
                self.add_material,
                "Material effects active"
            )?;

            writeln!(f, "\n[Closest approach]")?;
            line!(
                "poca_precision          = {:.1e} ns",
                self.poca_precision,
                "Newton time precision"
            )?;
            line!(
                "poca_max_iterations     = {}",
                self.poca_max_iterations,
                "Newton iteration cap"
            )?;
            line!(
                "min_active_hits         = {}",
                self.min_active_hits,
                "Fewer active hits fail the fit"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "FitConfig({} meta-iterations, max_iterations={}, dchisq<{:.2e}, shift<{:.2e}, deweight={:.1e}, field={}, material={})",
                self.schedule.len(),
                self.max_iterations,
                self.convergence_dchisq,
                self.convergence_param_shift,
                self.seed_deweight,
                self.field_correction,
                self.add_material
            )
        }
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = FitConfig::builder().build().unwrap();
        assert_eq!(config, FitConfig::default());
        assert_eq!(config.schedule.len(), 1);
        assert_eq!(config.schedule[0].variance_scale(), 1.0);
        assert_eq!(config.poca_settings(), ClosestApproachSettings::default());
    }

    #[test]
    fn test_temperatures_builder() {
        let config = FitConfig::builder()
            .temperatures(&[1e6, 1e2, 1.0])
            .build()
            .unwrap();
        let temps: Vec<f64> = config.schedule.iter().map(|m| m.temperature).collect();
        assert_eq!(temps, vec![1e6, 1e2, 1.0]);
        assert!(config.schedule.iter().all(|m| m.update_hits));
    }

    #[test]
    fn test_rejects_bad_schedules() {
        assert!(matches!(
            FitConfig::builder().schedule(vec![]).build(),
            Err(KinFitError::InvalidFitParameter(_))
        ));
        assert!(FitConfig::builder().temperatures(&[0.5]).build().is_err());
        assert!(FitConfig::builder().temperatures(&[1.0, 10.0]).build().is_err());
        assert!(FitConfig::builder().temperatures(&[f64::NAN]).build().is_err());
        assert!(FitConfig::builder().temperatures(&[10.0, 10.0, 1.0]).build().is_ok());
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        assert!(FitConfig::builder().max_iterations(0).build().is_err());
        assert!(FitConfig::builder().convergence_dchisq(0.0).build().is_err());
        assert!(FitConfig::builder().divergence_factor(1.0).build().is_err());
        assert!(FitConfig::builder().seed_deweight(-1.0).build().is_err());
        assert!(FitConfig::builder().poca_precision(f64::NAN).build().is_err());
        let err = FitConfig::builder().field_tolerance(0.0).build().unwrap_err();
        assert_eq!(
            err,
            KinFitError::InvalidFitParameter("field_tolerance must be > 0".into())
        );
    }

    #[test]
    fn test_display_table() {
        let config = FitConfig::builder()
            .temperatures(&[10.0, 1.0])
            .field_correction(FieldCorrection::Variable)
            .build()
            .unwrap();
        let table = format!("{config:#}");
        assert!(table.starts_with("Kinematic Fit Configuration"));
        assert!(table.contains("field_correction        = variable"));
        assert!(table.contains("meta 1"));
        let short = format!("{config}");
        assert!(short.starts_with("FitConfig(2 meta-iterations"));
    }
}
