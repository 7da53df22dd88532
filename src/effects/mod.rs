//! # Fit effects
//!
//! Everything that changes the state of the particle along the fit is an *effect*, processed in
//! time order by the [`KalmanChain`](crate::fit::KalmanChain) in both directions:
//!
//! | Effect | Information | Mean shift | Fit piece |
//! |---|---|---|---|
//! | [`EndEffect`] | de-weighted seed, injected at the start of one pass | – | the first piece |
//! | [`HitEffect`] | measurement weight | – | – |
//! | [`MaterialEffect`] | – | energy loss, negated backwards | one per crossing |
//! | [`FieldEffect`] | – | field-difference momentum change, negated backwards | one per correction |
//!
//! Hits add information and are processed identically in both directions: the running weight
//! seen by a hit is cached before the hit adds its own, so that after both passes the cache
//! holds all the information of the fit *except* the hit. Material and field effects act in
//! parameter space: they add covariance (process noise) and shift the mean. Covariance always
//! grows, the mean shift changes sign with the pass direction.
//!
//! Effects live in an arena owned by the chain and are addressed by [`EffectId`].

pub mod end_effect;
pub mod field_effect;
pub mod hit_effect;
pub mod material_effect;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fit::MetaIterationConfig;
use crate::hits::Residual;
use crate::kinfit_errors::KinFitError;
use crate::material::MomentumEffects;
use crate::parameters::Weights;
use crate::trajectory::{KinematicTrajectory, PieceTrajectory};

pub use end_effect::EndEffect;
pub use field_effect::FieldEffect;
pub use hit_effect::HitEffect;
pub use material_effect::MaterialEffect;

/// Direction of a pass through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassDirection {
    Forwards,
    Backwards,
}

impl PassDirection {
    pub const BOTH: [PassDirection; 2] = [PassDirection::Forwards, PassDirection::Backwards];

    pub fn index(self) -> usize {
        match self {
            PassDirection::Forwards => 0,
            PassDirection::Backwards => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PassDirection::Forwards => PassDirection::Backwards,
            PassDirection::Backwards => PassDirection::Forwards,
        }
    }
}

impl fmt::Display for PassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassDirection::Forwards => write!(f, "forwards"),
            PassDirection::Backwards => write!(f, "backwards"),
        }
    }
}

/// Which passes have processed an effect since its last update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessedFlags([bool; 2]);

impl ProcessedFlags {
    pub fn set(&mut self, direction: PassDirection) {
        self.0[direction.index()] = true;
    }

    pub fn was_processed(&self, direction: PassDirection) -> bool {
        self.0[direction.index()]
    }

    pub fn both(&self) -> bool {
        self.0[0] && self.0[1]
    }

    pub fn reset(&mut self) {
        self.0 = [false; 2];
    }
}

/// Handle of an effect in the chain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub usize);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    End,
    Hit,
    Material,
    Field,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::End => "end",
            EffectKind::Hit => "hit",
            EffectKind::Material => "material",
            EffectKind::Field => "field",
        };
        write!(f, "{name}")
    }
}

/// Read-only summary of one effect after a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDiagnostics {
    pub kind: EffectKind,
    pub active: bool,
    /// Hit skipped by the engine because its closest approach failed.
    pub dropped: bool,
    pub time: f64,
    /// Hits only.
    pub residual: Option<Residual>,
    /// Unbiased reduced residual, for hits processed in both directions.
    pub chi: Option<f64>,
    /// Number of material crossings (materials only).
    pub crossings: usize,
    pub momentum_effects: Option<MomentumEffects>,
}

impl fmt::Display for EffectDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} effect at {:.4} ns ({})",
            self.kind,
            self.time,
            if self.dropped {
                "dropped"
            } else if self.active {
                "active"
            } else {
                "inactive"
            }
        )?;
        if let Some(residual) = &self.residual {
            write!(f, " {residual}")?;
        }
        if let Some(chi) = self.chi {
            write!(f, " chi = {chi:.3}")?;
        }
        if let Some(effects) = &self.momentum_effects {
            write!(f, " {} crossings, {effects}", self.crossings)?;
        }
        Ok(())
    }
}

/// Closed set of effects handled by the chain.
pub enum Effect<T: KinematicTrajectory> {
    End(EndEffect<T>),
    Hit(HitEffect<T>),
    Material(MaterialEffect<T>),
    Field(FieldEffect<T>),
}

impl<T: KinematicTrajectory> Effect<T> {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::End(_) => EffectKind::End,
            Effect::Hit(_) => EffectKind::Hit,
            Effect::Material(_) => EffectKind::Material,
            Effect::Field(_) => EffectKind::Field,
        }
    }

    /// Particle time of the effect.
    pub fn time(&self) -> f64 {
        match self {
            Effect::End(e) => e.time(),
            Effect::Hit(e) => e.time(),
            Effect::Material(e) => e.time(),
            Effect::Field(e) => e.time(),
        }
    }

    /// Ordering key of the chain: the ends are always first and last.
    pub fn sort_time(&self) -> f64 {
        match self {
            Effect::End(e) => e.sort_time(),
            _ => self.time(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Effect::End(_) => true,
            Effect::Hit(e) => e.is_active(),
            Effect::Material(e) => e.is_active(),
            Effect::Field(e) => e.is_active(),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        match self {
            Effect::End(_) => {}
            Effect::Hit(e) => e.set_active(active),
            Effect::Material(e) => e.set_active(active),
            Effect::Field(e) => e.set_active(active),
        }
    }

    /// Re-linearize the effect around `reference`; `meta` is given at the start of a
    /// meta-iteration only.
    pub fn update(
        &mut self,
        reference: &PieceTrajectory<T>,
        meta: Option<&MetaIterationConfig>,
    ) -> Result<(), KinFitError> {
        match self {
            Effect::End(e) => e.update(reference),
            Effect::Hit(e) => {
                e.update(reference, meta);
                Ok(())
            }
            Effect::Material(e) => {
                e.update(reference, meta);
                Ok(())
            }
            Effect::Field(e) => e.update(reference),
        }
    }

    /// Fold the effect into the running weight of a pass.
    pub fn process(
        &mut self,
        state: &mut Weights,
        direction: PassDirection,
    ) -> Result<(), KinFitError> {
        match self {
            Effect::End(e) => {
                e.process(state, direction);
                Ok(())
            }
            Effect::Hit(e) => {
                e.process(state, direction);
                Ok(())
            }
            Effect::Material(e) => e.process(state, direction),
            Effect::Field(e) => e.process(state, direction),
        }
    }

    /// Add the piece starting at this effect to the fit trajectory.
    pub fn append(&self, fit: &mut PieceTrajectory<T>) -> Result<(), KinFitError> {
        match self {
            Effect::End(_) | Effect::Hit(_) => Ok(()),
            Effect::Material(e) => e.append(fit),
            Effect::Field(e) => e.append(fit),
        }
    }

    pub fn ndof(&self) -> usize {
        match self {
            Effect::Hit(e) => e.ndof(),
            _ => 0,
        }
    }

    pub fn diagnostics(&self) -> EffectDiagnostics {
        let mut diag = EffectDiagnostics {
            kind: self.kind(),
            active: self.is_active(),
            dropped: false,
            time: self.time(),
            residual: None,
            chi: None,
            crossings: 0,
            momentum_effects: None,
        };
        match self {
            Effect::Hit(e) => {
                diag.dropped = e.is_dropped();
                diag.residual = Some(*e.residual());
                diag.chi = e.fit_chi();
            }
            Effect::Material(e) => {
                diag.crossings = e.crossings().len();
                diag.momentum_effects = Some(*e.momentum_effects());
            }
            Effect::End(_) | Effect::Field(_) => {}
        }
        diag
    }
}

#[cfg(test)]
mod effects_test {
    use super::*;
    use crate::constants::ParamVector;

    #[test]
    fn test_processed_flags() {
        let mut flags = ProcessedFlags::default();
        assert!(!flags.both());
        flags.set(PassDirection::Forwards);
        assert!(flags.was_processed(PassDirection::Forwards));
        assert!(!flags.was_processed(PassDirection::Backwards));
        flags.set(PassDirection::Forwards.opposite());
        assert!(flags.both());
        flags.reset();
        assert_eq!(flags, ProcessedFlags::default());
    }

    #[test]
    fn test_diagnostics_display() {
        let diag = EffectDiagnostics {
            kind: EffectKind::Hit,
            active: true,
            dropped: false,
            time: 1.5,
            residual: Some(Residual::new(0.1, 0.01, 1.5, ParamVector::zeros())),
            chi: Some(-0.25),
            crossings: 0,
            momentum_effects: None,
        };
        let text = diag.to_string();
        assert!(text.starts_with("hit effect at 1.5000 ns (active)"));
        assert!(text.ends_with("chi = -0.250"));
        assert_eq!(EffectId(3).to_string(), "#3");

        let dropped = EffectDiagnostics {
            active: false,
            dropped: true,
            chi: None,
            ..diag
        };
        assert!(dropped.to_string().starts_with("hit effect at 1.5000 ns (dropped)"));
    }
}
