//! # Material crossings and their effect on the particle momentum
//!
//! A particle traversing detector material loses energy and scatters. The fit models each
//! traversal as a [`MaterialCrossing`] (which material, how much path length) located at a single
//! time on the trajectory. A [`MaterialModel`] turns the crossings into [`MomentumEffects`]:
//! fractional mean momentum changes and variances along the three [`MomentumBasis`] directions.
//!
//! Crossings are found by a [`CrossingGeometry`]:
//!
//! * [`StrawCrossing`]: a gas-filled straw tube, located through a closest-approach solve between
//!   the trajectory and the straw axis. Wall and gas path lengths follow from the DOCA and the
//!   crossing angle.
//! * [`FixedCrossing`]: material at a known time with known path lengths (foils, targets).
//!
//! [`HighlandMaterial`] is the simple model provided here: mean ionization loss scaled by `1/β²`
//! with a fractional straggling width, and Highland multiple scattering in the two transverse
//! directions.

use std::f64::consts::FRAC_PI_2;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::closest_approach::{ClosestApproach, ClosestApproachHint, ClosestApproachSettings};
use crate::kinfit_errors::KinFitError;
use crate::particle_state::ParticleState;
use crate::trajectory::{
    KinematicTrajectory, MomentumBasis, PieceTrajectory, SensorLine, Trajectory,
};

/// Crossings of one detector element; straws produce at most a wall and a gas crossing.
pub type Crossings = SmallVec<[MaterialCrossing; 2]>;

/// Bulk properties of a material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Radiation length in mm.
    pub radiation_length: f64,
    /// Minimum-ionizing energy loss in MeV/mm.
    pub dedx_mip: f64,
}

impl Material {
    pub fn new(name: &str, radiation_length: f64, dedx_mip: f64) -> Self {
        Material {
            name: name.to_string(),
            radiation_length,
            dedx_mip,
        }
    }

    /// Polyester film commonly used for straw walls.
    pub fn mylar() -> Self {
        Material::new("mylar", 287.0, 0.24)
    }

    /// Argon/CO2 drift gas at atmospheric pressure.
    pub fn drift_gas() -> Self {
        Material::new("ArCO2", 1.2e5, 3.0e-4)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialCrossing {
    pub material: Material,
    /// Path length through the material in mm.
    pub path_length: f64,
}

impl MaterialCrossing {
    pub fn new(material: Material, path_length: f64) -> Self {
        MaterialCrossing {
            material,
            path_length,
        }
    }

    /// Thickness in radiation lengths.
    pub fn radiation_fraction(&self) -> f64 {
        self.path_length / self.material.radiation_length
    }
}

/// Fractional momentum changes (mean) and their variances, indexed by [`MomentumBasis::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumEffects {
    pub dmom: [f64; 3],
    pub momvar: [f64; 3],
}

impl MomentumEffects {
    pub fn mean(&self, basis: MomentumBasis) -> f64 {
        self.dmom[basis.index()]
    }

    pub fn variance(&self, basis: MomentumBasis) -> f64 {
        self.momvar[basis.index()]
    }
}

impl fmt::Display for MomentumEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MomentumEffects")?;
        for basis in MomentumBasis::ALL {
            write!(
                f,
                " {basis}: {:.3e} ± {:.3e}",
                self.mean(basis),
                self.variance(basis).max(0.0).sqrt()
            )?;
        }
        Ok(())
    }
}

/// Physics of the momentum change in material, for forward time propagation.
pub trait MaterialModel: Send + Sync {
    fn momentum_effects(
        &self,
        state: &ParticleState,
        crossings: &[MaterialCrossing],
    ) -> MomentumEffects;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlandMaterial {
    /// Energy-loss straggling width as a fraction of the mean loss.
    pub straggling_fraction: f64,
}

impl Default for HighlandMaterial {
    fn default() -> Self {
        HighlandMaterial {
            straggling_fraction: 0.3,
        }
    }
}

impl HighlandMaterial {
    /// Highland scattering angle width for a total thickness `x` (radiation lengths).
    pub fn scattering_angle(&self, state: &ParticleState, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        let beta = state.beta();
        let p = state.momentum_mag();
        let z2 = f64::from(state.charge * state.charge).max(1.0);
        let log_term = (1.0 + 0.038 * (x * z2 / (beta * beta)).ln()).max(0.0);
        13.6 / (beta * p) * z2.sqrt() * x.sqrt() * log_term
    }
}

impl MaterialModel for HighlandMaterial {
    fn momentum_effects(
        &self,
        state: &ParticleState,
        crossings: &[MaterialCrossing],
    ) -> MomentumEffects {
        let mut effects = MomentumEffects::default();
        if crossings.is_empty() {
            return effects;
        }
        let beta = state.beta();
        let p = state.momentum_mag();
        let energy = state.energy();
        let eloss: f64 = crossings
            .iter()
            .map(|c| c.material.dedx_mip * c.path_length)
            .sum::<f64>()
            / (beta * beta);
        // dp = dE · E / p
        let dp_frac = -eloss * energy / (p * p);
        let mom = MomentumBasis::MomDir.index();
        effects.dmom[mom] = dp_frac;
        effects.momvar[mom] = (self.straggling_fraction * dp_frac).powi(2);

        let x: f64 = crossings.iter().map(MaterialCrossing::radiation_fraction).sum();
        let theta2 = self.scattering_angle(state, x).powi(2);
        effects.momvar[MomentumBasis::PerpDir.index()] = theta2;
        effects.momvar[MomentumBasis::PhiDir.index()] = theta2;
        effects
    }
}

/// Geometry and materials of a straw tube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrawMaterial {
    /// Inner radius in mm.
    pub radius: f64,
    pub wall_thickness: f64,
    pub wall: Material,
    pub gas: Material,
}

impl StrawMaterial {
    pub fn new(radius: f64, wall_thickness: f64, wall: Material, gas: Material) -> Self {
        StrawMaterial {
            radius,
            wall_thickness,
            wall,
            gas,
        }
    }

    /// Mylar straw filled with drift gas.
    pub fn mylar_straw(radius: f64, wall_thickness: f64) -> Self {
        StrawMaterial::new(radius, wall_thickness, Material::mylar(), Material::drift_gas())
    }

    /// Wall and gas path lengths for a track passing the axis at `doca` with uncertainty
    /// `doca_sigma`, at an angle whose cosine to the axis is `dir_dot`.
    ///
    /// When the DOCA is uncertain by more than the radius, average path lengths over the
    /// straw cross-section are used instead of the chord.
    pub fn find_crossings(&self, doca: f64, doca_sigma: f64, dir_dot: f64) -> Crossings {
        let mut crossings = Crossings::new();
        let sin_angle = (1.0 - dir_dot * dir_dot).max(1e-6).sqrt();
        let adoca = doca.abs();
        let grazing = (2.0 * self.radius * self.wall_thickness).sqrt();
        if doca_sigma > self.radius {
            let gas_path = FRAC_PI_2 * self.radius;
            let wall_path = FRAC_PI_2 * self.wall_thickness;
            crossings.push(MaterialCrossing::new(self.gas.clone(), 2.0 * gas_path / sin_angle));
            crossings.push(MaterialCrossing::new(self.wall.clone(), 2.0 * wall_path / sin_angle));
        } else if adoca < self.radius {
            let half_chord = (self.radius * self.radius - adoca * adoca).sqrt();
            let wall_path = self.wall_thickness * self.radius / half_chord.max(grazing);
            crossings.push(MaterialCrossing::new(self.gas.clone(), 2.0 * half_chord / sin_angle));
            crossings.push(MaterialCrossing::new(self.wall.clone(), 2.0 * wall_path / sin_angle));
        } else if adoca < self.radius + self.wall_thickness {
            // wall only: the track clips the straw
            crossings.push(MaterialCrossing::new(self.wall.clone(), 2.0 * grazing / sin_angle));
        }
        crossings
    }
}

/// Where, and through what, a trajectory crosses a detector element.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingLocation {
    pub time: f64,
    pub crossings: Crossings,
}

/// A straw tube: its axis and its materials.
#[derive(Debug, Clone, PartialEq)]
pub struct StrawCrossing {
    pub axis: SensorLine,
    pub material: StrawMaterial,
    /// Estimate of the particle time at the straw.
    pub time_estimate: Option<f64>,
}

/// Material crossed at a fixed time.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedCrossing {
    pub time: f64,
    pub crossings: Crossings,
}

/// Detector element that can be crossed by the particle.
#[derive(Debug, Clone, PartialEq)]
pub enum CrossingGeometry {
    Straw(StrawCrossing),
    Fixed(FixedCrossing),
}

impl CrossingGeometry {
    pub fn straw(axis: SensorLine, material: StrawMaterial) -> Self {
        CrossingGeometry::Straw(StrawCrossing {
            axis,
            material,
            time_estimate: None,
        })
    }

    /// Straw crossed at about `time`, typically the time of the hit it carries.
    pub fn straw_near(axis: SensorLine, material: StrawMaterial, time: f64) -> Self {
        CrossingGeometry::Straw(StrawCrossing {
            axis,
            material,
            time_estimate: Some(time),
        })
    }

    pub fn fixed(time: f64, crossings: Crossings) -> Self {
        CrossingGeometry::Fixed(FixedCrossing { time, crossings })
    }

    /// Initial estimate of the crossing time.
    pub fn nominal_time<T: KinematicTrajectory>(&self, reference: &PieceTrajectory<T>) -> f64 {
        match self {
            CrossingGeometry::Fixed(fixed) => fixed.time,
            CrossingGeometry::Straw(straw) => match straw.time_estimate {
                Some(time) => reference.range().force_range(time),
                None => ClosestApproachHint::from_projection(reference, &straw.axis).particle_time,
            },
        }
    }

    /// Locate the crossing on `reference`, starting from `time_hint`.
    pub fn locate<T: KinematicTrajectory>(
        &self,
        reference: &PieceTrajectory<T>,
        time_hint: f64,
        settings: &ClosestApproachSettings,
    ) -> Result<CrossingLocation, KinFitError> {
        match self {
            CrossingGeometry::Fixed(fixed) => Ok(CrossingLocation {
                time: fixed.time,
                crossings: fixed.crossings.clone(),
            }),
            CrossingGeometry::Straw(straw) => {
                let sensor_time = straw
                    .axis
                    .range()
                    .force_range(straw.axis.toca(&reference.position(time_hint)));
                let hint = ClosestApproachHint::new(time_hint, sensor_time);
                let ca = ClosestApproach::on_pieces(reference, &straw.axis, hint, settings);
                if !ca.usable() {
                    return Err(KinFitError::ClosestApproachFailed(ca.status));
                }
                let covariance = reference.nearest_piece(ca.particle_toca).params().covariance;
                let doca_sigma = ca.doca_variance(&covariance).max(0.0).sqrt();
                Ok(CrossingLocation {
                    time: ca.particle_toca,
                    crossings: straw.material.find_crossings(ca.doca, doca_sigma, ca.dir_dot),
                })
            }
        }
    }
}
