//! # Field-aligned helix
//!
//! [`LoopHelix`] describes a helix by its transverse radius and longitudinal wavelength, both
//! signed by the particle's reduced charge, the circle center, the azimuth at `z = 0`, and the
//! time at `z = 0`:
//!
//! ```text
//! φ(t) = ω (t - t0) + phi0
//! x(t) = cx + rad · sin φ
//! y(t) = cy - rad · cos φ
//! z(t) = lam · ω (t - t0)
//! p(t) = Q · (rad · cos φ, rad · sin φ, lam)
//! ```
//!
//! in the local frame, with `Q = -CBAR · q · |B|` the reduced charge,
//! `mbar = mass / Q` the reduced mass, and `ω = c · sign(mbar) / sqrt(rad² + lam² + mbar²)`.
//!
//! The parametrization is singular for tracks with no longitudinal motion (`lam = 0`).

use std::fmt;

use nalgebra::Vector3;

use crate::constants::{
    ParamMatrix, ParamVector, CBAR, C_LIGHT, DPDV, DPI, DVDP, NPARAMS,
};
use crate::kinfit_errors::KinFitError;
use crate::parameters::Parameters;
use crate::particle_state::{ParticleState, ParticleStateMeasurement};
use crate::time_range::TimeRange;
use crate::trajectory::{
    check_round_trip, momentum_basis, write_parameters, KinematicTrajectory, LocalFrame,
    MomentumBasis, ParameterDescriptor, Trajectory,
};

static DESCRIPTORS: [ParameterDescriptor; NPARAMS] = [
    ParameterDescriptor {
        name: "rad",
        unit: "mm",
        title: "Transverse radius",
    },
    ParameterDescriptor {
        name: "lam",
        unit: "mm",
        title: "Longitudinal wavelength",
    },
    ParameterDescriptor {
        name: "cx",
        unit: "mm",
        title: "Center x",
    },
    ParameterDescriptor {
        name: "cy",
        unit: "mm",
        title: "Center y",
    },
    ParameterDescriptor {
        name: "phi0",
        unit: "rad",
        title: "Azimuth at z=0",
    },
    ParameterDescriptor {
        name: "t0",
        unit: "ns",
        title: "Time at z=0",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct LoopHelix {
    params: Parameters,
    mass: f64,
    charge: i32,
    mbar: f64,
    frame: LocalFrame,
    range: TimeRange,
}

impl LoopHelix {
    pub const RAD: usize = 0;
    pub const LAM: usize = 1;
    pub const CX: usize = 2;
    pub const CY: usize = 3;
    pub const PHI0: usize = 4;
    pub const T0: usize = 5;

    /// Build the helix passing through `state` under the nominal field `bnom`.
    ///
    /// Arguments
    /// -----------------
    /// * `state`: position, time, momentum, mass and charge at the construction point.
    /// * `bnom`: nominal field vector in global coordinates (Tesla).
    /// * `range`: validity range of the new trajectory.
    /// * `covariance`: parameter covariance to attach.
    ///
    /// Return
    /// ----------
    /// * The helix, or an error if the frame cannot be aligned with `bnom`, the state is
    ///   degenerate (neutral, purely transverse or purely longitudinal momentum), or the
    ///   helix does not reproduce `state` at `state.time`.
    pub fn from_state(
        state: &ParticleState,
        bnom: Vector3<f64>,
        range: TimeRange,
        covariance: ParamMatrix,
    ) -> Result<Self, KinFitError> {
        let frame = LocalFrame::new(bnom)?;
        if state.charge == 0 {
            return Err(KinFitError::DegenerateState("neutral particles do not bend"));
        }
        if state.mass <= 0.0 {
            return Err(KinFitError::DegenerateState("mass must be positive"));
        }
        let pos = frame.to_local(&state.position);
        let mom = frame.to_local(&state.momentum);
        let pt = mom.x.hypot(mom.y);
        if pt <= 0.0 {
            return Err(KinFitError::DegenerateState(
                "momentum parallel to the field",
            ));
        }
        if mom.z == 0.0 {
            return Err(KinFitError::DegenerateState(
                "momentum perpendicular to the field",
            ));
        }

        let mom_to_rad = 1.0 / (CBAR * f64::from(state.charge) * frame.bmag());
        let mbar = -state.mass * mom_to_rad;
        let rad = -pt * mom_to_rad;
        let lam = -mom.z * mom_to_rad;
        let ebar = (rad * rad + lam * lam + mbar * mbar).sqrt();
        let omega = C_LIGHT * mbar.signum() / ebar;
        let t0 = state.time - pos.z / (omega * lam);
        let phibar = mom.y.atan2(mom.x);
        // winding that puts phi0 closest to (-π, π]
        let nwind = ((pos.z / lam - phibar) / DPI).round();
        let phi0 = phibar - omega * (state.time - t0) + DPI * nwind;
        let cx = pos.x + mom.y * mom_to_rad;
        let cy = pos.y - mom.x * mom_to_rad;

        let helix = LoopHelix {
            params: Parameters::new(ParamVector::new(rad, lam, cx, cy, phi0, t0), covariance),
            mass: state.mass,
            charge: state.charge,
            mbar,
            frame,
            range,
        };
        check_round_trip(&helix, state)?;
        Ok(helix)
    }

    /// Build from a state with covariance; the covariance is transformed to parameter space.
    pub fn from_measurement(
        measurement: &ParticleStateMeasurement,
        bnom: Vector3<f64>,
        range: TimeRange,
    ) -> Result<Self, KinFitError> {
        let mut helix = Self::from_state(&measurement.state, bnom, range, ParamMatrix::zeros())?;
        let jac = helix.dpar_dstate(measurement.state.time);
        helix.params.covariance = jac * measurement.covariance * jac.transpose();
        Ok(helix)
    }

    pub fn rad(&self) -> f64 {
        self.params.values[Self::RAD]
    }

    pub fn lam(&self) -> f64 {
        self.params.values[Self::LAM]
    }

    pub fn cx(&self) -> f64 {
        self.params.values[Self::CX]
    }

    pub fn cy(&self) -> f64 {
        self.params.values[Self::CY]
    }

    pub fn phi0(&self) -> f64 {
        self.params.values[Self::PHI0]
    }

    pub fn t0(&self) -> f64 {
        self.params.values[Self::T0]
    }

    /// Reduced mass, signed by the bending direction (mm).
    pub fn mbar(&self) -> f64 {
        self.mbar
    }

    /// Reduced charge: momentum per unit radius (MeV/c per mm).
    pub fn q(&self) -> f64 {
        self.mass / self.mbar
    }

    pub fn ebar(&self) -> f64 {
        let (rad, lam) = (self.rad(), self.lam());
        (rad * rad + lam * lam + self.mbar * self.mbar).sqrt()
    }

    /// Signed angular velocity (rad/ns).
    pub fn omega(&self) -> f64 {
        C_LIGHT * self.mbar.signum() / self.ebar()
    }

    pub fn dphi(&self, time: f64) -> f64 {
        self.omega() * (time - self.t0())
    }

    pub fn phi(&self, time: f64) -> f64 {
        self.dphi(time) + self.phi0()
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn local_position(&self, time: f64) -> Vector3<f64> {
        let dphi = self.dphi(time);
        let phi = dphi + self.phi0();
        Vector3::new(
            self.cx() + self.rad() * phi.sin(),
            self.cy() - self.rad() * phi.cos(),
            dphi * self.lam(),
        )
    }

    pub fn local_momentum(&self, time: f64) -> Vector3<f64> {
        let phi = self.phi(time);
        let q = self.q();
        Vector3::new(
            q * self.rad() * phi.cos(),
            q * self.rad() * phi.sin(),
            q * self.lam(),
        )
    }

    fn local_velocity(&self, time: f64) -> Vector3<f64> {
        let phi = self.phi(time);
        let omega = self.omega();
        Vector3::new(
            omega * self.rad() * phi.cos(),
            omega * self.rad() * phi.sin(),
            omega * self.lam(),
        )
    }

    fn local_dx_dpar(&self, time: f64) -> DVDP {
        let (rad, lam) = (self.rad(), self.lam());
        let omega = self.omega();
        let ebar2 = self.ebar().powi(2);
        let dt = time - self.t0();
        let (sphi, cphi) = self.phi(time).sin_cos();
        let domega_drad = -omega * rad / ebar2;
        let domega_dlam = -omega * lam / ebar2;
        let dphi_drad = dt * domega_drad;
        let dphi_dlam = dt * domega_dlam;

        let mut jac = DVDP::zeros();
        jac.set_column(
            Self::RAD,
            &Vector3::new(
                sphi + rad * cphi * dphi_drad,
                -cphi + rad * sphi * dphi_drad,
                lam * dt * domega_drad,
            ),
        );
        jac.set_column(
            Self::LAM,
            &Vector3::new(
                rad * cphi * dphi_dlam,
                rad * sphi * dphi_dlam,
                omega * dt + lam * dt * domega_dlam,
            ),
        );
        jac.set_column(Self::CX, &Vector3::x());
        jac.set_column(Self::CY, &Vector3::y());
        jac.set_column(Self::PHI0, &Vector3::new(rad * cphi, rad * sphi, 0.0));
        jac.set_column(
            Self::T0,
            &Vector3::new(-rad * cphi * omega, -rad * sphi * omega, -lam * omega),
        );
        jac
    }

    fn local_dm_dpar(&self, time: f64) -> DVDP {
        let (rad, lam) = (self.rad(), self.lam());
        let q = self.q();
        let omega = self.omega();
        let ebar2 = self.ebar().powi(2);
        let dt = time - self.t0();
        let (sphi, cphi) = self.phi(time).sin_cos();
        let dphi_drad = -dt * omega * rad / ebar2;
        let dphi_dlam = -dt * omega * lam / ebar2;

        let mut jac = DVDP::zeros();
        jac.set_column(
            Self::RAD,
            &(Vector3::new(
                cphi - rad * sphi * dphi_drad,
                sphi + rad * cphi * dphi_drad,
                0.0,
            ) * q),
        );
        jac.set_column(
            Self::LAM,
            &(Vector3::new(-rad * sphi * dphi_dlam, rad * cphi * dphi_dlam, 1.0) * q),
        );
        jac.set_column(
            Self::PHI0,
            &(Vector3::new(-rad * sphi, rad * cphi, 0.0) * q),
        );
        jac.set_column(
            Self::T0,
            &(Vector3::new(rad * sphi * omega, -rad * cphi * omega, 0.0) * q),
        );
        jac
    }

    fn local_dpar_dx(&self) -> DPDV {
        let lam = self.lam();
        let omega = self.omega();
        let mut jac = DPDV::zeros();
        jac[(Self::CX, 0)] = 1.0;
        jac[(Self::CY, 1)] = 1.0;
        jac[(Self::PHI0, 2)] = -1.0 / lam;
        jac[(Self::T0, 2)] = -1.0 / (lam * omega);
        jac
    }

    fn local_dpar_dm(&self, time: f64) -> DPDV {
        let (rad, lam) = (self.rad(), self.lam());
        let q = self.q();
        let omega = self.omega();
        let dt = time - self.t0();
        let (sphi, cphi) = self.phi(time).sin_cos();
        let z = self.local_position(time).z;
        let mom = self.local_momentum(time);
        let energy = self.energy(time);

        let mut jac = DPDV::zeros();
        jac.set_row(Self::RAD, &Vector3::new(cphi / q, sphi / q, 0.0).transpose());
        jac.set_row(Self::LAM, &Vector3::new(0.0, 0.0, 1.0 / q).transpose());
        jac.set_row(Self::CX, &Vector3::new(0.0, -1.0 / q, 0.0).transpose());
        jac.set_row(Self::CY, &Vector3::new(1.0 / q, 0.0, 0.0).transpose());
        jac.set_row(
            Self::PHI0,
            &Vector3::new(
                -sphi / (q * rad),
                cphi / (q * rad),
                omega * dt / (q * lam),
            )
            .transpose(),
        );
        // t0 = t - z E / (c pz)
        let denom = C_LIGHT * mom.z * energy;
        jac.set_row(
            Self::T0,
            &Vector3::new(
                -z * mom.x / denom,
                -z * mom.y / denom,
                z * (energy * energy - mom.z * mom.z) / (denom * mom.z),
            )
            .transpose(),
        );
        jac
    }

    /// Parameter change per Tesla of field magnitude change along the local z axis.
    fn dpar_dbmag(&self, time: f64) -> ParamVector {
        let rad = self.rad();
        let (sphi, cphi) = self.phi(time).sin_cos();
        ParamVector::new(
            -rad,
            -self.lam(),
            rad * sphi,
            -rad * cphi,
            -self.dphi(time),
            0.0,
        ) / self.frame.bmag()
    }
}

impl Trajectory for LoopHelix {
    fn position(&self, time: f64) -> Vector3<f64> {
        self.frame.to_global(&self.local_position(time))
    }

    fn velocity(&self, time: f64) -> Vector3<f64> {
        self.frame.to_global(&self.local_velocity(time))
    }

    fn speed(&self, _time: f64) -> f64 {
        let (rad, lam) = (self.rad(), self.lam());
        self.omega().abs() * (rad * rad + lam * lam).sqrt()
    }

    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64> {
        let local = momentum_basis(&self.local_momentum(time))[basis.index()];
        self.frame.to_global(&local)
    }

    fn range(&self) -> TimeRange {
        self.range
    }
}

impl KinematicTrajectory for LoopHelix {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn mass(&self) -> f64 {
        self.mass
    }

    fn charge(&self) -> i32 {
        self.charge
    }

    fn bnom(&self) -> Vector3<f64> {
        self.frame.bnom()
    }

    fn set_range(&mut self, range: TimeRange) {
        self.range = range;
    }

    fn descriptors(&self) -> &'static [ParameterDescriptor; NPARAMS] {
        &DESCRIPTORS
    }

    fn momentum(&self, time: f64) -> Vector3<f64> {
        self.frame.to_global(&self.local_momentum(time))
    }

    fn momentum_mag(&self, _time: f64) -> f64 {
        let (rad, lam) = (self.rad(), self.lam());
        self.q().abs() * (rad * rad + lam * lam).sqrt()
    }

    fn energy(&self, _time: f64) -> f64 {
        self.q().abs() * self.ebar()
    }

    fn dx_dpar(&self, time: f64) -> DVDP {
        self.frame.dv_dpar_global(&self.local_dx_dpar(time))
    }

    fn dm_dpar(&self, time: f64) -> DVDP {
        self.frame.dv_dpar_global(&self.local_dm_dpar(time))
    }

    fn dpar_dx(&self, _time: f64) -> DPDV {
        self.frame.dpar_dv_global(&self.local_dpar_dx())
    }

    fn dpar_dm(&self, time: f64) -> DPDV {
        self.frame.dpar_dv_global(&self.local_dpar_dm(time))
    }

    fn dpar_db(&self, time: f64, new_field: &Vector3<f64>) -> ParamVector {
        let db = self.frame.to_local(&(new_field - self.frame.bnom()));
        let mut dpar = self.dpar_dbmag(time) * db.z;
        // the direction change rotates position and momentum about z × dB
        let axis = Vector3::z().cross(&db) / self.frame.bmag();
        let dx = self.local_position(time).cross(&axis);
        let dm = self.local_momentum(time).cross(&axis);
        dpar += self.local_dpar_dx() * dx + self.local_dpar_dm(time) * dm;
        dpar
    }

    fn with_field(&self, new_field: &Vector3<f64>, time: f64) -> Result<Self, KinFitError> {
        let frame = self.frame.rotated(new_field)?;
        let mut helix = self.clone();
        helix.params.values += self.dpar_db(time, new_field);
        helix.mbar *= self.frame.bmag() / frame.bmag();
        helix.frame = frame;
        Ok(helix)
    }

    fn invert_ct(&mut self) {
        self.mbar = -self.mbar;
        self.charge = -self.charge;
        self.params.values[Self::T0] = -self.params.values[Self::T0];
        self.range = TimeRange::new(-self.range.end, -self.range.begin);
    }
}

impl fmt::Display for LoopHelix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_parameters(f, "LoopHelix", &DESCRIPTORS, &self.params)?;
        let b = self.frame.bnom();
        write!(
            f,
            "  mass = {:.3} MeV, charge = {}, bnom = ({:.4}, {:.4}, {:.4}) T, range = {}",
            self.mass, self.charge, b.x, b.y, b.z, self.range
        )
    }
}
