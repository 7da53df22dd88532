//! # Impact-parameter helix
//!
//! [`CentralHelix`] describes a helix by its signed distance of closest approach to the local
//! z axis `d0`, the momentum azimuth there `phi0`, the signed curvature `omega`, the z position
//! and time at that point `z0`, `t0`, and the dip tangent `tan_dip = pz / pt`.
//!
//! With `l(t) = vt (t - t0)` the transverse flight length and `ang = phi0 + omega · l`:
//!
//! ```text
//! x(t) =  (sin ang - sin phi0) / omega - d0 · sin phi0
//! y(t) = -(cos ang - cos phi0) / omega + d0 · cos phi0
//! z(t) =  z0 + l · tan_dip
//! p(t) =  pt · (cos ang, sin ang, tan_dip),   pt = Q / omega
//! ```
//!
//! where `Q = -CBAR · q · |B|` is the reduced charge; `omega` always carries the sign of `Q`.

use std::fmt;

use nalgebra::Vector3;

use crate::constants::{ParamMatrix, ParamVector, CBAR, C_LIGHT, DPDV, DVDP, NPARAMS};
use crate::kinfit_errors::KinFitError;
use crate::parameters::Parameters;
use crate::particle_state::{ParticleState, ParticleStateMeasurement};
use crate::time_range::TimeRange;
use crate::trajectory::{
    check_round_trip, momentum_basis, wrap_angle, write_parameters, KinematicTrajectory,
    LocalFrame, MomentumBasis, ParameterDescriptor, Trajectory,
};

static DESCRIPTORS: [ParameterDescriptor; NPARAMS] = [
    ParameterDescriptor {
        name: "d0",
        unit: "mm",
        title: "Transverse impact parameter",
    },
    ParameterDescriptor {
        name: "phi0",
        unit: "rad",
        title: "Azimuth at closest approach",
    },
    ParameterDescriptor {
        name: "omega",
        unit: "1/mm",
        title: "Signed curvature",
    },
    ParameterDescriptor {
        name: "z0",
        unit: "mm",
        title: "z at closest approach",
    },
    ParameterDescriptor {
        name: "tanDip",
        unit: "",
        title: "Dip angle tangent",
    },
    ParameterDescriptor {
        name: "t0",
        unit: "ns",
        title: "Time at closest approach",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct CentralHelix {
    params: Parameters,
    mass: f64,
    charge: i32,
    mbar: f64,
    frame: LocalFrame,
    range: TimeRange,
}

/// Scalars shared by the derivative computations at one time.
struct HelixPoint {
    pt: f64,
    energy: f64,
    vt: f64,
    l: f64,
    ang: f64,
}

impl CentralHelix {
    pub const D0: usize = 0;
    pub const PHI0: usize = 1;
    pub const OMEGA: usize = 2;
    pub const Z0: usize = 3;
    pub const TANDIP: usize = 4;
    pub const T0: usize = 5;

    /// Build the helix passing through `state` under the nominal field `bnom`.
    ///
    /// The reference point is the closest approach to the local z axis reached within half a
    /// turn of the construction point.
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

        let mom_to_rad = 1.0 / (CBAR * f64::from(state.charge) * frame.bmag());
        let mbar = -state.mass * mom_to_rad;
        let q = state.mass / mbar;
        let omega = q / pt;
        let tan_dip = mom.z / pt;
        let ang = mom.y.atan2(mom.x);
        let cx = pos.x - mom.y / q;
        let cy = pos.y + mom.x / q;
        let sign = omega.signum();
        let phi0 = (-sign * cx).atan2(sign * cy);
        let d0 = sign * cx.hypot(cy) - 1.0 / omega;
        let l = wrap_angle(ang - phi0) / omega;
        let z0 = pos.z - l * tan_dip;
        let energy = (mom.norm_squared() + state.mass * state.mass).sqrt();
        let vt = C_LIGHT * pt / energy;
        let t0 = state.time - l / vt;

        let helix = CentralHelix {
            params: Parameters::new(
                ParamVector::new(d0, phi0, omega, z0, tan_dip, t0),
                covariance,
            ),
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

    pub fn d0(&self) -> f64 {
        self.params.values[Self::D0]
    }

    pub fn phi0(&self) -> f64 {
        self.params.values[Self::PHI0]
    }

    pub fn omega(&self) -> f64 {
        self.params.values[Self::OMEGA]
    }

    pub fn z0(&self) -> f64 {
        self.params.values[Self::Z0]
    }

    pub fn tan_dip(&self) -> f64 {
        self.params.values[Self::TANDIP]
    }

    pub fn t0(&self) -> f64 {
        self.params.values[Self::T0]
    }

    /// Reduced charge: momentum per unit radius (MeV/c per mm).
    pub fn q(&self) -> f64 {
        self.mass / self.mbar
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    /// Signed radius of the circle center from the z axis.
    fn rho(&self) -> f64 {
        1.0 / self.omega() + self.d0()
    }

    fn point(&self, time: f64) -> HelixPoint {
        let pt = self.q() / self.omega();
        let p2 = pt * pt * (1.0 + self.tan_dip().powi(2));
        let energy = (p2 + self.mass * self.mass).sqrt();
        let vt = C_LIGHT * pt / energy;
        let l = vt * (time - self.t0());
        HelixPoint {
            pt,
            energy,
            vt,
            l,
            ang: self.phi0() + self.omega() * l,
        }
    }

    pub fn local_position(&self, time: f64) -> Vector3<f64> {
        let hp = self.point(time);
        let (omega, d0, phi0) = (self.omega(), self.d0(), self.phi0());
        Vector3::new(
            (hp.ang.sin() - phi0.sin()) / omega - d0 * phi0.sin(),
            -(hp.ang.cos() - phi0.cos()) / omega + d0 * phi0.cos(),
            self.z0() + hp.l * self.tan_dip(),
        )
    }

    pub fn local_momentum(&self, time: f64) -> Vector3<f64> {
        let hp = self.point(time);
        Vector3::new(hp.ang.cos(), hp.ang.sin(), self.tan_dip()) * hp.pt
    }

    fn local_velocity(&self, time: f64) -> Vector3<f64> {
        let hp = self.point(time);
        Vector3::new(hp.ang.cos(), hp.ang.sin(), self.tan_dip()) * hp.vt
    }

    /// Derivatives of the transverse flight length with respect to omega and tan_dip.
    fn dl_domega_dtan(&self, time: f64, hp: &HelixPoint) -> (f64, f64) {
        let dt = time - self.t0();
        let m2e2 = (self.mass / hp.energy).powi(2);
        let dvt_domega = -(hp.vt / self.omega()) * m2e2;
        let dvt_dtan = -hp.vt * hp.pt * hp.pt * self.tan_dip() / (hp.energy * hp.energy);
        (dt * dvt_domega, dt * dvt_dtan)
    }

    fn local_dx_dpar(&self, time: f64) -> DVDP {
        let hp = self.point(time);
        let (omega, tan_dip, phi0) = (self.omega(), self.tan_dip(), self.phi0());
        let (sa, ca) = hp.ang.sin_cos();
        let (sp0, cp0) = phi0.sin_cos();
        let rho = self.rho();
        let (dl_domega, dl_dtan) = self.dl_domega_dtan(time, &hp);
        let dang_domega = hp.l + omega * dl_domega;

        let mut jac = DVDP::zeros();
        jac.set_column(Self::D0, &Vector3::new(-sp0, cp0, 0.0));
        jac.set_column(
            Self::PHI0,
            &Vector3::new(ca / omega - rho * cp0, sa / omega - rho * sp0, 0.0),
        );
        jac.set_column(
            Self::OMEGA,
            &Vector3::new(
                -(sa - sp0) / (omega * omega) + ca / omega * dang_domega,
                (ca - cp0) / (omega * omega) + sa / omega * dang_domega,
                tan_dip * dl_domega,
            ),
        );
        jac.set_column(Self::Z0, &Vector3::z());
        jac.set_column(
            Self::TANDIP,
            &Vector3::new(ca * dl_dtan, sa * dl_dtan, hp.l + tan_dip * dl_dtan),
        );
        jac.set_column(Self::T0, &(Vector3::new(ca, sa, tan_dip) * -hp.vt));
        jac
    }

    fn local_dm_dpar(&self, time: f64) -> DVDP {
        let hp = self.point(time);
        let (omega, tan_dip) = (self.omega(), self.tan_dip());
        let (sa, ca) = hp.ang.sin_cos();
        let (dl_domega, dl_dtan) = self.dl_domega_dtan(time, &hp);
        let dang_domega = hp.l + omega * dl_domega;
        let dang_dtan = omega * dl_dtan;
        let pt = hp.pt;

        let mut jac = DVDP::zeros();
        jac.set_column(Self::PHI0, &(Vector3::new(-sa, ca, 0.0) * pt));
        jac.set_column(
            Self::OMEGA,
            &Vector3::new(
                -pt / omega * ca - pt * sa * dang_domega,
                -pt / omega * sa + pt * ca * dang_domega,
                -pt * tan_dip / omega,
            ),
        );
        jac.set_column(
            Self::TANDIP,
            &Vector3::new(-pt * sa * dang_dtan, pt * ca * dang_dtan, pt),
        );
        jac.set_column(
            Self::T0,
            &(Vector3::new(sa, -ca, 0.0) * (pt * omega * hp.vt)),
        );
        jac
    }

    fn local_dpar_dstate(&self, time: f64) -> (DPDV, DPDV) {
        let hp = self.point(time);
        let (omega, tan_dip, phi0) = (self.omega(), self.tan_dip(), self.phi0());
        let q = self.q();
        let (sa, ca) = hp.ang.sin_cos();
        let (sp0, cp0) = phi0.sin_cos();
        let rho = self.rho();
        let pt = hp.pt;
        let delta = omega * hp.l;
        let mom = self.local_momentum(time);

        let dphi0_dx = Vector3::new(-cp0 / rho, -sp0 / rho, 0.0);
        let dphi0_dm = Vector3::new(-sp0 / (q * rho), cp0 / (q * rho), 0.0);
        let dang_dm = Vector3::new(-sa / pt, ca / pt, 0.0);
        let dturn_dm = dang_dm - dphi0_dm;
        // t0 = t - delta E / (c Q), z0 = z - delta tan_dip / omega
        let time_scale = hp.energy / (C_LIGHT * q);
        let z_scale = tan_dip / omega;

        let mut dpdx = DPDV::zeros();
        dpdx.set_row(Self::D0, &Vector3::new(-sp0, cp0, 0.0).transpose());
        dpdx.set_row(Self::PHI0, &dphi0_dx.transpose());
        dpdx.set_row(
            Self::Z0,
            &(dphi0_dx * z_scale + Vector3::z()).transpose(),
        );
        dpdx.set_row(Self::T0, &(dphi0_dx * time_scale).transpose());

        let mut dpdm = DPDV::zeros();
        dpdm.set_row(
            Self::D0,
            &Vector3::new((cp0 - ca) / q, (sp0 - sa) / q, 0.0).transpose(),
        );
        dpdm.set_row(Self::PHI0, &dphi0_dm.transpose());
        dpdm.set_row(
            Self::OMEGA,
            &Vector3::new(-omega * ca / pt, -omega * sa / pt, 0.0).transpose(),
        );
        dpdm.set_row(
            Self::Z0,
            &(-dturn_dm * z_scale - Vector3::new(0.0, 0.0, delta / q)).transpose(),
        );
        dpdm.set_row(
            Self::TANDIP,
            &Vector3::new(-tan_dip * ca / pt, -tan_dip * sa / pt, 1.0 / pt).transpose(),
        );
        dpdm.set_row(
            Self::T0,
            &(-dturn_dm * time_scale - mom * (delta / (C_LIGHT * q * hp.energy))).transpose(),
        );
        (dpdx, dpdm)
    }

    /// Parameter change per Tesla of field magnitude change along the local z axis.
    fn dpar_dbmag(&self, time: f64) -> ParamVector {
        let hp = self.point(time);
        let omega = self.omega();
        let delta = omega * hp.l;
        let dphi0 = (self.phi0() - hp.ang).sin() / (omega * self.rho());
        let turn = dphi0 + delta;
        ParamVector::new(
            (1.0 - delta.cos()) / omega,
            dphi0,
            omega,
            turn * self.tan_dip() / omega,
            0.0,
            turn * hp.energy / (C_LIGHT * self.q()),
        ) / self.frame.bmag()
    }
}

impl Trajectory for CentralHelix {
    fn position(&self, time: f64) -> Vector3<f64> {
        self.frame.to_global(&self.local_position(time))
    }

    fn velocity(&self, time: f64) -> Vector3<f64> {
        self.frame.to_global(&self.local_velocity(time))
    }

    fn speed(&self, time: f64) -> f64 {
        self.point(time).vt * (1.0 + self.tan_dip().powi(2)).sqrt()
    }

    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64> {
        let local = momentum_basis(&self.local_momentum(time))[basis.index()];
        self.frame.to_global(&local)
    }

    fn range(&self) -> TimeRange {
        self.range
    }
}

impl KinematicTrajectory for CentralHelix {
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

    fn dx_dpar(&self, time: f64) -> DVDP {
        self.frame.dv_dpar_global(&self.local_dx_dpar(time))
    }

    fn dm_dpar(&self, time: f64) -> DVDP {
        self.frame.dv_dpar_global(&self.local_dm_dpar(time))
    }

    fn dpar_dx(&self, time: f64) -> DPDV {
        self.frame.dpar_dv_global(&self.local_dpar_dstate(time).0)
    }

    fn dpar_dm(&self, time: f64) -> DPDV {
        self.frame.dpar_dv_global(&self.local_dpar_dstate(time).1)
    }

    fn dpar_db(&self, time: f64, new_field: &Vector3<f64>) -> ParamVector {
        let db = self.frame.to_local(&(new_field - self.frame.bnom()));
        let mut dpar = self.dpar_dbmag(time) * db.z;
        let axis = Vector3::z().cross(&db) / self.frame.bmag();
        let dx = self.local_position(time).cross(&axis);
        let dm = self.local_momentum(time).cross(&axis);
        let (dpdx, dpdm) = self.local_dpar_dstate(time);
        dpar += dpdx * dx + dpdm * dm;
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
        let values = &mut self.params.values;
        values[Self::D0] = -values[Self::D0];
        values[Self::PHI0] = wrap_angle(values[Self::PHI0] + std::f64::consts::PI);
        values[Self::OMEGA] = -values[Self::OMEGA];
        values[Self::TANDIP] = -values[Self::TANDIP];
        values[Self::T0] = -values[Self::T0];
        self.mbar = -self.mbar;
        self.charge = -self.charge;
        self.range = TimeRange::new(-self.range.end, -self.range.begin);
    }
}

impl fmt::Display for CentralHelix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_parameters(f, "CentralHelix", &DESCRIPTORS, &self.params)?;
        let b = self.frame.bnom();
        write!(
            f,
            "  mass = {:.3} MeV, charge = {}, bnom = ({:.4}, {:.4}, {:.4}) T, range = {}",
            self.mass, self.charge, b.x, b.y, b.z, self.range
        )
    }
}

#[cfg(test)]
mod central_helix_test {
    use super::*;
    use crate::constants::{ELECTRON_MASS, MUON_MASS, PROTON_MASS};
    use crate::trajectory::trajectory_test::*;
    use crate::trajectory::LoopHelix;
    use approx::assert_relative_eq;

    fn helix(charge: i32, bnom: Vector3<f64>) -> CentralHelix {
        CentralHelix::from_state(
            &reference_state(charge),
            bnom,
            TimeRange::default(),
            unit_covariance(),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_round_trip() {
        for mass in [ELECTRON_MASS, MUON_MASS, PROTON_MASS] {
            for charge in [-1, 1] {
                let mut state = reference_state(charge);
                state.mass = mass;
                let h = CentralHelix::from_state(
                    &state,
                    Vector3::new(0.0, 0.0, 1.0),
                    TimeRange::default(),
                    unit_covariance(),
                )
                .unwrap();
                assert_relative_eq!(h.position(state.time), state.position, epsilon = 1e-9);
                assert_relative_eq!(h.momentum(state.time), state.momentum, epsilon = 1e-9);
                assert_relative_eq!(h.speed(0.0), state.speed(), epsilon = 1e-9);
                assert_eq!(h.omega().signum(), h.q().signum());
            }
        }
    }

    #[test]
    fn test_reference_point_is_closest_to_axis() {
        let h = helix(-1, Vector3::new(0.0, 0.0, 1.0));
        let p0 = h.local_position(h.t0());
        assert_relative_eq!(p0.x.hypot(p0.y), h.d0().abs(), epsilon = 1e-9);
        assert_relative_eq!(p0.z, h.z0(), epsilon = 1e-9);
        // transverse direction at t0 is perpendicular to the transverse position
        let m0 = h.local_momentum(h.t0());
        assert_relative_eq!(p0.x * m0.x + p0.y * m0.y, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_agrees_with_loop_helix() {
        let state = reference_state(1);
        let bnom = Vector3::new(0.0, 0.1, 1.0);
        let central = helix(1, bnom);
        let looping =
            LoopHelix::from_state(&state, bnom, TimeRange::default(), unit_covariance())
                .unwrap();
        for t in [-6.0, 0.0, 3.5, 11.0] {
            assert_relative_eq!(central.position(t), looping.position(t), epsilon = 1e-8);
            assert_relative_eq!(central.momentum(t), looping.momentum(t), epsilon = 1e-8);
        }
    }

    #[test]
    fn test_jacobian_identities() {
        for charge in [-1, 1] {
            let h = helix(charge, Vector3::new(0.0, 0.0, 1.0));
            check_jacobian_identities(&h, &[-10.0, 0.0, 2.0, 5.0, 25.0]);
            let tilted = helix(charge, Vector3::new(-0.1, 0.2, 1.0));
            check_jacobian_identities(&tilted, &[-4.0, 5.0]);
        }
    }

    #[test]
    fn test_forward_derivatives_match_finite_differences() {
        let h = helix(1, Vector3::new(0.0, 0.0, 1.0));
        for t in [0.0, 4.0, 9.0] {
            check_forward_derivatives(&h, t);
        }
    }

    #[test]
    fn test_field_change_derivative() {
        let h = helix(1, Vector3::new(0.0, 0.0, 1.0));
        check_field_derivative(&h, 5.0, Vector3::new(0.0, 0.0, 1e-4));
        check_field_derivative(&h, 5.0, Vector3::new(-1e-4, 1e-4, 0.0));
        check_field_derivative(&h, 0.0, Vector3::new(1e-4, 1e-4, -1e-4));
    }

    #[test]
    fn test_invert_ct() {
        let h = helix(1, Vector3::new(0.0, 0.0, 1.0));
        check_invert_ct(&h, &[-4.0, 0.0, 6.0]);
        let mut inverted = h.clone();
        inverted.invert_ct();
        check_jacobian_identities(&inverted, &[-6.0, 1.0]);
    }

    #[test]
    fn test_momentum_basis() {
        let h = helix(-1, Vector3::new(0.0, 0.0, 1.0));
        check_basis(&h, 2.0);
    }

    #[test]
    fn test_parallel_momentum_fails() {
        let mut state = reference_state(-1);
        state.momentum = Vector3::new(0.0, 0.0, 100.0);
        let result = CentralHelix::from_state(
            &state,
            Vector3::new(0.0, 0.0, 1.0),
            TimeRange::default(),
            unit_covariance(),
        );
        assert!(matches!(result, Err(KinFitError::DegenerateState(_))));
    }
}
