//! # Straight-line kinematic trajectory
//!
//! [`KinematicLine`] describes a particle moving without curvature. Parameters are expressed in
//! global coordinates: the transverse impact parameter `d0` and z position `z0` at the point of
//! closest transverse approach to the z axis, the azimuth `phi0` and polar cosine `cost` of the
//! direction, the time `t0` at that point and the momentum magnitude `mom`.
//!
//! The nominal field is carried only for bookkeeping; the parametrization does not depend on it.

use std::fmt;

use nalgebra::Vector3;

use crate::constants::{ParamMatrix, ParamVector, C_LIGHT, DPDV, DVDP, NPARAMS};
use crate::kinfit_errors::KinFitError;
use crate::parameters::Parameters;
use crate::particle_state::{ParticleState, ParticleStateMeasurement};
use crate::time_range::TimeRange;
use crate::trajectory::{
    check_round_trip, momentum_basis, wrap_angle, write_parameters, KinematicTrajectory,
    MomentumBasis, ParameterDescriptor, Trajectory,
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
        title: "Azimuth of the direction",
    },
    ParameterDescriptor {
        name: "z0",
        unit: "mm",
        title: "z at closest approach",
    },
    ParameterDescriptor {
        name: "cost",
        unit: "",
        title: "Cosine of the polar angle",
    },
    ParameterDescriptor {
        name: "t0",
        unit: "ns",
        title: "Time at closest approach",
    },
    ParameterDescriptor {
        name: "mom",
        unit: "MeV/c",
        title: "Momentum magnitude",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct KinematicLine {
    params: Parameters,
    mass: f64,
    charge: i32,
    bnom: Vector3<f64>,
    range: TimeRange,
}

impl KinematicLine {
    pub const D0: usize = 0;
    pub const PHI0: usize = 1;
    pub const Z0: usize = 2;
    pub const COST: usize = 3;
    pub const T0: usize = 4;
    pub const MOM: usize = 5;

    /// Build the line through `state`. Neutral particles are accepted.
    pub fn from_state(
        state: &ParticleState,
        bnom: Vector3<f64>,
        range: TimeRange,
        covariance: ParamMatrix,
    ) -> Result<Self, KinFitError> {
        if state.mass.is_nan() || state.mass < 0.0 {
            return Err(KinFitError::DegenerateState("mass must not be negative"));
        }
        let mom = state.momentum_mag();
        let pt = state.momentum.x.hypot(state.momentum.y);
        if mom <= 0.0 || pt <= 0.0 {
            return Err(KinFitError::DegenerateState(
                "line direction must have a transverse component",
            ));
        }
        let (x, y, z) = (state.position.x, state.position.y, state.position.z);
        let (px, py, pz) = (state.momentum.x, state.momentum.y, state.momentum.z);
        let d0 = (y * px - x * py) / pt;
        let xmt = x * px + y * py;
        let z0 = z - xmt * pz / (pt * pt);
        let t0 = state.time - xmt * state.energy() / (C_LIGHT * pt * pt);

        let line = KinematicLine {
            params: Parameters::new(
                ParamVector::new(d0, py.atan2(px), z0, pz / mom, t0, mom),
                covariance,
            ),
            mass: state.mass,
            charge: state.charge,
            bnom,
            range,
        };
        check_round_trip(&line, state)?;
        Ok(line)
    }

    pub fn from_measurement(
        measurement: &ParticleStateMeasurement,
        bnom: Vector3<f64>,
        range: TimeRange,
    ) -> Result<Self, KinFitError> {
        let mut line = Self::from_state(&measurement.state, bnom, range, ParamMatrix::zeros())?;
        let jac = line.dpar_dstate(measurement.state.time);
        line.params.covariance = jac * measurement.covariance * jac.transpose();
        Ok(line)
    }

    pub fn d0(&self) -> f64 {
        self.params.values[Self::D0]
    }

    pub fn phi0(&self) -> f64 {
        self.params.values[Self::PHI0]
    }

    pub fn z0(&self) -> f64 {
        self.params.values[Self::Z0]
    }

    pub fn cost(&self) -> f64 {
        self.params.values[Self::COST]
    }

    pub fn t0(&self) -> f64 {
        self.params.values[Self::T0]
    }

    pub fn mom(&self) -> f64 {
        self.params.values[Self::MOM]
    }

    pub fn sin_theta(&self) -> f64 {
        (1.0 - self.cost() * self.cost()).max(0.0).sqrt()
    }

    /// Unit direction of motion.
    pub fn unit_direction(&self) -> Vector3<f64> {
        let (sphi, cphi) = self.phi0().sin_cos();
        let sint = self.sin_theta();
        Vector3::new(sint * cphi, sint * sphi, self.cost())
    }

    fn line_energy(&self) -> f64 {
        (self.mom() * self.mom() + self.mass * self.mass).sqrt()
    }

    fn line_speed(&self) -> f64 {
        C_LIGHT * self.mom() / self.line_energy()
    }

    fn reference_point(&self) -> Vector3<f64> {
        let (sphi, cphi) = self.phi0().sin_cos();
        Vector3::new(-self.d0() * sphi, self.d0() * cphi, self.z0())
    }
}

impl Trajectory for KinematicLine {
    fn position(&self, time: f64) -> Vector3<f64> {
        self.reference_point() + self.unit_direction() * (self.line_speed() * (time - self.t0()))
    }

    fn velocity(&self, _time: f64) -> Vector3<f64> {
        self.unit_direction() * self.line_speed()
    }

    fn speed(&self, _time: f64) -> f64 {
        self.line_speed()
    }

    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64> {
        momentum_basis(&self.momentum(time))[basis.index()]
    }

    fn range(&self) -> TimeRange {
        self.range
    }
}

impl KinematicTrajectory for KinematicLine {
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
        self.bnom
    }

    fn set_range(&mut self, range: TimeRange) {
        self.range = range;
    }

    fn descriptors(&self) -> &'static [ParameterDescriptor; NPARAMS] {
        &DESCRIPTORS
    }

    fn momentum(&self, _time: f64) -> Vector3<f64> {
        self.unit_direction() * self.mom()
    }

    fn momentum_mag(&self, _time: f64) -> f64 {
        self.mom()
    }

    fn energy(&self, _time: f64) -> f64 {
        self.line_energy()
    }

    fn dx_dpar(&self, time: f64) -> DVDP {
        let (sphi, cphi) = self.phi0().sin_cos();
        let sint = self.sin_theta();
        let cott = self.cost() / sint;
        let u = self.unit_direction();
        let speed = self.line_speed();
        let dt = time - self.t0();
        let flight = speed * dt;

        let mut jac = DVDP::zeros();
        jac.set_column(Self::D0, &Vector3::new(-sphi, cphi, 0.0));
        jac.set_column(
            Self::PHI0,
            &(Vector3::new(-cphi, -sphi, 0.0) * self.d0()
                + Vector3::new(-sphi, cphi, 0.0) * (flight * sint)),
        );
        jac.set_column(Self::Z0, &Vector3::z());
        jac.set_column(
            Self::COST,
            &(Vector3::new(-cott * cphi, -cott * sphi, 1.0) * flight),
        );
        jac.set_column(Self::T0, &(-u * speed));
        // dv/dp = v / (p γ²)
        let dspeed = speed * (self.mass / self.line_energy()).powi(2) / self.mom();
        jac.set_column(Self::MOM, &(u * (dt * dspeed)));
        jac
    }

    fn dm_dpar(&self, _time: f64) -> DVDP {
        let (sphi, cphi) = self.phi0().sin_cos();
        let sint = self.sin_theta();
        let cott = self.cost() / sint;
        let mom = self.mom();

        let mut jac = DVDP::zeros();
        jac.set_column(
            Self::PHI0,
            &(Vector3::new(-sphi, cphi, 0.0) * (mom * sint)),
        );
        jac.set_column(Self::COST, &(Vector3::new(-cott * cphi, -cott * sphi, 1.0) * mom));
        jac.set_column(Self::MOM, &self.unit_direction());
        jac
    }

    fn dpar_dx(&self, time: f64) -> DPDV {
        let mom = self.momentum(time);
        let pt2 = mom.x * mom.x + mom.y * mom.y;
        let pt = pt2.sqrt();
        let energy = self.line_energy();

        let mut jac = DPDV::zeros();
        jac.set_row(
            Self::D0,
            &Vector3::new(-mom.y / pt, mom.x / pt, 0.0).transpose(),
        );
        jac.set_row(
            Self::Z0,
            &Vector3::new(-mom.x * mom.z / pt2, -mom.y * mom.z / pt2, 1.0).transpose(),
        );
        jac.set_row(
            Self::T0,
            &(Vector3::new(mom.x, mom.y, 0.0) * (-energy / (C_LIGHT * pt2))).transpose(),
        );
        jac
    }

    fn dpar_dm(&self, time: f64) -> DPDV {
        let pos = self.position(time);
        let mom = self.momentum(time);
        let p = self.mom();
        let pt2 = mom.x * mom.x + mom.y * mom.y;
        let pt = pt2.sqrt();
        let energy = self.line_energy();
        let u = self.unit_direction();
        let d0 = self.d0();
        let xmt = pos.x * mom.x + pos.y * mom.y;

        // z0 = z - xmt pz / pt², t0 = t - xmt E / (c pt²)
        let dz0 = Vector3::new(
            -mom.z * (pos.x - 2.0 * xmt * mom.x / pt2) / pt2,
            -mom.z * (pos.y - 2.0 * xmt * mom.y / pt2) / pt2,
            -xmt / pt2,
        );
        let dt0 = Vector3::new(
            pos.x * energy / pt2 + xmt * mom.x / (energy * pt2)
                - 2.0 * xmt * energy * mom.x / (pt2 * pt2),
            pos.y * energy / pt2 + xmt * mom.y / (energy * pt2)
                - 2.0 * xmt * energy * mom.y / (pt2 * pt2),
            xmt * mom.z / (energy * pt2),
        ) / -C_LIGHT;

        let mut jac = DPDV::zeros();
        jac.set_row(
            Self::D0,
            &Vector3::new(
                pos.y / pt - d0 * mom.x / pt2,
                -pos.x / pt - d0 * mom.y / pt2,
                0.0,
            )
            .transpose(),
        );
        jac.set_row(
            Self::PHI0,
            &Vector3::new(-mom.y / pt2, mom.x / pt2, 0.0).transpose(),
        );
        jac.set_row(Self::Z0, &dz0.transpose());
        jac.set_row(
            Self::COST,
            &((Vector3::z() - u * self.cost()) / p).transpose(),
        );
        jac.set_row(Self::T0, &dt0.transpose());
        jac.set_row(Self::MOM, &u.transpose());
        jac
    }

    /// Straight lines do not depend on the field.
    fn dpar_db(&self, _time: f64, _new_field: &Vector3<f64>) -> ParamVector {
        ParamVector::zeros()
    }

    fn with_field(&self, new_field: &Vector3<f64>, _time: f64) -> Result<Self, KinFitError> {
        let mut line = self.clone();
        line.bnom = *new_field;
        Ok(line)
    }

    fn invert_ct(&mut self) {
        let values = &mut self.params.values;
        values[Self::D0] = -values[Self::D0];
        values[Self::PHI0] = wrap_angle(values[Self::PHI0] + std::f64::consts::PI);
        values[Self::COST] = -values[Self::COST];
        values[Self::T0] = -values[Self::T0];
        self.charge = -self.charge;
        self.range = TimeRange::new(-self.range.end, -self.range.begin);
    }
}

impl fmt::Display for KinematicLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_parameters(f, "KinematicLine", &DESCRIPTORS, &self.params)?;
        write!(
            f,
            "  mass = {:.3} MeV, charge = {}, range = {}",
            self.mass, self.charge, self.range
        )
    }
}
