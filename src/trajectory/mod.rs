//! # Kinematic trajectories
//!
//! This module defines how the motion of a charged particle is represented during a fit.
//!
//! A trajectory segment is described by **six parameters** valid under a locally constant
//! *nominal* magnetic field. Three equivalent parametrizations are provided:
//!
//! | Type | Parameters | Use |
//! |------|------------|-----|
//! | [`LoopHelix`] | `rad, lam, cx, cy, phi0, t0` | field-aligned helix, robust for looping tracks |
//! | [`CentralHelix`] | `d0, phi0, omega, z0, tan_dip, t0` | impact-parameter helix, natural for tracks from the origin |
//! | [`KinematicLine`] | `d0, phi0, z0, cost, t0, mom` | straight line, for field-free regions |
//!
//! All of them implement the [`KinematicTrajectory`] capability interface: evaluation of
//! position, momentum and direction at any time, and the complete first-derivative algebra
//! between the parameters and the phase-space state (position, momentum). The forward
//! (`dx_dpar`, `dm_dpar`) and inverse (`dpar_dx`, `dpar_dm`) Jacobians are derived analytically
//! for each family and are exact inverses of each other.
//!
//! [`ParticleTrajectory`] is the closed sum type over the three parametrizations, used when the
//! choice is made at run time. [`PieceTrajectory`] chains segments in time, and
//! [`SensorLine`] describes constant-velocity reference lines (wires, light guides).
//!
//! ## Frames
//! ------------
//! Helix parameters are defined in a *local* frame whose z axis is the nominal field direction.
//! The [`LocalFrame`] holds the global → local rotation; it is checked at construction to map the
//! nominal field onto +z to [`FRAME_TOLERANCE`].
//!
//! ## See also
//! ------------
//! * [`crate::closest_approach`] – geometric solve between a trajectory and a sensor line.
//! * [`crate::fit::KalmanChain`] – the fit producing piecewise trajectories.

pub mod central_helix;
pub mod kinematic_line;
pub mod loop_helix;
pub mod piece_trajectory;
pub mod sensor_line;

use std::fmt;

use nalgebra::{Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ParamVector, DPDS, DPDV, DSDP, DVDP, FRAME_TOLERANCE, NPARAMS, ROUND_TRIP_TOLERANCE,
};
use crate::kinfit_errors::KinFitError;
use crate::parameters::Parameters;
use crate::particle_state::{ParticleState, ParticleStateMeasurement};
use crate::time_range::TimeRange;

pub use central_helix::CentralHelix;
pub use kinematic_line::KinematicLine;
pub use loop_helix::LoopHelix;
pub use piece_trajectory::PieceTrajectory;
pub use sensor_line::SensorLine;

/// Orthonormal directions attached to the particle momentum.
///
/// * `PerpDir`: perpendicular to the momentum, in the plane of momentum and local z.
/// * `PhiDir`: azimuthal, perpendicular to both the momentum and local z.
/// * `MomDir`: along the momentum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MomentumBasis {
    PerpDir,
    PhiDir,
    MomDir,
}

impl MomentumBasis {
    pub const ALL: [MomentumBasis; 3] = [
        MomentumBasis::PerpDir,
        MomentumBasis::PhiDir,
        MomentumBasis::MomDir,
    ];

    pub fn index(self) -> usize {
        match self {
            MomentumBasis::PerpDir => 0,
            MomentumBasis::PhiDir => 1,
            MomentumBasis::MomDir => 2,
        }
    }
}

impl fmt::Display for MomentumBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MomentumBasis::PerpDir => "perpendicular",
            MomentumBasis::PhiDir => "azimuthal",
            MomentumBasis::MomDir => "momentum",
        };
        write!(f, "{name}")
    }
}

/// Static description of one trajectory parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    pub unit: &'static str,
    pub title: &'static str,
}

/// Basis vectors for a momentum expressed in a frame whose z axis is the field direction.
///
/// Returned in [`MomentumBasis::ALL`] order.
pub(crate) fn momentum_basis(momentum: &Vector3<f64>) -> [Vector3<f64>; 3] {
    let p = momentum.norm();
    let pt = momentum.x.hypot(momentum.y);
    let (cphi, sphi) = if pt > 0.0 {
        (momentum.x / pt, momentum.y / pt)
    } else {
        (1.0, 0.0)
    };
    let (cdip, sdip) = (pt / p, momentum.z / p);
    [
        Vector3::new(-sdip * cphi, -sdip * sphi, cdip),
        Vector3::new(-sphi, cphi, 0.0),
        momentum / p,
    ]
}

/// Wrap an angle into `(-π, π]`.
pub(crate) fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped == -std::f64::consts::PI {
        std::f64::consts::PI
    } else {
        wrapped
    }
}

/// Rotation taking unit direction `from` onto unit direction `to` about their common normal.
fn minimal_rotation(from: &Vector3<f64>, to: &Vector3<f64>) -> Rotation3<f64> {
    let cross = from.cross(to);
    let sin = cross.norm();
    let cos = from.dot(to);
    if sin > 0.0 {
        Rotation3::from_axis_angle(&Unit::new_normalize(cross), sin.atan2(cos))
    } else if cos > 0.0 {
        Rotation3::identity()
    } else {
        // antiparallel: any axis perpendicular to `from` works
        let helper = if from.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let axis = Unit::new_normalize(from.cross(&helper));
        Rotation3::from_axis_angle(&axis, std::f64::consts::PI)
    }
}

/// Nominal field and the global → local rotation aligning it with +z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    bnom: Vector3<f64>,
    g2l: Rotation3<f64>,
}

impl LocalFrame {
    pub fn new(bnom: Vector3<f64>) -> Result<Self, KinFitError> {
        let bmag = bnom.norm();
        if !bmag.is_finite() || bmag <= 0.0 {
            return Err(KinFitError::InvalidFieldVector(bnom.x, bnom.y, bnom.z));
        }
        let g2l = minimal_rotation(&(bnom / bmag), &Vector3::z());
        LocalFrame { bnom, g2l }.checked()
    }

    /// Frame for a new nominal field, obtained by the smallest additional rotation.
    ///
    /// Successive re-expressions never twist the frame about the field axis, so the first-order
    /// parameter change of [`KinematicTrajectory::dpar_db`] matches the rotation used here.
    pub fn rotated(&self, new_bnom: &Vector3<f64>) -> Result<Self, KinFitError> {
        let bmag = new_bnom.norm();
        if !bmag.is_finite() || bmag <= 0.0 {
            return Err(KinFitError::InvalidFieldVector(
                new_bnom.x, new_bnom.y, new_bnom.z,
            ));
        }
        let local = self.g2l * (new_bnom / bmag);
        let g2l = minimal_rotation(&local, &Vector3::z()) * self.g2l;
        LocalFrame {
            bnom: *new_bnom,
            g2l,
        }
        .checked()
    }

    fn checked(self) -> Result<Self, KinFitError> {
        let deviation = (self.g2l * self.bnom.normalize() - Vector3::z()).norm();
        if deviation > FRAME_TOLERANCE {
            return Err(KinFitError::FrameMisaligned(deviation));
        }
        Ok(self)
    }

    pub fn bnom(&self) -> Vector3<f64> {
        self.bnom
    }

    pub fn bmag(&self) -> f64 {
        self.bnom.norm()
    }

    pub fn to_local(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.g2l * v
    }

    pub fn to_global(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.g2l.inverse_transform_vector(v)
    }

    /// Express a local-frame parameter/position Jacobian in global coordinates.
    pub fn dpar_dv_global(&self, local: &DPDV) -> DPDV {
        local * self.g2l.matrix()
    }

    /// Express a local-frame position/parameter Jacobian in global coordinates.
    pub fn dv_dpar_global(&self, local: &DVDP) -> DVDP {
        self.g2l.matrix().transpose() * local
    }
}

/// Check that a freshly built trajectory reproduces its construction state.
pub(crate) fn check_round_trip<T: KinematicTrajectory>(
    traj: &T,
    state: &ParticleState,
) -> Result<(), KinFitError> {
    let position_error = (traj.position(state.time) - state.position).norm();
    let momentum_error = (traj.momentum(state.time) - state.momentum).norm();
    if !(position_error <= ROUND_TRIP_TOLERANCE && momentum_error <= ROUND_TRIP_TOLERANCE) {
        return Err(KinFitError::GeometryInconsistency {
            position_error,
            momentum_error,
        });
    }
    Ok(())
}

/// Geometric view of anything moving in time: particles, wires, light guides.
pub trait Trajectory {
    fn position(&self, time: f64) -> Vector3<f64>;

    fn velocity(&self, time: f64) -> Vector3<f64>;

    fn speed(&self, time: f64) -> f64 {
        self.velocity(time).norm()
    }

    /// Unit direction of one of the three momentum-attached basis vectors.
    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64>;

    fn range(&self) -> TimeRange;
}

/// Capability interface shared by all particle trajectory parametrizations.
///
/// Jacobians are expressed in global coordinates. The phase-space state is ordered
/// `[x, y, z, px, py, pz]`, so `dpar_dstate` is `[dpar_dx | dpar_dm]` and `dstate_dpar`
/// stacks `dx_dpar` over `dm_dpar`.
pub trait KinematicTrajectory: Trajectory + Clone + fmt::Debug {
    fn params(&self) -> &Parameters;

    fn params_mut(&mut self) -> &mut Parameters;

    fn mass(&self) -> f64;

    fn charge(&self) -> i32;

    /// Nominal field (global) used by this parametrization.
    fn bnom(&self) -> Vector3<f64>;

    fn set_range(&mut self, range: TimeRange);

    fn descriptors(&self) -> &'static [ParameterDescriptor; NPARAMS];

    fn momentum(&self, time: f64) -> Vector3<f64>;

    fn momentum_mag(&self, time: f64) -> f64 {
        self.momentum(time).norm()
    }

    fn energy(&self, time: f64) -> f64 {
        let mass = self.mass();
        (self.momentum(time).norm_squared() + mass * mass).sqrt()
    }

    fn state(&self, time: f64) -> ParticleState {
        ParticleState::new(
            self.position(time),
            time,
            self.momentum(time),
            self.mass(),
            self.charge(),
        )
    }

    /// Phase-space state with the parameter covariance propagated to it.
    fn measurement_state(&self, time: f64) -> ParticleStateMeasurement {
        let jac = self.dstate_dpar(time);
        let covariance = jac * self.params().covariance * jac.transpose();
        ParticleStateMeasurement::new(self.state(time), covariance)
    }

    fn dx_dpar(&self, time: f64) -> DVDP;

    fn dm_dpar(&self, time: f64) -> DVDP;

    fn dpar_dx(&self, time: f64) -> DPDV;

    fn dpar_dm(&self, time: f64) -> DPDV;

    fn dstate_dpar(&self, time: f64) -> DSDP {
        let mut jac = DSDP::zeros();
        jac.fixed_view_mut::<3, NPARAMS>(0, 0)
            .copy_from(&self.dx_dpar(time));
        jac.fixed_view_mut::<3, NPARAMS>(3, 0)
            .copy_from(&self.dm_dpar(time));
        jac
    }

    fn dpar_dstate(&self, time: f64) -> DPDS {
        let mut jac = DPDS::zeros();
        jac.fixed_view_mut::<NPARAMS, 3>(0, 0)
            .copy_from(&self.dpar_dx(time));
        jac.fixed_view_mut::<NPARAMS, 3>(0, 3)
            .copy_from(&self.dpar_dm(time));
        jac
    }

    /// Parameter change per unit fractional momentum change along a basis direction.
    fn mom_deriv(&self, time: f64, basis: MomentumBasis) -> ParamVector {
        self.dpar_dm(time) * self.direction(time, basis) * self.momentum_mag(time)
    }

    /// First-order parameter change when the nominal field becomes `new_field`, keeping the
    /// physical state at `time` unchanged.
    fn dpar_db(&self, time: f64, new_field: &Vector3<f64>) -> ParamVector;

    /// Re-express this trajectory under a new nominal field, to first order at `time`.
    fn with_field(&self, new_field: &Vector3<f64>, time: f64) -> Result<Self, KinFitError>;

    /// Charge-conjugate, time-reversed description of the same geometric path.
    fn invert_ct(&mut self);

    fn with_params(&self, params: Parameters) -> Self {
        let mut traj = self.clone();
        *traj.params_mut() = params;
        traj
    }

    fn param_value(&self, index: usize) -> f64 {
        self.params().values[index]
    }
}

/// Run-time selected trajectory parametrization.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticleTrajectory {
    LoopHelix(LoopHelix),
    CentralHelix(CentralHelix),
    KinematicLine(KinematicLine),
}

macro_rules! dispatch {
    ($self:expr, $traj:ident => $body:expr) => {
        match $self {
            ParticleTrajectory::LoopHelix($traj) => $body,
            ParticleTrajectory::CentralHelix($traj) => $body,
            ParticleTrajectory::KinematicLine($traj) => $body,
        }
    };
}

impl ParticleTrajectory {
    pub fn as_loop_helix(&self) -> Option<&LoopHelix> {
        match self {
            ParticleTrajectory::LoopHelix(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_central_helix(&self) -> Option<&CentralHelix> {
        match self {
            ParticleTrajectory::CentralHelix(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_kinematic_line(&self) -> Option<&KinematicLine> {
        match self {
            ParticleTrajectory::KinematicLine(l) => Some(l),
            _ => None,
        }
    }
}

impl From<LoopHelix> for ParticleTrajectory {
    fn from(value: LoopHelix) -> Self {
        ParticleTrajectory::LoopHelix(value)
    }
}

impl From<CentralHelix> for ParticleTrajectory {
    fn from(value: CentralHelix) -> Self {
        ParticleTrajectory::CentralHelix(value)
    }
}

impl From<KinematicLine> for ParticleTrajectory {
    fn from(value: KinematicLine) -> Self {
        ParticleTrajectory::KinematicLine(value)
    }
}

impl Trajectory for ParticleTrajectory {
    fn position(&self, time: f64) -> Vector3<f64> {
        dispatch!(self, t => t.position(time))
    }

    fn velocity(&self, time: f64) -> Vector3<f64> {
        dispatch!(self, t => t.velocity(time))
    }

    fn speed(&self, time: f64) -> f64 {
        dispatch!(self, t => t.speed(time))
    }

    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64> {
        dispatch!(self, t => t.direction(time, basis))
    }

    fn range(&self) -> TimeRange {
        dispatch!(self, t => t.range())
    }
}

impl KinematicTrajectory for ParticleTrajectory {
    fn params(&self) -> &Parameters {
        dispatch!(self, t => t.params())
    }

    fn params_mut(&mut self) -> &mut Parameters {
        dispatch!(self, t => t.params_mut())
    }

    fn mass(&self) -> f64 {
        dispatch!(self, t => t.mass())
    }

    fn charge(&self) -> i32 {
        dispatch!(self, t => t.charge())
    }

    fn bnom(&self) -> Vector3<f64> {
        dispatch!(self, t => t.bnom())
    }

    fn set_range(&mut self, range: TimeRange) {
        dispatch!(self, t => t.set_range(range))
    }

    fn descriptors(&self) -> &'static [ParameterDescriptor; NPARAMS] {
        dispatch!(self, t => t.descriptors())
    }

    fn momentum(&self, time: f64) -> Vector3<f64> {
        dispatch!(self, t => t.momentum(time))
    }

    fn dx_dpar(&self, time: f64) -> DVDP {
        dispatch!(self, t => t.dx_dpar(time))
    }

    fn dm_dpar(&self, time: f64) -> DVDP {
        dispatch!(self, t => t.dm_dpar(time))
    }

    fn dpar_dx(&self, time: f64) -> DPDV {
        dispatch!(self, t => t.dpar_dx(time))
    }

    fn dpar_dm(&self, time: f64) -> DPDV {
        dispatch!(self, t => t.dpar_dm(time))
    }

    fn dpar_db(&self, time: f64, new_field: &Vector3<f64>) -> ParamVector {
        dispatch!(self, t => t.dpar_db(time, new_field))
    }

    fn with_field(&self, new_field: &Vector3<f64>, time: f64) -> Result<Self, KinFitError> {
        Ok(match self {
            ParticleTrajectory::LoopHelix(t) => t.with_field(new_field, time)?.into(),
            ParticleTrajectory::CentralHelix(t) => t.with_field(new_field, time)?.into(),
            ParticleTrajectory::KinematicLine(t) => t.with_field(new_field, time)?.into(),
        })
    }

    fn invert_ct(&mut self) {
        dispatch!(self, t => t.invert_ct())
    }
}

impl fmt::Display for ParticleTrajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, t => write!(f, "{t}"))
    }
}

/// Write parameters with their descriptor names, shared by the parametrizations' `Display`.
pub(crate) fn write_parameters(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    descriptors: &[ParameterDescriptor; NPARAMS],
    params: &Parameters,
) -> fmt::Result {
    writeln!(f, "[{kind} representation]")?;
    for (i, d) in descriptors.iter().enumerate() {
        writeln!(
            f,
            "  {:<8} = {:>14.6} ± {:<10.3e} {:<8} # {}",
            d.name,
            params.values[i],
            params.sigma(i),
            d.unit,
            d.title
        )?;
    }
    Ok(())
}
