use thiserror::Error;

use crate::closest_approach::ClosestApproachStatus;
use crate::time_range::TimeRange;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KinFitError {
    #[error("Nominal field vector is not usable: ({0:.3e}, {1:.3e}, {2:.3e}) T")]
    InvalidFieldVector(f64, f64, f64),

    #[error("Local frame rotation does not align the nominal field with the z axis (deviation {0:.3e})")]
    FrameMisaligned(f64),

    #[error(
        "Trajectory does not reproduce its construction state: position error {position_error:.3e} mm, momentum error {momentum_error:.3e} MeV/c"
    )]
    GeometryInconsistency {
        position_error: f64,
        momentum_error: f64,
    },

    #[error("Particle state is degenerate: {0}")]
    DegenerateState(&'static str),

    #[error("Matrix inversion failed: {0}")]
    SingularMatrix(&'static str),

    #[error("Trajectory piece starting at {time} ns precedes the last piece starting at {last} ns")]
    PieceOrdering { time: f64, last: f64 },

    #[error("Time {time} ns is outside the range {range}")]
    TimeOutOfRange { time: f64, range: TimeRange },

    #[error("Closest approach solve failed with status {0}")]
    ClosestApproachFailed(ClosestApproachStatus),

    #[error("No usable effects remain in the fit")]
    NoUsableEffects,

    #[error("Unknown effect handle: {0}")]
    UnknownEffect(usize),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),
}
