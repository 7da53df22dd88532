//! # Constants and type definitions for kinfit
//!
//! This module centralizes the **physical constants**, **numeric defaults**, and **matrix type
//! aliases** used throughout the crate.
//!
//! ## Units
//!
//! The whole crate works in a single consistent unit system:
//!
//! - lengths in millimeters,
//! - times in nanoseconds,
//! - momenta, energies and masses in MeV (c = 1 for the mass-energy relation),
//! - magnetic fields in Tesla.
//!
//! With these units the curvature radius of a particle of transverse momentum `pt` (MeV/c) and
//! charge `q` (units of the positron charge) in a field `B` (Tesla) is
//! `R = pt / (CBAR · q · B)` millimeters.

use nalgebra::{Matrix3x6, Matrix6, Matrix6x3, SMatrix, SVector};

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// 2π, useful for azimuth wrapping
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Speed of light in mm/ns
pub const C_LIGHT: f64 = 299.792458;

/// Curvature conversion factor: MeV/c per (Tesla · mm)
pub const CBAR: f64 = C_LIGHT / 1000.0;

/// Electron mass in MeV
pub const ELECTRON_MASS: f64 = 0.510999;

/// Muon mass in MeV
pub const MUON_MASS: f64 = 105.658;

/// Charged pion mass in MeV
pub const PION_MASS: f64 = 139.570;

/// Charged kaon mass in MeV
pub const KAON_MASS: f64 = 493.677;

/// Proton mass in MeV
pub const PROTON_MASS: f64 = 938.272;

// -------------------------------------------------------------------------------------------------
// Numeric defaults
// -------------------------------------------------------------------------------------------------

/// Tolerance of the construction round-trip check (mm and MeV/c)
pub const ROUND_TRIP_TOLERANCE: f64 = 1.0e-5;

/// Maximum deviation of a rotated nominal field axis from the local z axis
pub const FRAME_TOLERANCE: f64 = 1.0e-10;

/// Default time precision of the closest-approach iteration (ns)
pub const POCA_PRECISION: f64 = 1.0e-10;

/// Default iteration budget of the closest-approach iteration
pub const POCA_MAX_ITERATIONS: usize = 50;

/// Below this value of `1 - (d1·d2)²` two directions are treated as parallel
pub const PARALLEL_LIMIT: f64 = 1.0e-5;

/// Default number of integration steps of the field integrator
pub const FIELD_INTEGRATION_STEPS: usize = 10;

/// Time offset placing a material effect just after the crossing it models (ns)
pub const MATERIAL_TIME_OFFSET: f64 = 1.0e-3;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Number of trajectory parameters
pub const NPARAMS: usize = 6;

/// Trajectory parameter vector
pub type ParamVector = SVector<f64, NPARAMS>;

/// Trajectory parameter covariance or information matrix
pub type ParamMatrix = SMatrix<f64, NPARAMS, NPARAMS>;

/// Phase-space state vector (position followed by momentum)
pub type StateVector = SVector<f64, 6>;

/// Phase-space covariance matrix
pub type StateMatrix = SMatrix<f64, 6, 6>;

/// Derivative of the parameters with respect to a 3-vector (position or momentum)
pub type DPDV = Matrix6x3<f64>;

/// Derivative of a 3-vector (position or momentum) with respect to the parameters
pub type DVDP = Matrix3x6<f64>;

/// Derivative of the parameters with respect to the phase-space state
pub type DPDS = Matrix6<f64>;

/// Derivative of the phase-space state with respect to the parameters
pub type DSDP = Matrix6<f64>;
