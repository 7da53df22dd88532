//! # Fit driver
//!
//! * [`config`]: [`FitConfig`], its builder and the per-meta-iteration settings.
//! * [`status`]: [`FitStatus`], the outcome of each iteration.
//! * [`kalman_chain`]: [`KalmanChain`], the effect arena and the iteration loop.

pub mod config;
pub mod kalman_chain;
pub mod status;

pub use config::{FieldCorrection, FitConfig, FitConfigBuilder, MetaIterationConfig};
pub use kalman_chain::{FitEnvironment, KalmanChain};
pub use status::{FitState, FitStatus};
