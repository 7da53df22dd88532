pub mod closest_approach;
pub mod constants;
pub mod effects;
pub mod field;
pub mod fit;
pub mod hits;
pub mod kinfit_errors;
pub mod material;
pub mod parameters;
pub mod particle_state;
pub mod time_range;
pub mod trajectory;

pub use kinfit_errors::KinFitError;
