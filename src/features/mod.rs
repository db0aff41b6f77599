// Shape vectors and forward labels
pub mod engine;
pub mod math;

pub use engine::PatternEngine;
pub use math::{calculate_log_returns, calculate_slope, calculate_z_score, PLANCK_EPSILON};
