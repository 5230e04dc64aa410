// Signal Detection
// Stateless technical indicators and the weighted detection engine

pub mod engine;
pub mod indicators;
pub mod validation;

pub use engine::{detect, DetectionConfig};
pub use validation::{assess_confirmation, Direction, ValidationAssessment};
