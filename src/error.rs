use thiserror::Error;

/// Fusion estimator error types
///
/// Measurement-level variants are absorbed inside `Estimator::update`;
/// only construction and plumbing errors reach callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error("Inertial reading is stale (age {age:.3}s)")]
    StaleMeasurement { age: f64 },

    #[error("Innovation covariance is singular")]
    DegenerateCovariance,

    #[error("No valid fix accepted yet")]
    NoData,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    Config(String),

    #[error("Fusion pipeline closed")]
    PipelineClosed,
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;
