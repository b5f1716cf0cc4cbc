//! GPS/IMU sensor fusion for vehicle navigation.
//!
//! A 9-state Kalman estimator (position, velocity, attitude in a local ENU
//! frame) corrected by GPS fixes and, once a stationary calibration gate
//! has passed, predicted from inertial readings.

pub mod calibration;
pub mod clock;
pub mod config;
pub mod error;
pub mod estimator;
pub mod filters;
pub mod frame;
pub mod pipeline;
pub mod types;

pub use calibration::{CalibrationGate, CalibrationState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FusionConfig;
pub use error::{FusionError, FusionResult};
pub use estimator::{Estimator, EstimatorStatus, FusionOutput};
pub use frame::Origin;
pub use pipeline::{FusionPipeline, PipelineHandle};
pub use types::{FixQuality, GpsFix, ImuReading};
