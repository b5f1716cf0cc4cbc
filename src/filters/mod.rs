pub mod ekf_9d;

pub use ekf_9d::{Ekf9d, Ekf9dState, GpsMeasurement, GpsNoise, ProcessNoise};
