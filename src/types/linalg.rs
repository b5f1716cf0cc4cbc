//! Linear algebra type system for the fusion estimator
//!
//! Fixed-size aliases so every matrix in the 9-state filter is
//! dimension-checked at compile time.

use nalgebra::{SMatrix, SVector, Vector3};

// ===== State Dimensions =====
pub const STATE_DIM_9: usize = 9;

// ===== State Indices =====
pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_Z: usize = 2;
pub const IDX_VX: usize = 3;
pub const IDX_VY: usize = 4;
pub const IDX_VZ: usize = 5;
pub const IDX_HEADING: usize = 6;
pub const IDX_PITCH: usize = 7;
pub const IDX_ROLL: usize = 8;

// ===== 9-State Filter Types =====
pub type StateVec9 = SVector<f64, STATE_DIM_9>;
pub type StateMat9 = SMatrix<f64, STATE_DIM_9, STATE_DIM_9>;

// The GPS measurement spans the full state; unobserved rows carry huge noise.
pub type MeasVec9 = SVector<f64, STATE_DIM_9>;
pub type MeasNoise9 = SMatrix<f64, STATE_DIM_9, STATE_DIM_9>;
pub type KalmanGain9 = SMatrix<f64, STATE_DIM_9, STATE_DIM_9>;
pub type Jacobian9 = SMatrix<f64, STATE_DIM_9, STATE_DIM_9>;

// ===== Small vectors =====
pub type Enu = Vector3<f64>;
