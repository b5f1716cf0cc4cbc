/// 9-Dimensional Kalman Filter (loosely coupled GPS/IMU)
///
/// State Vector (9D):
/// [0-2]: Position (X, Y, Z) in local ENU frame relative to origin (meters)
/// [3-5]: Velocity (Vx, Vy, Vz) in ENU (m/s)
/// [6-8]: Heading, Pitch, Roll (degrees; heading clockwise from north)
///
/// Attitude is integrated directly from body rates; there is no
/// body→navigation rotation. GPS observes x, y, z, vx, vy and heading.
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::types::{
    Jacobian9, KalmanGain9, MeasNoise9, MeasVec9, StateMat9, StateVec9, IDX_HEADING, IDX_PITCH,
    IDX_ROLL, IDX_VX, IDX_VY, IDX_VZ, IDX_X, IDX_Y, IDX_Z,
};

/// Measurement variance for rows GPS cannot observe (vz, pitch, roll).
/// Drives their Kalman gain to ~0.
pub const UNOBSERVED_NOISE: f64 = 1.0e8;

/// State rows that only inertial prediction may change.
const UNOBSERVED_ROWS: [usize; 3] = [IDX_VZ, IDX_PITCH, IDX_ROLL];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ekf9dState {
    /// Position in local frame (East, North, Up) relative to origin [meters]
    pub position: (f64, f64, f64),

    /// Velocity in local frame [m/s]
    pub velocity: (f64, f64, f64),

    /// (heading, pitch, roll) [degrees], heading in [0, 360)
    pub attitude: (f64, f64, f64),

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    /// Update counters
    pub predictions: u64,
    pub corrections: u64,
}

/// Diagonal process noise rates, per second of prediction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessNoise {
    pub position: f64,
    pub velocity: f64,
    pub attitude: f64,
}

/// Diagonal GPS measurement variances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsNoise {
    pub position: f64,
    pub velocity: f64,
    pub heading: f64,
}

/// What GPS saw, already in the filter's frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpsMeasurement {
    /// ENU position of the reference point [m]
    pub position: (f64, f64, f64),
    /// East/North velocity [m/s]
    pub velocity: (f64, f64),
    /// Course over ground [deg]
    pub heading: f64,
}

impl GpsMeasurement {
    /// Build from ENU position plus ground speed/course.
    /// Speed is clamped at zero; heading is clockwise from north.
    pub fn from_speed_heading(position: (f64, f64, f64), speed: f64, heading_deg: f64) -> Self {
        let speed = speed.max(0.0);
        let heading_rad = heading_deg.to_radians();
        Self {
            position,
            velocity: (speed * heading_rad.sin(), speed * heading_rad.cos()),
            heading: heading_deg,
        }
    }
}

pub struct Ekf9d {
    /// State vector [9D]
    state: StateVec9,

    /// Covariance matrix [9x9]
    covariance: StateMat9,

    predictions: u64,
    corrections: u64,
}

impl Default for Ekf9d {
    fn default() -> Self {
        Self::new()
    }
}

impl Ekf9d {
    /// Zero state, identity covariance
    pub fn new() -> Self {
        Self {
            state: StateVec9::zeros(),
            covariance: StateMat9::identity(),
            predictions: 0,
            corrections: 0,
        }
    }

    pub fn state(&self) -> &StateVec9 {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat9 {
        &self.covariance
    }

    /// Overwrite the position states (origin seeding).
    pub fn set_position(&mut self, position: (f64, f64, f64)) {
        self.state[IDX_X] = position.0;
        self.state[IDX_Y] = position.1;
        self.state[IDX_Z] = position.2;
    }

    /// Predict step: integrate body-frame accel and rates over `dt`.
    ///
    /// `accel` in m/s², `gyro` in deg/s about (x, y, z).
    pub fn predict(
        &mut self,
        accel: (f64, f64, f64),
        gyro: (f64, f64, f64),
        dt: f64,
        noise: &ProcessNoise,
    ) {
        // Kinematics: Position += Velocity * dt (uses pre-update velocity)
        self.state[IDX_X] += self.state[IDX_VX] * dt;
        self.state[IDX_Y] += self.state[IDX_VY] * dt;
        self.state[IDX_Z] += self.state[IDX_VZ] * dt;

        // Velocity += Accel * dt
        self.state[IDX_VX] += accel.0 * dt;
        self.state[IDX_VY] += accel.1 * dt;
        self.state[IDX_VZ] += accel.2 * dt;

        // Attitude += rate * dt
        self.state[IDX_ROLL] += gyro.0 * dt;
        self.state[IDX_PITCH] += gyro.1 * dt;
        self.state[IDX_HEADING] = normalize_heading(self.state[IDX_HEADING] + gyro.2 * dt);

        let f = Self::transition_jacobian(dt);

        let mut q = StateMat9::zeros();
        for i in 0..3 {
            q[(i, i)] = noise.position * dt;
            q[(3 + i, 3 + i)] = noise.velocity * dt;
            q[(6 + i, 6 + i)] = noise.attitude * dt;
        }

        // Propagate covariance: P = F * P * F^T + Q
        self.covariance = f * self.covariance * f.transpose() + q;
        self.symmetrize();

        self.predictions += 1;
    }

    /// GPS correction.
    ///
    /// On a singular innovation covariance the state and covariance are
    /// left untouched and `DegenerateCovariance` is returned.
    pub fn correct(&mut self, meas: &GpsMeasurement, noise: &GpsNoise) -> FusionResult<()> {
        // Unobserved rows measure the current state: zero innovation.
        let z = MeasVec9::from_column_slice(&[
            meas.position.0,
            meas.position.1,
            meas.position.2,
            meas.velocity.0,
            meas.velocity.1,
            self.state[IDX_VZ],
            meas.heading,
            self.state[IDX_PITCH],
            self.state[IDX_ROLL],
        ]);

        let h = Jacobian9::identity();
        let r = MeasNoise9::from_diagonal(&MeasVec9::from_column_slice(&[
            noise.position,
            noise.position,
            noise.position,
            noise.velocity,
            noise.velocity,
            UNOBSERVED_NOISE,
            noise.heading,
            UNOBSERVED_NOISE,
            UNOBSERVED_NOISE,
        ]));

        let mut innovation = z - h * self.state;
        innovation[IDX_HEADING] = wrap_degrees(innovation[IDX_HEADING]);

        // Innovation covariance: S = H * P * H^T + R
        let p = &self.covariance;
        let h_t = h.transpose();
        let s = h * p * h_t + r;

        let Some(s_inv) = s.try_inverse() else {
            return Err(FusionError::DegenerateCovariance);
        };
        if s_inv.iter().any(|v| !v.is_finite()) {
            return Err(FusionError::DegenerateCovariance);
        }

        // Kalman gain: K = P * H^T * S^-1
        let mut k: KalmanGain9 = p * h_t * s_inv;

        // GPS never corrects vz, pitch or roll, not even through cross-covariance
        for row in UNOBSERVED_ROWS {
            k.row_mut(row).fill(0.0);
        }

        self.state += k * innovation;
        self.state[IDX_HEADING] = normalize_heading(self.state[IDX_HEADING]);

        // Joseph form: P = (I - K*H) * P * (I - K*H)^T + K * R * K^T
        // (valid for the suboptimal gain above)
        let i_minus_kh = StateMat9::identity() - k * h;
        self.covariance =
            i_minus_kh * self.covariance * i_minus_kh.transpose() + k * r * k.transpose();
        self.symmetrize();

        self.corrections += 1;
        Ok(())
    }

    /// Position quality in [0, 1], falling as horizontal uncertainty grows.
    pub fn position_quality(&self) -> f64 {
        let horizontal = self.covariance[(IDX_X, IDX_X)] + self.covariance[(IDX_Y, IDX_Y)];
        if !horizontal.is_finite() || horizontal < 0.0 {
            return 0.0;
        }
        (1.0 / (1.0 + horizontal.sqrt())).clamp(0.0, 1.0)
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> Ekf9dState {
        Ekf9dState {
            position: (self.state[IDX_X], self.state[IDX_Y], self.state[IDX_Z]),
            velocity: (self.state[IDX_VX], self.state[IDX_VY], self.state[IDX_VZ]),
            attitude: (
                normalize_heading(self.state[IDX_HEADING]),
                self.state[IDX_PITCH],
                self.state[IDX_ROLL],
            ),
            covariance_trace: self.covariance.trace(),
            predictions: self.predictions,
            corrections: self.corrections,
        }
    }

    /// Constant-velocity transition: position rows pick up velocity * dt.
    fn transition_jacobian(dt: f64) -> Jacobian9 {
        let mut f = Jacobian9::identity();
        f[(IDX_X, IDX_VX)] = dt;
        f[(IDX_Y, IDX_VY)] = dt;
        f[(IDX_Z, IDX_VZ)] = dt;
        f
    }

    /// Force symmetry: P = (P + P^T) / 2
    fn symmetrize(&mut self) {
        self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
    }

    #[cfg(test)]
    fn covariance_mut(&mut self) -> &mut StateMat9 {
        &mut self.covariance
    }
}

/// Map any angle in degrees into [0, 360).
pub fn normalize_heading(deg: f64) -> f64 {
    if !deg.is_finite() {
        return 0.0;
    }
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Map an angle difference in degrees into [-180, 180).
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
