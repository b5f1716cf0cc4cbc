use std::fs;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};

/// Vertical offset applied when the antenna sits on the roof [m].
pub const ROOF_MOUNT_OFFSET_Z: f64 = -1.0;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Process noise (per second) ──
    pub process_noise_pos: f64,
    pub process_noise_vel: f64,
    pub process_noise_att: f64,

    // ── GPS measurement noise (variances) ──
    pub gps_position_noise: f64,
    pub gps_velocity_noise: f64,
    pub gps_heading_noise: f64,

    // ── Inertial measurement noise (reserved for tight coupling) ──
    pub imu_accel_noise: f64,
    pub imu_gyro_noise: f64,

    // ── Rigid offsets, body frame [m] ──
    pub antenna_to_imu: (f64, f64, f64),
    pub imu_to_reference: (f64, f64, f64),

    // ── Mode flags ──
    pub roof_mount: bool,
    pub adas_mode: bool,

    // ── Calibration gate ──
    pub init_duration_secs: f64,
    pub movement_threshold: f64,

    // ── Timing ──
    pub default_dt: f64,
    pub max_dt: f64,
    pub stale_reading_secs: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            process_noise_pos: 0.1,
            process_noise_vel: 0.5,
            process_noise_att: 0.05,
            gps_position_noise: 4.0,
            gps_velocity_noise: 0.5,
            gps_heading_noise: 25.0,
            imu_accel_noise: 0.2,
            imu_gyro_noise: 0.01,
            antenna_to_imu: (0.0, 0.0, 0.0),
            imu_to_reference: (0.0, 0.0, 0.0),
            roof_mount: false,
            adas_mode: false,
            init_duration_secs: 30.0,
            movement_threshold: 0.1,
            default_dt: 0.1,
            max_dt: 1.0,
            stale_reading_secs: 1.0,
        }
    }
}

impl FusionConfig {
    /// Load a JSON config; missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> FusionResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| FusionError::Config(format!("{}: {}", path.display(), e)))?;
        let config: FusionConfig = serde_json::from_str(&text)
            .map_err(|e| FusionError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// GPS position variance after the ADAS tightening.
    pub fn gps_position_noise(&self) -> f64 {
        if self.adas_mode {
            self.gps_position_noise * 0.5
        } else {
            self.gps_position_noise
        }
    }

    /// Position process noise after the ADAS tightening.
    pub fn process_noise_pos(&self) -> f64 {
        if self.adas_mode {
            self.process_noise_pos * 0.5
        } else {
            self.process_noise_pos
        }
    }

    /// Total constant offset from the GPS antenna to the vehicle reference point.
    pub fn mount_offset(&self) -> Vector3<f64> {
        let a = self.antenna_to_imu;
        let b = self.imu_to_reference;
        let mut offset = Vector3::new(a.0 + b.0, a.1 + b.1, a.2 + b.2);
        if self.roof_mount {
            offset.z += ROOF_MOUNT_OFFSET_Z;
        }
        offset
    }

    pub fn validate(&self) -> FusionResult<()> {
        let noises = [
            ("process_noise_pos", self.process_noise_pos),
            ("process_noise_vel", self.process_noise_vel),
            ("process_noise_att", self.process_noise_att),
            ("gps_position_noise", self.gps_position_noise),
            ("gps_velocity_noise", self.gps_velocity_noise),
            ("gps_heading_noise", self.gps_heading_noise),
            ("imu_accel_noise", self.imu_accel_noise),
            ("imu_gyro_noise", self.imu_gyro_noise),
            ("init_duration_secs", self.init_duration_secs),
            ("movement_threshold", self.movement_threshold),
            ("stale_reading_secs", self.stale_reading_secs),
        ];
        for (name, value) in noises {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{} must be finite and non-negative (got {})",
                    name, value
                )));
            }
        }

        for (name, value) in [("default_dt", self.default_dt), ("max_dt", self.max_dt)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{} must be positive (got {})",
                    name, value
                )));
            }
        }
        if self.default_dt > self.max_dt {
            return Err(FusionError::InvalidConfig(format!(
                "default_dt {} exceeds max_dt {}",
                self.default_dt, self.max_dt
            )));
        }

        let offsets = [self.antenna_to_imu, self.imu_to_reference];
        if offsets
            .iter()
            .any(|o| !(o.0.is_finite() && o.1.is_finite() && o.2.is_finite()))
        {
            return Err(FusionError::InvalidConfig(
                "mount offsets must be finite".to_string(),
            ));
        }

        Ok(())
    }
}
