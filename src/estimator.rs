// estimator.rs: GPS/IMU fusion entry point
//
// Owns the 9-state filter, the calibration gate, the origin and the clock.
// Pure computation: no threads, no I/O. One owner calls `update()`; if
// producers live on several threads, funnel them through `pipeline`.

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationGate, CalibrationState};
use crate::clock::{Clock, SystemClock};
use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::filters::{Ekf9d, Ekf9dState, GpsMeasurement, GpsNoise, ProcessNoise};
use crate::frame::{enu_to_geodetic, Origin};
use crate::types::{Enu, FixQuality, GpsFix, ImuReading};

// ─── Output snapshot ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionOutput {
    /// Clock time of the update that produced this snapshot
    pub timestamp: f64,
    /// ENU position of the reference point [m]
    pub position: (f64, f64, f64),
    /// ENU velocity [m/s]
    pub velocity: (f64, f64, f64),
    /// Degrees, [0, 360)
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Absolute position of the estimate
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Horizontal speed [m/s]
    pub speed: f64,
    pub calibration: CalibrationState,
    /// 1 / (1 + sqrt(P_xx + P_yy)), in [0, 1]
    pub position_quality: f64,
    /// Integration step used for this update [s]
    pub dt: f64,
    /// Annotation of the last fix that corrected the state
    pub fix_quality: Option<FixQuality>,
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorStatus {
    pub state: CalibrationState,
    pub elapsed_since_init: Option<f64>,
    pub roof_mount: bool,
    pub adas_mode: bool,
    pub origin: Option<Origin>,
    pub origin_set: bool,

    // ── Counters ──
    pub gps_updates: u64,
    pub imu_predictions: u64,
    pub rejected_fixes: u64,
    pub rejected_readings: u64,
    pub stale_readings: u64,
    pub skipped_corrections: u64,
}

// ─── Estimator ───────────────────────────────────────────────────────────────

pub struct Estimator {
    config: FusionConfig,
    gate: CalibrationGate,
    ekf: Ekf9d,
    clock: Box<dyn Clock>,

    /// Set once, from the first valid fix
    origin: Option<Origin>,
    last_update_time: Option<f64>,
    last_fix_quality: Option<FixQuality>,

    gps_updates: u64,
    imu_predictions: u64,
    rejected_fixes: u64,
    rejected_readings: u64,
    stale_readings: u64,
    skipped_corrections: u64,
}

impl Estimator {
    /// Estimator on the wall clock.
    pub fn new(config: FusionConfig) -> FusionResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Estimator reading "now" from `clock`; timestamps on fixes and
    /// readings must share its time base.
    pub fn with_clock(config: FusionConfig, clock: impl Clock + 'static) -> FusionResult<Self> {
        config.validate()?;

        let gate = CalibrationGate::new(config.init_duration_secs, config.movement_threshold);
        if gate.state() == CalibrationState::Error {
            return Err(FusionError::InvalidConfig(
                "calibration gate parameters".to_string(),
            ));
        }

        Ok(Self {
            config,
            gate,
            ekf: Ekf9d::new(),
            clock: Box::new(clock),
            origin: None,
            last_update_time: None,
            last_fix_quality: None,
            gps_updates: 0,
            imu_predictions: 0,
            rejected_fixes: 0,
            rejected_readings: 0,
            stale_readings: 0,
            skipped_corrections: 0,
        })
    }

    /// Begin stationary calibration. No effect once started.
    pub fn start_initialization(&mut self) -> bool {
        let now = self.clock.now();
        self.gate.start(now)
    }

    /// Fuse whatever arrived since the last call.
    ///
    /// Returns `None` until a valid fix has ever been accepted. Bad input
    /// is logged and dropped, never returned as an error.
    pub fn update(
        &mut self,
        fix: Option<&GpsFix>,
        reading: Option<&ImuReading>,
    ) -> Option<FusionOutput> {
        let now = self.clock.now();

        let fix = fix.and_then(|f| match f.validate() {
            Ok(()) => Some(f),
            Err(e) => {
                log::warn!("Discarding fix: {}", e);
                self.rejected_fixes += 1;
                None
            }
        });

        let reading = reading.and_then(|r| {
            if let Err(e) = r.validate() {
                log::warn!("Discarding inertial reading: {}", e);
                self.rejected_readings += 1;
                return None;
            }
            match r.check_fresh(now, self.config.stale_reading_secs) {
                Ok(()) => Some(r),
                Err(e) => {
                    log::warn!("Discarding inertial reading: {}", e);
                    self.stale_readings += 1;
                    None
                }
            }
        });

        self.gate.advance(now);
        if let Some(r) = reading {
            self.gate.observe_motion(r.accel_magnitude());
        }

        if self.origin.is_none() {
            if let Some(f) = fix {
                self.set_origin(f);
            }
        }

        let Some(origin) = self.origin else {
            log::debug!("{}", FusionError::NoData);
            return None;
        };

        let dt = self.step_dt(now);
        self.last_update_time = Some(now);

        if self.gate.is_active() {
            if let Some(r) = reading {
                let noise = self.process_noise();
                self.ekf.predict(r.accel, r.gyro, dt, &noise);
                self.imu_predictions += 1;
            }
        }

        if let Some(f) = fix {
            let meas = self.measure(&origin, f);
            let noise = self.gps_noise();
            match self.ekf.correct(&meas, &noise) {
                Ok(()) => {
                    self.gps_updates += 1;
                    self.last_fix_quality = f.quality;
                }
                Err(e) => {
                    log::warn!("Skipping GPS correction, keeping prediction: {}", e);
                    self.skipped_corrections += 1;
                }
            }
        }

        Some(self.snapshot(&origin, now, dt))
    }

    pub fn get_status(&self) -> EstimatorStatus {
        let now = self.clock.now();
        EstimatorStatus {
            state: self.gate.state(),
            elapsed_since_init: self.gate.elapsed(now),
            roof_mount: self.config.roof_mount,
            adas_mode: self.config.adas_mode,
            origin: self.origin,
            origin_set: self.origin.is_some(),
            gps_updates: self.gps_updates,
            imu_predictions: self.imu_predictions,
            rejected_fixes: self.rejected_fixes,
            rejected_readings: self.rejected_readings,
            stale_readings: self.stale_readings,
            skipped_corrections: self.skipped_corrections,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// The single readiness gate shared with any driver layer.
    pub fn gate(&self) -> &CalibrationGate {
        &self.gate
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub fn filter_state(&self) -> Ekf9dState {
        self.ekf.get_state()
    }

    fn set_origin(&mut self, fix: &GpsFix) {
        let origin = Origin::from_fix(fix);
        log::info!(
            "Origin set at ({:.7}, {:.7}, {:.1} m)",
            origin.latitude,
            origin.longitude,
            origin.altitude
        );
        self.origin = Some(origin);

        // Start the estimate on the first measured position
        let seed = self.measured_position(&origin, fix);
        self.ekf.set_position((seed.x, seed.y, seed.z));
    }

    /// Clamp the step since the previous update into (0, max_dt].
    fn step_dt(&self, now: f64) -> f64 {
        let Some(last) = self.last_update_time else {
            return self.config.default_dt;
        };
        let dt = now - last;
        if !dt.is_finite() || dt <= 0.0 {
            self.config.default_dt
        } else {
            dt.min(self.config.max_dt)
        }
    }

    /// Fix position in the local frame, shifted to the reference point.
    fn measured_position(&self, origin: &Origin, fix: &GpsFix) -> Enu {
        origin.fix_to_enu(fix) + self.config.mount_offset()
    }

    fn measure(&self, origin: &Origin, fix: &GpsFix) -> GpsMeasurement {
        let pos = self.measured_position(origin, fix);
        GpsMeasurement::from_speed_heading((pos.x, pos.y, pos.z), fix.speed, fix.heading)
    }

    fn process_noise(&self) -> ProcessNoise {
        ProcessNoise {
            position: self.config.process_noise_pos(),
            velocity: self.config.process_noise_vel,
            attitude: self.config.process_noise_att,
        }
    }

    fn gps_noise(&self) -> GpsNoise {
        GpsNoise {
            position: self.config.gps_position_noise(),
            velocity: self.config.gps_velocity_noise,
            heading: self.config.gps_heading_noise,
        }
    }

    fn snapshot(&self, origin: &Origin, now: f64, dt: f64) -> FusionOutput {
        let state = self.ekf.get_state();
        let (x, y, z) = state.position;
        let (vx, vy, vz) = state.velocity;
        let (heading, pitch, roll) = state.attitude;
        let (latitude, longitude, altitude) = enu_to_geodetic(origin, &Enu::new(x, y, z));

        FusionOutput {
            timestamp: now,
            position: (x, y, z),
            velocity: (vx, vy, vz),
            heading,
            pitch,
            roll,
            latitude,
            longitude,
            altitude,
            speed: (vx * vx + vy * vy).sqrt(),
            calibration: self.gate.state(),
            position_quality: self.ekf.position_quality(),
            dt,
            fix_quality: self.last_fix_quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn estimator(config: FusionConfig) -> (Estimator, ManualClock) {
        let clock = ManualClock::new(1000.0);
        let est = Estimator::with_clock(config, clock.clone()).unwrap();
        (est, clock)
    }

    #[test]
    fn test_no_output_before_first_fix() {
        let (mut est, clock) = estimator(FusionConfig::default());
        let reading = ImuReading::new(clock.now(), (0.0, 0.0, 0.0), (0.0, 0.0, 0.0));
        assert!(est.update(None, Some(&reading)).is_none());
        assert!(est.update(None, None).is_none());
        assert!(!est.get_status().origin_set);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FusionConfig {
            max_dt: -1.0,
            ..FusionConfig::default()
        };
        assert!(matches!(
            Estimator::new(config),
            Err(FusionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_first_dt_uses_default() {
        let (mut est, clock) = estimator(FusionConfig::default());
        let out = est
            .update(Some(&GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0)), None)
            .unwrap();
        assert_eq!(out.dt, 0.1);
    }

    #[test]
    fn test_non_positive_dt_resets_to_default() {
        let (mut est, clock) = estimator(FusionConfig::default());
        let fix = GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0);
        est.update(Some(&fix), None);

        // Same instant again
        let out = est.update(Some(&fix), None).unwrap();
        assert_eq!(out.dt, 0.1);

        // Clock stepped backwards
        clock.advance(-5.0);
        let out = est.update(Some(&fix), None).unwrap();
        assert_eq!(out.dt, 0.1);
    }

    #[test]
    fn test_counters() {
        let (mut est, clock) = estimator(FusionConfig::default());
        est.update(Some(&GpsFix::new(clock.now(), 91.0, 0.0, 0.0, 0.0)), None);
        let stale = ImuReading::new(clock.now() - 2.0, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0));
        est.update(Some(&GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0)), Some(&stale));

        let status = est.get_status();
        assert_eq!(status.rejected_fixes, 1);
        assert_eq!(status.stale_readings, 1);
        assert_eq!(status.gps_updates, 1);
        assert_eq!(status.imu_predictions, 0);
    }

    #[test]
    fn test_inertial_ignored_until_active() {
        let config = FusionConfig {
            init_duration_secs: 5.0,
            ..FusionConfig::default()
        };
        let (mut est, clock) = estimator(config);
        est.update(Some(&GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0)), None);
        est.start_initialization();

        let moving = |t: f64| ImuReading::new(t, (1.0, 0.0, 0.0), (0.0, 0.0, 0.0));

        clock.advance(1.0);
        let out = est.update(None, Some(&moving(clock.now()))).unwrap();
        assert_eq!(out.calibration, CalibrationState::Initializing);
        assert_eq!(out.velocity.0, 0.0);

        clock.advance(5.0);
        let out = est.update(None, Some(&moving(clock.now()))).unwrap();
        // Initialized and Active in one call, then the reading predicts
        assert_eq!(out.calibration, CalibrationState::Active);
        assert!(out.velocity.0 > 0.0);
        assert_eq!(est.get_status().imu_predictions, 1);
    }

    #[test]
    fn test_output_reports_absolute_position() {
        let (mut est, clock) = estimator(FusionConfig::default());
        let out = est
            .update(
                Some(&GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0).with_altitude(250.0)),
                None,
            )
            .unwrap();
        assert!((out.latitude - 34.0).abs() < 1e-9);
        assert!((out.longitude + 118.0).abs() < 1e-9);
        assert!((out.altitude - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_fix_quality_passthrough() {
        let (mut est, clock) = estimator(FusionConfig::default());
        let fix = GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0).with_quality(FixQuality::RtkFixed);
        let out = est.update(Some(&fix), None).unwrap();
        assert_eq!(out.fix_quality, Some(FixQuality::RtkFixed));
    }

    #[test]
    fn test_non_finite_reading_does_not_poison_state() {
        let config = FusionConfig {
            init_duration_secs: 0.0,
            ..FusionConfig::default()
        };
        let (mut est, clock) = estimator(config);
        est.start_initialization();
        let moving = ImuReading::new(clock.now(), (0.5, 0.0, 0.0), (0.0, 0.0, 0.0));
        est.update(Some(&GpsFix::new(clock.now(), 34.0, -118.0, 0.0, 0.0)), Some(&moving));
        assert!(est.gate().is_active());

        clock.advance(0.1);
        let bad = ImuReading::new(clock.now(), (f64::NAN, 0.0, 0.0), (0.0, 0.0, f64::INFINITY));
        est.update(None, Some(&bad));

        for i in 0..5 {
            clock.advance(1.0);
            let fix = GpsFix::new(clock.now(), 34.0 + i as f64 * 1e-5, -118.0, 1.0, 0.0);
            let out = est.update(Some(&fix), None).unwrap();
            assert!(out.position.0.is_finite() && out.position.1.is_finite());
            assert!(out.velocity.0.is_finite() && out.velocity.2.is_finite());
            assert!(out.position_quality > 0.0);
        }

        let status = est.get_status();
        assert_eq!(status.rejected_readings, 1);
        assert_eq!(status.imu_predictions, 1);
        assert_eq!(status.gps_updates, 6);
    }

    #[test]
    fn test_degenerate_correction_keeps_prediction() {
        let config = FusionConfig {
            gps_position_noise: 0.0,
            gps_velocity_noise: 0.0,
            gps_heading_noise: 0.0,
            ..FusionConfig::default()
        };
        let (mut est, clock) = estimator(config);
        let first = est
            .update(Some(&GpsFix::new(clock.now(), 34.0, -118.0, 2.0, 90.0)), None)
            .unwrap();

        // Zero measurement noise collapsed the observed covariance; the
        // next innovation covariance is singular.
        let out = est
            .update(Some(&GpsFix::new(clock.now(), 34.001, -118.001, 5.0, 10.0)), None)
            .unwrap();
        assert_eq!(out.position, first.position);
        assert_eq!(out.velocity, first.velocity);
        assert_eq!(out.heading, first.heading);

        let status = est.get_status();
        assert_eq!(status.skipped_corrections, 1);
        assert_eq!(status.gps_updates, 1);
        assert_eq!(est.filter_state().corrections, 1);
    }

    #[test]
    fn test_gate_built_from_config() {
        let config = FusionConfig {
            init_duration_secs: 12.5,
            movement_threshold: 0.3,
            ..FusionConfig::default()
        };
        let (est, _clock) = estimator(config);
        assert_eq!(est.gate().duration_secs(), 12.5);
        assert_eq!(est.gate().movement_threshold(), 0.3);
        assert_eq!(est.config().init_duration_secs, 12.5);
        assert_eq!(est.filter_state().predictions, 0);
    }

    #[test]
    fn test_start_initialization_idempotent() {
        let (mut est, clock) = estimator(FusionConfig::default());
        assert!(est.start_initialization());
        clock.advance(3.0);
        assert!(!est.start_initialization());
        assert_eq!(est.get_status().elapsed_since_init, Some(3.0));
    }
}
