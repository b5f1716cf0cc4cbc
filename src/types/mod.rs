pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};

/// Differential-correction annotation attached by the GPS driver.
///
/// Carried through to the output untouched; the estimator never weights by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    Autonomous,
    Dgps,
    RtkFloat,
    RtkFixed,
}

/// Already-parsed satellite fix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Seconds on the estimator's time base
    pub timestamp: f64,
    /// Degrees, [-90, 90]
    pub latitude: f64,
    /// Degrees, [-180, 180]
    pub longitude: f64,
    /// Ground speed [m/s]
    pub speed: f64,
    /// Course over ground, degrees clockwise from north
    pub heading: f64,
    /// Altitude [m]
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub quality: Option<FixQuality>,
}

impl GpsFix {
    pub fn new(timestamp: f64, latitude: f64, longitude: f64, speed: f64, heading: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed,
            heading,
            altitude: None,
            quality: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_quality(mut self, quality: FixQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Reject fixes that must never reach the origin or the filter.
    pub fn validate(&self) -> FusionResult<()> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if !lat_ok || !lon_ok {
            return Err(FusionError::InvalidMeasurement(format!(
                "fix outside valid bounds: lat={}, lon={}",
                self.latitude, self.longitude
            )));
        }
        if !self.speed.is_finite() || !self.heading.is_finite() {
            return Err(FusionError::InvalidMeasurement(format!(
                "non-finite fix velocity: speed={}, heading={}",
                self.speed, self.heading
            )));
        }
        if let Some(alt) = self.altitude {
            if !alt.is_finite() {
                return Err(FusionError::InvalidMeasurement(format!(
                    "non-finite fix altitude {}",
                    alt
                )));
            }
        }
        Ok(())
    }
}

/// Body-frame inertial sample.
///
/// `accel` is gravity-compensated linear acceleration [m/s²],
/// `gyro` is angular rate [deg/s] about (x, y, z).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub timestamp: f64,
    pub accel: (f64, f64, f64),
    pub gyro: (f64, f64, f64),
    #[serde(default)]
    pub mag: Option<(f64, f64, f64)>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ImuReading {
    pub fn new(timestamp: f64, accel: (f64, f64, f64), gyro: (f64, f64, f64)) -> Self {
        Self {
            timestamp,
            accel,
            gyro,
            mag: None,
            temperature: None,
        }
    }

    pub fn accel_magnitude(&self) -> f64 {
        let (x, y, z) = self.accel;
        (x * x + y * y + z * z).sqrt()
    }

    /// Reject samples carrying NaN or infinite axes.
    pub fn validate(&self) -> FusionResult<()> {
        let (ax, ay, az) = self.accel;
        let (gx, gy, gz) = self.gyro;
        if [ax, ay, az, gx, gy, gz].iter().any(|v| !v.is_finite()) {
            return Err(FusionError::InvalidMeasurement(format!(
                "non-finite inertial sample: accel={:?}, gyro={:?}",
                self.accel, self.gyro
            )));
        }
        Ok(())
    }

    /// Age check against `now`; a reading further than `max_age` away is stale.
    pub fn check_fresh(&self, now: f64, max_age: f64) -> FusionResult<()> {
        let age = now - self.timestamp;
        if !age.is_finite() || age.abs() > max_age {
            return Err(FusionError::StaleMeasurement { age });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_bounds() {
        assert!(GpsFix::new(0.0, 34.0, -118.0, 0.0, 0.0).validate().is_ok());
        assert!(GpsFix::new(0.0, 90.0, 180.0, 0.0, 0.0).validate().is_ok());
        assert!(GpsFix::new(0.0, 91.0, 0.0, 0.0, 0.0).validate().is_err());
        assert!(GpsFix::new(0.0, 0.0, 181.0, 0.0, 0.0).validate().is_err());
        assert!(GpsFix::new(0.0, f64::NAN, 0.0, 0.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_non_finite_altitude_rejected() {
        let fix = GpsFix::new(0.0, 10.0, 10.0, 1.0, 0.0).with_altitude(f64::INFINITY);
        assert!(matches!(
            fix.validate(),
            Err(FusionError::InvalidMeasurement(_))
        ));
    }

    #[test]
    fn test_reading_staleness() {
        let reading = ImuReading::new(100.0, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0));
        assert!(reading.check_fresh(100.5, 1.0).is_ok());
        assert!(reading.check_fresh(101.0, 1.0).is_ok());

        match reading.check_fresh(101.1, 1.0) {
            Err(FusionError::StaleMeasurement { age }) => assert!((age - 1.1).abs() < 1e-9),
            other => panic!("expected stale, got {:?}", other),
        }
        // Far-future timestamps are just as unusable
        assert!(reading.check_fresh(98.0, 1.0).is_err());
    }

    #[test]
    fn test_non_finite_reading_rejected() {
        assert!(ImuReading::new(0.0, (0.1, 0.2, 9.0), (1.0, 0.0, -3.0))
            .validate()
            .is_ok());
        for reading in [
            ImuReading::new(0.0, (f64::NAN, 0.0, 0.0), (0.0, 0.0, 0.0)),
            ImuReading::new(0.0, (0.0, 0.0, f64::NEG_INFINITY), (0.0, 0.0, 0.0)),
            ImuReading::new(0.0, (0.0, 0.0, 0.0), (0.0, 0.0, f64::INFINITY)),
        ] {
            assert!(matches!(
                reading.validate(),
                Err(FusionError::InvalidMeasurement(_))
            ));
        }
    }

    #[test]
    fn test_accel_magnitude() {
        let reading = ImuReading::new(0.0, (3.0, 4.0, 0.0), (0.0, 0.0, 0.0));
        assert!((reading.accel_magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_fix_json_defaults() {
        let fix: GpsFix = serde_json::from_str(
            r#"{"timestamp": 1.0, "latitude": 34.0, "longitude": -118.0, "speed": 3.0, "heading": 90.0}"#,
        )
        .unwrap();
        assert_eq!(fix.altitude, None);
        assert_eq!(fix.quality, None);

        let fix: GpsFix = serde_json::from_str(
            r#"{"timestamp": 1.0, "latitude": 34.0, "longitude": -118.0, "speed": 3.0, "heading": 90.0, "quality": "rtk_fixed"}"#,
        )
        .unwrap();
        assert_eq!(fix.quality, Some(FixQuality::RtkFixed));
    }
}
