//! Geodetic ↔ local East-North-Up conversion
//!
//! Equirectangular approximation around a fixed origin. Accurate to well
//! under a meter within a few kilometers of the origin; error grows with
//! distance, so this is for vehicle-scale sessions only.

use serde::{Deserialize, Serialize};

use crate::types::{Enu, GpsFix};

/// Meters per degree of latitude (and of longitude at the equator)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Fixed reference point of the local frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Origin {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Origin from a fix; a fix without altitude anchors the frame at 0 m.
    pub fn from_fix(fix: &GpsFix) -> Self {
        Self::new(fix.latitude, fix.longitude, fix.altitude.unwrap_or(0.0))
    }

    pub fn fix_to_enu(&self, fix: &GpsFix) -> Enu {
        geodetic_to_enu(self, fix.latitude, fix.longitude, fix.altitude)
    }
}

/// Convert lat/lon/alt to local (east, north, up) meters relative to `origin`.
///
/// Missing altitude maps to the origin's plane (up = 0).
pub fn geodetic_to_enu(origin: &Origin, lat: f64, lon: f64, alt: Option<f64>) -> Enu {
    let north = (lat - origin.latitude) * METERS_PER_DEGREE;
    let east = (lon - origin.longitude) * METERS_PER_DEGREE * origin.latitude.to_radians().cos();
    let up = alt.map_or(0.0, |a| a - origin.altitude);
    Enu::new(east, north, up)
}

/// Inverse of [`geodetic_to_enu`]: local meters back to (lat, lon, alt).
pub fn enu_to_geodetic(origin: &Origin, enu: &Enu) -> (f64, f64, f64) {
    let lat = origin.latitude + enu.y / METERS_PER_DEGREE;
    let cos_lat = origin.latitude.to_radians().cos();
    // At the poles longitude is degenerate; keep the origin's
    let lon = if cos_lat.abs() > 1e-12 {
        origin.longitude + enu.x / (METERS_PER_DEGREE * cos_lat)
    } else {
        origin.longitude
    };
    (lat, lon, origin.altitude + enu.z)
}
