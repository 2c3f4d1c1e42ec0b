//! # Coordinates
//! Validated `(latitude, longitude)` pairs and the rounded key used by the
//! feature cache and the single-flight table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoordinateError;

/// Decimal places kept in a cache key (0.01° ≈ 1.1 km).
pub const KEY_PRECISION: i32 = 2;

/// A validated WGS84 coordinate. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting non-finite or out-of-range components.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Cache/single-flight key at [`KEY_PRECISION`] decimal places.
    pub fn key(&self) -> CoordKey {
        let factor = 10f64.powi(KEY_PRECISION);
        CoordKey {
            lat: (self.latitude * factor).round() as i32,
            lon: (self.longitude * factor).round() as i32,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Rounded coordinate stored as integer hundredths of a degree so it can be
/// hashed and compared exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoordKey {
    lat: i32,
    lon: i32,
}

impl CoordKey {
    pub fn latitude(&self) -> f64 {
        f64::from(self.lat) / 10f64.powi(KEY_PRECISION)
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.lon) / 10f64.powi(KEY_PRECISION)
    }
}

impl fmt::Display for CoordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2},{:.2}", self.latitude(), self.longitude())
    }
}
