//! Sun position source.
//!
//! The astronomy itself lives in the `sun` crate (a port of suncalc). This module
//! only fixes the contract the controller relies on: for a timestamp and a
//! geographic position, return the sun's direction in radians with azimuth
//! measured from south toward west.

use crate::geometry::{wrap_pi, Direction, GeoPosition};
use chrono::{DateTime, Utc};
use std::f64::consts::PI;

/// Source of sun positions.
pub trait SunEphemeris: Send + Sync {
    /// Direction of the sun seen from `location` at `at`.
    fn sun_position(&self, at: DateTime<Utc>, location: GeoPosition) -> Direction;
}

/// Ephemeris backed by the suncalc algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct SunCalc;

impl SunEphemeris for SunCalc {
    fn sun_position(&self, at: DateTime<Utc>, location: GeoPosition) -> Direction {
        let pos = sun::pos(at.timestamp_millis(), location.lat, location.long);
        // `sun` reports a compass bearing (north = 0); rotate to south = 0.
        Direction::new(wrap_pi(pos.azimuth - PI), pos.altitude)
    }
}

/// A sun that never moves. Used by bench setups and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSun(pub Direction);

impl SunEphemeris for FixedSun {
    fn sun_position(&self, _at: DateTime<Utc>, _location: GeoPosition) -> Direction {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::f64::consts::{FRAC_PI_2, PI};

    const AUCKLAND: GeoPosition = GeoPosition {
        lat: -36.9565,
        long: 174.7777,
    };

    #[test]
    fn test_suncalc_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2023, 7, 18, 8, 55, 0).unwrap();
        let a = SunCalc.sun_position(at, AUCKLAND);
        let b = SunCalc.sun_position(at, AUCKLAND);
        assert_eq!(a, b);
    }

    #[test]
    fn test_midday_sun_is_up_and_night_sun_is_down() {
        // 00:00 UTC is around local noon in New Zealand.
        let noon = Utc.with_ymd_and_hms(2023, 1, 10, 0, 30, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2023, 1, 10, 12, 30, 0).unwrap();

        let up = SunCalc.sun_position(noon, AUCKLAND);
        let down = SunCalc.sun_position(midnight, AUCKLAND);

        assert!(up.altitude > 0.0 && up.altitude <= FRAC_PI_2);
        assert!(down.altitude < 0.0);
    }

    #[test]
    fn test_noon_sun_is_due_south_in_north() {
        // Solar noon at the prime meridian around the March equinox.
        let noon = Utc.with_ymd_and_hms(2023, 3, 20, 12, 7, 0).unwrap();
        let sun = SunCalc.sun_position(noon, GeoPosition { lat: 48.0, long: 0.0 });
        assert!(sun.azimuth.abs() < 0.05, "azimuth {}", sun.azimuth);
        assert!((sun.altitude - (42.0f64).to_radians()).abs() < 0.02);
    }

    #[test]
    fn test_noon_sun_is_north_in_south() {
        let noon = Utc.with_ymd_and_hms(2023, 1, 10, 0, 30, 0).unwrap();
        let sun = SunCalc.sun_position(noon, AUCKLAND);
        assert!(PI - sun.azimuth.abs() < 0.3, "azimuth {}", sun.azimuth);
    }

    #[test]
    fn test_morning_sun_is_east() {
        // West is positive, so the morning sun has negative azimuth.
        let morning = Utc.with_ymd_and_hms(2023, 3, 20, 8, 0, 0).unwrap();
        let sun = SunCalc.sun_position(morning, GeoPosition { lat: 48.0, long: 0.0 });
        assert!(sun.altitude > 0.0);
        assert!(sun.azimuth < 0.0 && sun.azimuth > -PI);
    }

    #[test]
    fn test_fixed_sun() {
        let d = Direction::new(0.3, 0.2);
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(FixedSun(d).sun_position(at, AUCKLAND), d);
    }
}
