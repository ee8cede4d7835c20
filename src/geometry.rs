//! Spherical geometry for pointing the mirror.
//!
//! A flat mirror reflects the sun onto a target when its normal bisects the angle
//! between the two directions. Both directions are turned into unit vectors, summed,
//! and the sum is converted back to azimuth/altitude.
//!
//! Conventions:
//! - Angles are radians.
//! - Azimuth lies on the horizon plane, measured from south toward west (the
//!   ephemeris convention), and is reported in (−π, π].
//! - Altitude is the elevation above the horizon; the polar angle used for the
//!   cartesian conversion is `π/2 − altitude`.

use crate::error::{HelioError, HelioResult};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Altitudes this far below the horizon are treated as floating-point noise.
pub const HORIZON_EPSILON: f64 = 1e-9;

/// Vectors shorter than this have no usable direction.
const DEGENERATE_NORM: f64 = 1e-12;

/// A direction on the sky, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Direction {
    /// Horizontal angle, south = 0, west positive.
    #[serde(rename = "azi")]
    pub azimuth: f64,
    /// Elevation above the horizon.
    #[serde(rename = "alt")]
    pub altitude: f64,
}

impl Direction {
    /// Create a direction from azimuth and altitude in radians.
    pub fn new(azimuth: f64, altitude: f64) -> Self {
        Self { azimuth, altitude }
    }

    /// Create a direction from azimuth and altitude in degrees.
    pub fn from_degrees(azimuth: f64, altitude: f64) -> Self {
        Self::new(azimuth.to_radians(), altitude.to_radians())
    }

    /// `(azimuth, altitude)` in degrees.
    pub fn to_degrees(self) -> (f64, f64) {
        (self.azimuth.to_degrees(), self.altitude.to_degrees())
    }
}

/// A point on the earth's surface, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Latitude, north positive.
    pub lat: f64,
    /// Longitude, east positive.
    pub long: f64,
}

/// Convert a direction at distance `r` into cartesian coordinates.
pub fn to_cartesian(direction: Direction, r: f64) -> Vector3<f64> {
    let polar = FRAC_PI_2 - direction.altitude;
    Vector3::new(
        r * direction.azimuth.cos() * polar.sin(),
        r * direction.azimuth.sin() * polar.sin(),
        r * polar.cos(),
    )
}

/// Convert a cartesian vector back into a direction.
///
/// # Errors
/// `DegenerateGeometry` when the vector has (near) zero length.
pub fn to_spherical(v: Vector3<f64>) -> HelioResult<Direction> {
    let r = v.norm();
    if r.is_nan() || r <= DEGENERATE_NORM {
        return Err(HelioError::DegenerateGeometry);
    }
    let azimuth = v.y.atan2(v.x);
    let altitude = FRAC_PI_2 - (v.z / r).clamp(-1.0, 1.0).acos();
    Ok(Direction::new(azimuth, altitude))
}

/// Direction the mirror normal must point to reflect the sun onto the target.
///
/// # Errors
/// - `DegenerateGeometry` if sun and target are exactly opposed.
/// - `OutOfRange` if the bisector lies below the horizon. Such a result is
///   rejected rather than floored to zero.
pub fn mirror_target(sun: Direction, target: Direction) -> HelioResult<Direction> {
    let sum = to_cartesian(sun, 1.0) + to_cartesian(target, 1.0);
    let mut mirror = to_spherical(sum)?;

    if mirror.altitude < 0.0 {
        if mirror.altitude < -HORIZON_EPSILON {
            return Err(HelioError::OutOfRange {
                quantity: "mirror altitude",
                value: mirror.altitude,
            });
        }
        mirror.altitude = 0.0;
    }
    mirror.altitude = mirror.altitude.min(FRAC_PI_2);

    Ok(mirror)
}

/// Wrap an angle into (−π, π].
pub fn wrap_pi(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_4;

    const TOL: f64 = 1e-9;

    #[test]
    fn test_spherical_round_trip() {
        let azimuths = [-3.0, -FRAC_PI_2, -0.2, 0.0, 0.7, FRAC_PI_2, 2.5, PI];
        let altitudes = [-1.5, -0.4, 0.0, 0.3, FRAC_PI_4, 1.2, 1.5];

        for &azi in &azimuths {
            for &alt in &altitudes {
                let d = to_spherical(to_cartesian(Direction::new(azi, alt), 1.0)).unwrap();
                assert_abs_diff_eq!(d.altitude, alt, epsilon = TOL);
                assert_abs_diff_eq!(wrap_pi(d.azimuth - azi), 0.0, epsilon = TOL);
            }
        }
    }

    #[test]
    fn test_to_spherical_zero_vector() {
        let result = to_spherical(Vector3::zeros());
        assert!(matches!(result, Err(HelioError::DegenerateGeometry)));
    }

    #[test]
    fn test_cartesian_radius() {
        let v = to_cartesian(Direction::new(1.0, 0.5), 3.0);
        assert_abs_diff_eq!(v.norm(), 3.0, epsilon = TOL);
    }

    #[test]
    fn test_bisector_of_direction_with_itself() {
        for d in [
            Direction::new(0.0, 0.0),
            Direction::new(1.1, 0.4),
            Direction::new(-2.9, 1.3),
            Direction::new(PI, FRAC_PI_4),
        ] {
            let m = mirror_target(d, d).unwrap();
            assert_abs_diff_eq!(m.altitude, d.altitude, epsilon = TOL);
            assert_abs_diff_eq!(wrap_pi(m.azimuth - d.azimuth), 0.0, epsilon = TOL);
        }
    }

    #[test]
    fn test_mirror_target_is_symmetric() {
        let a = Direction::new(0.8, 0.6);
        let b = Direction::new(-1.9, 0.1);
        let ab = mirror_target(a, b).unwrap();
        let ba = mirror_target(b, a).unwrap();
        assert_abs_diff_eq!(ab.azimuth, ba.azimuth, epsilon = TOL);
        assert_abs_diff_eq!(ab.altitude, ba.altitude, epsilon = TOL);
    }

    #[test]
    fn test_midpoint_on_horizon() {
        let sun = Direction::new(FRAC_PI_2, 0.0);
        let target = Direction::new(0.0, 0.0);
        let m = mirror_target(sun, target).unwrap();
        assert_abs_diff_eq!(m.azimuth, FRAC_PI_4, epsilon = TOL);
        assert_abs_diff_eq!(m.altitude, 0.0, epsilon = TOL);
        assert!(m.altitude >= 0.0);
    }

    #[test]
    fn test_sun_overhead_target_on_horizon() {
        let sun = Direction::new(0.0, FRAC_PI_2);
        let target = Direction::new(0.0, 0.0);
        let m = mirror_target(sun, target).unwrap();
        assert_abs_diff_eq!(m.azimuth, 0.0, epsilon = TOL);
        assert_abs_diff_eq!(m.altitude, FRAC_PI_4, epsilon = TOL);
    }

    #[test]
    fn test_opposed_directions_are_degenerate() {
        let sun = Direction::new(0.0, 0.0);
        let target = Direction::new(PI, 0.0);
        assert!(matches!(
            mirror_target(sun, target),
            Err(HelioError::DegenerateGeometry)
        ));
    }

    #[test]
    fn test_bisector_below_horizon_is_rejected() {
        // Sun well below the horizon pulls the bisector under it.
        let sun = Direction::new(0.0, -1.0);
        let target = Direction::new(0.0, 0.1);
        match mirror_target(sun, target) {
            Err(HelioError::OutOfRange { quantity, value }) => {
                assert_eq!(quantity, "mirror altitude");
                assert!(value < 0.0);
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_wrap_pi() {
        assert_abs_diff_eq!(wrap_pi(PI), PI, epsilon = TOL);
        assert_abs_diff_eq!(wrap_pi(-PI), PI, epsilon = TOL);
        assert_abs_diff_eq!(wrap_pi(7.0 * FRAC_PI_4), -FRAC_PI_4, epsilon = TOL);
        assert_abs_diff_eq!(wrap_pi(-5.0 * FRAC_PI_4), 3.0 * FRAC_PI_4, epsilon = TOL);
        assert_abs_diff_eq!(wrap_pi(5.0 * TAU + 0.25), 0.25, epsilon = TOL);
    }

    #[test]
    fn test_direction_serde_keys() {
        let json = serde_json::to_value(Direction::new(0.5, 0.25)).unwrap();
        assert_eq!(json["azi"], 0.5);
        assert_eq!(json["alt"], 0.25);
    }
}
