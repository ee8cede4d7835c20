//! G-code motion commands for the two-axis mount.
//!
//! Protocol Overview:
//! - X axis: azimuth in degrees, signed, [-180, 180]
//! - Y axis: altitude in degrees, [0, 90]
//! - Format: `G0 X{azi} Y{alt}\n` (rapid move to an absolute position)
//!
//! The mechanical offsets compensate for the mirror's zero position not facing
//! true south at the horizon.

use crate::error::{HelioError, HelioResult};

/// Lowest commandable altitude (degrees).
pub const MIN_ALTITUDE_DEG: f64 = 0.0;
/// Highest commandable altitude (degrees).
pub const MAX_ALTITUDE_DEG: f64 = 90.0;
/// Azimuth limit on either side of south (degrees).
pub const AZIMUTH_LIMIT_DEG: f64 = 180.0;

/// Axis position after offsets, wrap and clamp, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTarget {
    /// X axis (azimuth).
    pub azimuth: f64,
    /// Y axis (altitude).
    pub altitude: f64,
}

impl AxisTarget {
    /// Render as a G-code line.
    pub fn to_gcode(self) -> String {
        format!("G0 X{:.4} Y{:.4}\n", self.azimuth, self.altitude)
    }
}

/// Apply offsets, wrap azimuth and clamp altitude.
///
/// # Errors
/// `OutOfRange` when a value is still outside the mechanical range after the
/// single wrap step (e.g. a huge offset) or is not a number.
pub fn resolve_axes(
    mirror_azi_deg: f64,
    mirror_alt_deg: f64,
    azi_offset_deg: f64,
    alt_offset_deg: f64,
) -> HelioResult<AxisTarget> {
    let mut azimuth = mirror_azi_deg - azi_offset_deg;
    if azimuth > AZIMUTH_LIMIT_DEG {
        azimuth -= 360.0;
    } else if azimuth < -AZIMUTH_LIMIT_DEG {
        azimuth += 360.0;
    }

    // Hard mechanical limits, not an error.
    let mut altitude = mirror_alt_deg - alt_offset_deg;
    if altitude > MAX_ALTITUDE_DEG {
        altitude = MAX_ALTITUDE_DEG;
    } else if altitude < MIN_ALTITUDE_DEG {
        altitude = MIN_ALTITUDE_DEG;
    }

    if !(-AZIMUTH_LIMIT_DEG..=AZIMUTH_LIMIT_DEG).contains(&azimuth) {
        return Err(HelioError::OutOfRange {
            quantity: "azimuth",
            value: azimuth,
        });
    }
    if !(MIN_ALTITUDE_DEG..=MAX_ALTITUDE_DEG).contains(&altitude) {
        return Err(HelioError::OutOfRange {
            quantity: "altitude",
            value: altitude,
        });
    }

    Ok(AxisTarget {
        azimuth: positive_zero(azimuth),
        altitude: positive_zero(altitude),
    })
}

/// Encode a mirror direction (degrees) as a motion command.
pub fn encode(
    mirror_azi_deg: f64,
    mirror_alt_deg: f64,
    azi_offset_deg: f64,
    alt_offset_deg: f64,
) -> HelioResult<Vec<u8>> {
    let axes = resolve_axes(mirror_azi_deg, mirror_alt_deg, azi_offset_deg, alt_offset_deg)?;
    Ok(axes.to_gcode().into_bytes())
}

// -0.0 would print as "-0.0000"
fn positive_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}
