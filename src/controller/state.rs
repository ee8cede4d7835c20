//! Controller state: the active configuration and the simulated clock.

use crate::geometry::{Direction, GeoPosition};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Observer location used until an operator sends `UpdateConfig`.
pub const DEFAULT_LOCATION: GeoPosition = GeoPosition {
    lat: -36.9565,
    long: 174.7777,
};

/// The controller's single mutable source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConfig {
    /// Multiplier applied to elapsed wall-clock time when advancing the
    /// override clock. 1.0 is real time, 0 freezes it.
    #[serde(rename = "progression_factor")]
    pub time_progression: f64,
    /// Simulated time used while override mode is on.
    pub override_time: DateTime<Utc>,
    /// Observer location, degrees.
    #[serde(rename = "loc")]
    pub location: GeoPosition,
    /// Mechanical azimuth zero compensation, degrees.
    #[serde(rename = "azimuth_offset")]
    pub azi_offset: f64,
    /// Mechanical altitude zero compensation, degrees.
    #[serde(rename = "altitude_offset")]
    pub alt_offset: f64,
    /// Where the reflected light should land, radians.
    pub target: Direction,
}

impl ActiveConfig {
    /// Defaults with the override clock starting at `now`.
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            time_progression: 1.0,
            override_time: now,
            location: DEFAULT_LOCATION,
            azi_offset: 0.0,
            alt_offset: 0.0,
            target: Direction::default(),
        }
    }
}

/// Wall clock bookkeeping and override mode flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    /// Wall-clock time at the last tick.
    pub local_time: DateTime<Utc>,
    /// When the clock was last advanced.
    pub last_update: DateTime<Utc>,
    /// Whether the override time is the active time.
    pub using_override_time: bool,
}

impl Clock {
    /// Real-time clock starting at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            local_time: now,
            last_update: now,
            using_override_time: false,
        }
    }

    /// Move the clock to `now`, advancing the override time by the elapsed
    /// wall-clock time scaled by the progression factor.
    pub fn advance(&mut self, now: DateTime<Utc>, config: &mut ActiveConfig) {
        let elapsed = now - self.last_update;
        let step = scale(elapsed, config.time_progression);
        match config.override_time.checked_add_signed(step) {
            Some(t) => config.override_time = t,
            None => warn!("Override time overflow, keeping {}", config.override_time),
        }
        self.local_time = now;
        self.last_update = now;
    }

    /// Time the sun position is computed for.
    pub fn active_time(&self, config: &ActiveConfig) -> DateTime<Utc> {
        if self.using_override_time {
            config.override_time
        } else {
            self.local_time
        }
    }
}

fn scale(elapsed: Duration, factor: f64) -> Duration {
    match elapsed.num_microseconds() {
        Some(us) => Duration::microseconds((us as f64 * factor) as i64),
        None => Duration::milliseconds((elapsed.num_milliseconds() as f64 * factor) as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 7, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ActiveConfig::starting_at(start());
        assert_eq!(config.time_progression, 1.0);
        assert_eq!(config.location, DEFAULT_LOCATION);
        assert_eq!(config.target, Direction::new(0.0, 0.0));
        assert_eq!(config.override_time, start());
    }

    #[test]
    fn test_json_keys() {
        let value = serde_json::to_value(ActiveConfig::starting_at(start())).unwrap();
        for key in [
            "progression_factor",
            "override_time",
            "loc",
            "azimuth_offset",
            "altitude_offset",
            "target",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert!(value["loc"].get("lat").is_some());
        assert!(value["target"].get("azi").is_some());
    }

    #[test]
    fn test_active_time_follows_mode() {
        let mut config = ActiveConfig::starting_at(start());
        config.override_time = start() - Duration::days(30);
        let mut clock = Clock::new(start());

        assert_eq!(clock.active_time(&config), start());
        clock.using_override_time = true;
        assert_eq!(clock.active_time(&config), start() - Duration::days(30));
    }

    #[test]
    fn test_override_advances_by_progression() {
        let mut config = ActiveConfig::starting_at(start());
        config.time_progression = 60.0;
        let mut clock = Clock::new(start());
        clock.using_override_time = true;

        clock.advance(start() + Duration::seconds(10), &mut config);
        assert_eq!(config.override_time, start() + Duration::minutes(10));
        assert_eq!(clock.local_time, start() + Duration::seconds(10));
    }

    #[test]
    fn test_zero_progression_freezes() {
        let mut config = ActiveConfig::starting_at(start());
        config.time_progression = 0.0;
        let mut clock = Clock::new(start());

        clock.advance(start() + Duration::hours(1), &mut config);
        assert_eq!(config.override_time, start());
    }
}
