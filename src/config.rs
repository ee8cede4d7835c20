//! Service configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `heliostat.toml` in the working directory (or the file given with `--config`)
//! 3. Environment variables prefixed with `HELIOSTAT_`, nested keys split on `__`
//!    (e.g. `HELIOSTAT_LINK__PORT=/dev/ttyUSB0`)
//!
//! These settings describe the service itself. The mirror's ActiveConfig
//! (location, target, offsets, clock) always starts from its defaults and is
//! changed through operator messages.
//!
//! # Example
//! ```no_run
//! use heliostat::config::Settings;
//!
//! let settings = Settings::load(None)?;
//! println!("Listening on {}", settings.transport.listen);
//! # Ok::<(), heliostat::error::HelioError>(())
//! ```

use crate::controller::ControllerSettings;
use crate::error::{HelioError, HelioResult};
use crate::hardware::{LinkSettings, ResponseFraming};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_8;
use std::path::Path;
use std::time::Duration;

/// Config file read when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "heliostat.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HELIOSTAT_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the motion controller
    pub link: LinkConfig,
    /// Control loop tuning
    pub controller: ControllerConfig,
    /// Operator websocket
    pub transport: TransportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "heliostat".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Motion link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Fixed serial port. Unset scans every port for the banner.
    pub port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Per-byte read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Pause after waking the controller, in milliseconds
    pub settle_ms: u64,
    /// Banner substring identifying the firmware
    pub banner: String,
    /// Response framing
    pub framing: ResponseFraming,
    /// Status poll period in milliseconds (0 disables polling)
    pub status_poll_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 2_000,
            settle_ms: 2_000,
            banner: "Grbl".to_string(),
            framing: ResponseFraming::OkLine,
            status_poll_ms: 1_000,
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between repositioning ticks
    pub update_period_secs: f64,
    /// Largest `MoveTargetRelative` step in radians
    pub max_target_step_rad: f64,
    /// Inbound operator message queue size
    pub inbound_capacity: usize,
    /// Outbound publish queue size
    pub outbound_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            update_period_secs: 30.0,
            max_target_step_rad: FRAC_PI_8,
            inbound_capacity: 32,
            outbound_capacity: 64,
        }
    }
}

/// Operator transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Listen address for the websocket server
    pub listen: String,
    /// Per-connection outbound queue size
    pub client_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            client_queue: 32,
        }
    }
}

impl Settings {
    /// Load and validate settings.
    ///
    /// With `None` the default file is read if present. An explicitly given
    /// file must exist.
    pub fn load(path: Option<&Path>) -> HelioResult<Self> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(HelioError::Configuration(format!(
                    "config file {} not found",
                    p.display()
                )))
            }
            Some(p) => p,
            None => Path::new(DEFAULT_CONFIG_FILE),
        };

        let settings: Settings = Self::figment(file).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Layered provider chain for `file`.
    pub fn figment<P: AsRef<Path>>(file: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HelioResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(HelioError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.link.baud_rate == 0 {
            return Err(invalid("link.baud_rate must be positive"));
        }
        if self.link.read_timeout_ms == 0 {
            return Err(invalid("link.read_timeout_ms must be positive"));
        }
        if self.link.banner.trim().is_empty() {
            return Err(invalid("link.banner must not be empty"));
        }
        if matches!(&self.link.port, Some(p) if p.trim().is_empty()) {
            return Err(invalid("link.port must not be empty when set"));
        }

        let period = self.controller.update_period_secs;
        if !period.is_finite() || period <= 0.0 {
            return Err(HelioError::Configuration(format!(
                "controller.update_period_secs must be positive, got {}",
                period
            )));
        }
        let step = self.controller.max_target_step_rad;
        if !step.is_finite() || step <= 0.0 {
            return Err(HelioError::Configuration(format!(
                "controller.max_target_step_rad must be positive, got {}",
                step
            )));
        }
        if self.controller.inbound_capacity == 0 || self.controller.outbound_capacity == 0 {
            return Err(invalid("controller queue capacities must be positive"));
        }

        if self.transport.listen.trim().is_empty() {
            return Err(invalid("transport.listen must not be empty"));
        }
        if self.transport.client_queue == 0 {
            return Err(invalid("transport.client_queue must be positive"));
        }

        Ok(())
    }

    /// Settings for opening the motion link.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            port: self.link.port.clone(),
            baud_rate: self.link.baud_rate,
            read_timeout: Duration::from_millis(self.link.read_timeout_ms),
            settle: Duration::from_millis(self.link.settle_ms),
            banner: self.link.banner.clone(),
            framing: self.link.framing,
        }
    }

    /// Settings for the control loop.
    pub fn controller_settings(&self) -> HelioResult<ControllerSettings> {
        let update_period = Duration::try_from_secs_f64(self.controller.update_period_secs)
            .map_err(|e| HelioError::Configuration(format!("update_period_secs: {}", e)))?;
        Ok(ControllerSettings {
            update_period,
            max_target_step: self.controller.max_target_step_rad,
        })
    }

    /// Status poll period, `None` when polling is disabled.
    pub fn status_poll_period(&self) -> Option<Duration> {
        match self.link.status_poll_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn invalid(msg: &str) -> HelioError {
    HelioError::Configuration(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.link.baud_rate, 115_200);
        assert_eq!(
            settings.controller_settings().unwrap().update_period,
            Duration::from_secs(30)
        );
        assert_eq!(settings.status_poll_period(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[link]
port = "/dev/ttyACM0"
framing = "payload_then_status"
status_poll_ms = 0

[controller]
update_period_secs = 5.0
"#
        )
        .unwrap();

        let settings = Settings::figment(file.path()).extract::<Settings>().unwrap();
        assert_eq!(settings.link.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(settings.link.framing, ResponseFraming::PayloadThenStatus);
        assert_eq!(settings.status_poll_period(), None);
        assert_eq!(settings.controller.update_period_secs, 5.0);
        // untouched sections keep their defaults
        assert_eq!(settings.transport, TransportConfig::default());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = Settings::load(Some(Path::new("/nonexistent/heliostat.toml")));
        assert!(matches!(result, Err(HelioError::Configuration(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_update_period() {
        let mut settings = Settings::default();
        settings.controller.update_period_secs = 0.0;
        assert!(settings.validate().is_err());
        settings.controller.update_period_secs = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_link_settings_conversion() {
        let settings = Settings::default();
        let link = settings.link_settings();
        assert_eq!(link.read_timeout, Duration::from_secs(2));
        assert_eq!(link.banner, "Grbl");
        assert_eq!(link.port, None);
    }
}
