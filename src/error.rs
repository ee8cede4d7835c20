//! Custom error types for the heliostat.
//!
//! This module defines the primary error type, `HelioError`, shared by the geometry
//! engine, the G-code encoder, the GRBL link and the controller. Using the `thiserror`
//! crate, it gives every layer one consistent vocabulary for failures, and lets the
//! controller decide in a single place which of them end the control loop.
//!
//! ## Error Hierarchy
//!
//! - **Recoverable per tick**: `OutOfRange`, `DegenerateGeometry`, `DeviceError`. The
//!   requested position cannot be commanded this cycle, but the link is still in sync.
//! - **Fatal to the control loop**: `ReadTimeout`, `Link`. The device state is unknown
//!   after a broken exchange, so no further command can be trusted.
//! - **Fatal at startup**: `NoDeviceFound`, `BannerMismatch`, `Config`, `Transport`.
//! - **Boundary-local**: `MalformedMessage`, `UnhandledMessageType`. Reported to the
//!   originator or logged, never fatal.

use thiserror::Error;

/// Convenience alias for results using the heliostat error type.
pub type HelioResult<T> = std::result::Result<T, HelioError>;

/// Primary error type for the heliostat.
#[derive(Error, Debug)]
pub enum HelioError {
    /// A computed or requested value lies outside the mechanical limits.
    ///
    /// **Error Type**: Recoverable - the affected cycle is skipped.
    #[error("{quantity} out of range: {value}")]
    OutOfRange {
        /// Which quantity failed validation (e.g. "azimuth").
        quantity: &'static str,
        /// The offending value.
        value: f64,
    },

    /// Sun and target are exactly opposed, so the bisector is undefined.
    #[error("degenerate geometry: zero-length vector has no direction")]
    DegenerateGeometry,

    /// The controller answered the command with something other than `ok`.
    ///
    /// **Error Type**: Recoverable - the device is alive and in sync.
    #[error("GRBL reports error: {0}")]
    DeviceError(String),

    /// No byte arrived from the serial port before the read timeout.
    ///
    /// **Error Type**: Fatal to the control loop.
    #[error("no bytes from GRBL before timeout")]
    ReadTimeout,

    /// The serial port failed while reading or writing.
    ///
    /// **Error Type**: Fatal to the control loop.
    #[error("serial link error: {0}")]
    Link(#[from] std::io::Error),

    /// A port answered the handshake without the firmware banner.
    #[error("no GRBL banner found, got: {0:?}")]
    BannerMismatch(String),

    /// Every enumerated port failed the handshake.
    #[error("could not find a serial port with GRBL's banner")]
    NoDeviceFound,

    /// Operator message could not be parsed as an envelope.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Operator message carried a tag with no handler.
    #[error("unhandled message type: {0}")]
    UnhandledMessageType(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Operator transport could not be started.
    #[error("transport error: {0}")]
    Transport(String),
}

impl HelioError {
    /// Whether the controller must stop commanding the mirror after this error.
    ///
    /// Only a broken exchange is fatal once running: the position the device
    /// actually reached is unknown. Geometry and encoding failures skip a tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HelioError::OutOfRange { .. }
                | HelioError::DegenerateGeometry
                | HelioError::DeviceError(_)
                | HelioError::MalformedMessage(_)
                | HelioError::UnhandledMessageType(_)
        )
    }
}

impl From<figment::Error> for HelioError {
    fn from(err: figment::Error) -> Self {
        HelioError::Config(Box::new(err))
    }
}
