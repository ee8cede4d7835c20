//! Hardware capabilities used by the controller.
//!
//! The controller never touches a serial port directly. It drives the mount
//! through [`MotionLink`], so the GRBL link and the in-memory mock are
//! interchangeable.
//!
//! # Contract
//! - Exchanges are strictly request/response and never interleave on the wire.
//! - Errors are reported once; implementations never retry.
//! - All methods take `&self`; implementations use interior mutability.

use crate::error::HelioResult;
use async_trait::async_trait;

/// Capability: command/response exchange with a motion controller.
#[async_trait]
pub trait MotionLink: Send + Sync {
    /// Identity of the connected device (serial port path for real hardware).
    fn port_name(&self) -> &str;

    /// Send one command and wait for its correlated response.
    ///
    /// # Returns
    /// - Ok(payload) when the device accepted the command
    /// - `DeviceError` when the device answered with an error line
    /// - `ReadTimeout` / `Link` when the exchange broke
    async fn send_command_get_response(&self, command: &[u8]) -> HelioResult<Vec<u8>>;

    /// Query the real-time status report.
    async fn get_status(&self) -> HelioResult<Vec<u8>>;

    /// Close the connection. Later exchanges fail.
    async fn close(&self) -> HelioResult<()>;
}
