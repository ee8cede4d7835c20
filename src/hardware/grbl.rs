//! GRBL Motion Controller Link
//!
//! Reference: GRBL v1.1 interface documentation
//!
//! Protocol Overview:
//! - Format: ASCII command/response over USB serial
//! - Baud: 115200, 8N1, no flow control
//! - Responses terminated by `\r\n`
//! - Startup banner: `Grbl 1.1h ['$' for help]`
//! - Each G-code line is answered by `ok` or `error:<code>`
//! - Real-time status query: the single byte `?`, answered by
//!   `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`
//!
//! The wire is strictly half-duplex request/response. Every exchange holds the
//! port mutex from the first written byte until the last response byte is read,
//! so a status poll can never split a command from its acknowledgement.
//!
//! # Example Usage
//!
//! ```no_run
//! use heliostat::hardware::grbl::{discover, LinkSettings};
//! use heliostat::hardware::capabilities::MotionLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = discover(&LinkSettings::default()).await?;
//!     link.send_command_get_response(b"G0 X10.0000 Y20.0000\n").await?;
//!     let status = link.get_status().await?;
//!     println!("{}", String::from_utf8_lossy(&status).trim());
//!     Ok(())
//! }
//! ```

use crate::error::{HelioError, HelioResult};
use crate::hardware::capabilities::MotionLink;
use crate::hardware::serial::{list_ports, open_serial_async, DynSerial};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Line terminator used by GRBL responses.
pub const LINE_TERMINATOR: &[u8; 2] = b"\r\n";

/// Acknowledgement line for an accepted command.
pub const OK_LINE: &[u8] = b"ok\r\n";

/// Sequence written to wake the controller before reading the banner.
pub const WAKE_SEQUENCE: &[u8] = b"\r\n\r\n";

/// Real-time status query byte (sent without a terminator).
pub const STATUS_QUERY: u8 = b'?';

/// How a command's response lines are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFraming {
    /// One line: exactly `ok` is success, anything else is an error.
    #[default]
    OkLine,
    /// A payload line followed by a status line; only the status decides
    /// success and the payload is returned.
    PayloadThenStatus,
}

/// Connection parameters for the GRBL link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// Fixed serial port path. `None` scans every port.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Maximum wait for each response byte.
    pub read_timeout: Duration,
    /// Pause after the wake sequence before reading the banner.
    pub settle: Duration,
    /// Substring identifying the firmware banner.
    pub banner: String,
    /// Response framing.
    pub framing: ResponseFraming,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(2),
            settle: Duration::from_secs(2),
            banner: "Grbl".to_string(),
            framing: ResponseFraming::OkLine,
        }
    }
}

/// Read one `\r\n` terminated line, one byte at a time.
///
/// Lines consisting only of the terminator are discarded (GRBL emits blank
/// lines around its banner). The returned line includes the terminator.
///
/// # Errors
/// - `ReadTimeout` when a read returns zero bytes or no byte arrives within
///   `timeout`
/// - `Link` on an I/O error
pub async fn read_line<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> HelioResult<Vec<u8>> {
    let mut byte = [0u8; 1];
    let mut line = Vec::with_capacity(80);

    loop {
        let n = tokio::time::timeout(timeout, reader.read(&mut byte))
            .await
            .map_err(|_| HelioError::ReadTimeout)??;
        if n == 0 {
            return Err(HelioError::ReadTimeout);
        }

        line.push(byte[0]);
        if line.ends_with(LINE_TERMINATOR) {
            if line.len() == LINE_TERMINATOR.len() {
                line.clear();
                continue;
            }
            return Ok(line);
        }
    }
}

/// Live connection to a GRBL controller.
pub struct GrblLink {
    /// Serial port protected by Mutex for exclusive access; `None` once closed
    port: Mutex<Option<DynSerial>>,
    port_name: String,
    settings: LinkSettings,
}

impl GrblLink {
    /// Wrap an already opened port without handshaking.
    pub fn from_port(port_name: String, port: DynSerial, settings: LinkSettings) -> Self {
        Self {
            port: Mutex::new(Some(port)),
            port_name,
            settings,
        }
    }

    /// Wrap an opened port and verify the firmware banner.
    ///
    /// # Errors
    /// `BannerMismatch` if the first line does not contain the banner, or the
    /// read error that prevented reading it.
    pub async fn connect(
        port_name: String,
        port: DynSerial,
        settings: LinkSettings,
    ) -> HelioResult<Self> {
        let link = Self::from_port(port_name, port, settings);
        let banner = link.handshake().await?;
        info!(
            port = %link.port_name,
            banner = %String::from_utf8_lossy(&banner).trim(),
            "Connected to GRBL"
        );
        Ok(link)
    }

    /// Link settings in use.
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Wake the controller and read its banner line.
    #[instrument(skip(self), fields(port = %self.port_name), err)]
    pub async fn handshake(&self) -> HelioResult<Vec<u8>> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or_else(not_connected)?;

        port.write_all(WAKE_SEQUENCE).await?;
        port.flush().await?;
        tokio::time::sleep(self.settings.settle).await;

        let line = read_line(port, self.settings.read_timeout).await?;
        if String::from_utf8_lossy(&line).contains(&self.settings.banner) {
            Ok(line)
        } else {
            Err(HelioError::BannerMismatch(
                String::from_utf8_lossy(&line).trim().to_string(),
            ))
        }
    }
}

fn not_connected() -> HelioError {
    HelioError::Link(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "GRBL link is closed",
    ))
}

#[async_trait]
impl MotionLink for GrblLink {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    #[instrument(skip(self, command), fields(port = %self.port_name, command = %String::from_utf8_lossy(command).trim()), err)]
    async fn send_command_get_response(&self, command: &[u8]) -> HelioResult<Vec<u8>> {
        if command.is_empty() {
            warn!("need a command to send to GRBL, got nothing");
            return Ok(Vec::new());
        }

        // Only one reader/writer at a time or responses get confused
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or_else(not_connected)?;

        port.write_all(command).await?;
        port.flush().await?;

        let timeout = self.settings.read_timeout;
        match self.settings.framing {
            ResponseFraming::OkLine => {
                let line = read_line(port, timeout).await?;
                if line == OK_LINE {
                    Ok(line)
                } else {
                    Err(HelioError::DeviceError(
                        String::from_utf8_lossy(&line).trim().to_string(),
                    ))
                }
            }
            ResponseFraming::PayloadThenStatus => {
                let payload = read_line(port, timeout).await?;
                let status = read_line(port, timeout).await?;
                if status == OK_LINE {
                    Ok(payload)
                } else {
                    Err(HelioError::DeviceError(
                        String::from_utf8_lossy(&status).trim().to_string(),
                    ))
                }
            }
        }
    }

    #[instrument(skip(self), fields(port = %self.port_name), level = "debug", err)]
    async fn get_status(&self) -> HelioResult<Vec<u8>> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or_else(not_connected)?;

        port.write_all(&[STATUS_QUERY]).await?;
        port.flush().await?;
        read_line(port, self.settings.read_timeout).await
    }

    async fn close(&self) -> HelioResult<()> {
        let mut guard = self.port.lock().await;
        if let Some(mut port) = guard.take() {
            if let Err(e) = port.shutdown().await {
                debug!(port = %self.port_name, "Error shutting down serial port: {}", e);
            }
            info!(port = %self.port_name, "GRBL link closed");
        }
        Ok(())
    }
}

/// Open `port_name`, read its banner and close it again.
///
/// # Errors
/// The open or handshake failure.
pub async fn probe(port_name: &str, settings: &LinkSettings) -> HelioResult<String> {
    let port = open_serial_async(port_name, settings.baud_rate).await?;
    let link = GrblLink::from_port(port_name.to_string(), Box::new(port), settings.clone());
    let banner = link.handshake().await;
    link.close().await?;
    Ok(String::from_utf8_lossy(&banner?).trim().to_string())
}

/// Find the GRBL controller and return a ready link.
///
/// With a fixed port in `settings` only that port is tried. Otherwise every
/// enumerated port is opened in turn and handshaken; ports that fail are
/// closed and skipped.
///
/// # Errors
/// `NoDeviceFound` when no port produced the banner.
pub async fn discover(settings: &LinkSettings) -> HelioResult<GrblLink> {
    let candidates = match &settings.port {
        Some(port) => vec![port.clone()],
        None => list_ports()?.into_iter().map(|p| p.name).collect(),
    };

    if candidates.is_empty() {
        warn!("No serial ports available, is GRBL connected?");
        return Err(HelioError::NoDeviceFound);
    }

    for name in candidates {
        info!(port = %name, "Checking port for GRBL banner");

        let port = match open_serial_async(&name, settings.baud_rate).await {
            Ok(port) => port,
            Err(e) => {
                warn!(port = %name, "Error opening port: {}", e);
                continue;
            }
        };

        match GrblLink::connect(name.clone(), Box::new(port), settings.clone()).await {
            Ok(link) => return Ok(link),
            Err(e) => warn!(port = %name, "Error detecting banner: {}", e),
        }
    }

    Err(HelioError::NoDeviceFound)
}

/// Parsed real-time status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    /// Machine state (Idle, Run, Hold, Alarm, ...).
    pub state: String,
    /// Machine position of the X, Y, Z axes when reported.
    pub mpos: Option<[f64; 3]>,
}

impl MachineStatus {
    /// Parse a status report such as `<Idle|MPos:1.000,2.000,0.000|FS:0,0>`.
    ///
    /// Accepts both the v1.1 (`|` separated) and v0.9 (`,` separated) layouts.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(line);
        let body = text.trim().strip_prefix('<')?.strip_suffix('>')?;

        let state_end = body.find(['|', ',']).unwrap_or(body.len());
        let state = body[..state_end].to_string();
        if state.is_empty() {
            return None;
        }

        let mpos = body.find("MPos:").and_then(|start| {
            let rest = &body[start + "MPos:".len()..];
            let rest = rest.split('|').next().unwrap_or_default();
            let values: Vec<f64> = rest
                .split(',')
                .take(3)
                .map(str::parse)
                .collect::<Result<_, _>>()
                .ok()?;
            <[f64; 3]>::try_from(values).ok()
        });

        Some(Self { state, mpos })
    }
}
