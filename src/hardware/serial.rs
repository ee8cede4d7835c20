//! Serial Port Abstractions
//!
//! Shared types for async serial communication with the motion controller.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`list_ports`]: Enumerate the serial ports present on this machine
//!
//! # Example
//!
//! ```rust,ignore
//! use heliostat::hardware::serial::open_serial_async;
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115200).await?;
//! let link = GrblLink::connect("/dev/ttyUSB0".into(), Box::new(port), settings).await?;
//! ```

use crate::error::{HelioError, HelioResult};
use tokio::io::{AsyncRead, AsyncWrite};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - `tokio_test::io::Mock` (scripted testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns `Link` if the port cannot be opened.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> HelioResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HelioError::Link(std::io::Error::from(e)))
    })
    .await
    .map_err(|e| HelioError::Link(std::io::Error::other(e)))?
}

/// Description of a serial port found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS path of the port (e.g. "/dev/ttyACM0", "COM3").
    pub name: String,
    /// Human readable kind (USB vendor/product when known).
    pub kind: String,
}

/// Enumerate available serial ports.
pub fn list_ports() -> HelioResult<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| HelioError::Link(e.into()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => "unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                kind,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dyn_serial_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynSerial = Box::new(device);

        host.write_all(b"Grbl\r\n").await.unwrap();

        let mut buf = [0u8; 6];
        port.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Grbl\r\n");
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let result = open_serial_async("/dev/does-not-exist-heliostat", 115200).await;
        assert!(matches!(result, Err(HelioError::Link(_))));
    }
}
