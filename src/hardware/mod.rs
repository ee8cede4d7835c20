//! Motion hardware
//!
//! - `capabilities`: the `MotionLink` trait the controller drives
//! - `gcode`: turns a mirror direction into a motion command
//! - `grbl`: serial link to a GRBL controller (discovery, handshake, exchanges)
//! - `serial`: async serial port helpers
//! - `mock`: in-memory link for tests

pub mod capabilities;
pub mod gcode;
pub mod grbl;
pub mod mock;
pub mod serial;

pub use capabilities::MotionLink;
pub use grbl::{discover, probe, GrblLink, LinkSettings, MachineStatus, ResponseFraming};
