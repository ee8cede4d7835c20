//! # Heliostat Control Library
//!
//! Keeps a two-axis mirror pointed so that sunlight is reflected onto a fixed
//! target. The sun position comes from an ephemeris, the mirror normal is the
//! bisector of the sun and target directions, and the resulting axis angles are
//! sent as G-code to a GRBL motion controller over serial. Operators watch and
//! adjust the system through a websocket.
//!
//! ## Crate Structure
//!
//! - **`geometry`**: spherical/cartesian conversions and the mirror bisector.
//! - **`ephemeris`**: the `SunEphemeris` trait and its suncalc-backed implementation.
//! - **`hardware`**: the `MotionLink` capability, the GRBL serial link, the G-code
//!   encoder and an in-memory mock.
//! - **`controller`**: the control loop owning the ActiveConfig, plus the status poller.
//! - **`protocol`**: the operator message envelope and typed inbound/outbound messages.
//! - **`transport`**: the websocket server and the subscriber fan-out.
//! - **`config`**: layered service settings (Figment).
//! - **`logging`**: tracing subscriber setup.
//! - **`shutdown`**: the process-wide shutdown signal.
//! - **`error`**: the `HelioError` enum shared by every layer.

pub mod config;
pub mod controller;
pub mod ephemeris;
pub mod error;
pub mod geometry;
pub mod hardware;
pub mod logging;
pub mod protocol;
pub mod shutdown;
pub mod transport;

pub use error::{HelioError, HelioResult};
