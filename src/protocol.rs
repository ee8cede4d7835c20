//! Operator message protocol.
//!
//! Every message travels in an envelope `{"t": <type>, "d": <payload>}`. The
//! envelope is the only loosely typed form: the transport checks it is
//! well-formed, and the controller immediately decodes it into [`Inbound`].
//! Outbound messages are a closed enum serialized with the same envelope shape.
//!
//! # Message Flow
//!
//! ```text
//! operator ──text frame──> transport ──Envelope──> controller
//!                                                     │ Inbound::decode
//!                                                     ▼
//! operator <──text frame── fan-out <──Outbound──── handlers / tick
//! ```
//!
//! Example payloads:
//!
//! ```text
//! {"t":"UpdateConfig","d":{"loc":{"lat":-36.95,"long":174.77}}}
//! {"t":"MoveTargetRelative","d":{"direction":"left","radians":0.05}}
//! {"t":"Ack","d":{"success":true}}
//! ```

use crate::controller::ActiveConfig;
use crate::error::{HelioError, HelioResult};
use crate::geometry::{Direction, GeoPosition};
use crate::hardware::MachineStatus;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Raw message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    pub t: String,
    /// Type-specific payload. Clients that send raw bytes use `D` with a
    /// base64 string.
    #[serde(default, alias = "D")]
    pub d: serde_json::Value,
}

impl Envelope {
    /// Parse a text frame into an envelope.
    ///
    /// # Errors
    /// `MalformedMessage` for invalid JSON, a missing `t` or an empty tag.
    pub fn parse(text: &str) -> HelioResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| HelioError::MalformedMessage(format!("need valid json: {}", e)))?;
        if envelope.t.trim().is_empty() {
            return Err(HelioError::MalformedMessage(
                "missing message type (check \"t\" key)".to_string(),
            ));
        }
        Ok(envelope)
    }

    /// Interpret the payload as `T`.
    ///
    /// The payload is normally inline JSON. A string holding JSON text, or
    /// base64 of JSON bytes, is parsed as well. A missing payload reads as `{}`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.d {
            serde_json::Value::String(text) => match serde_json::from_str(text) {
                Ok(value) => Ok(value),
                Err(e) => match STANDARD.decode(text.trim()) {
                    Ok(bytes) => serde_json::from_slice(&bytes),
                    Err(_) => Err(e),
                },
            },
            serde_json::Value::Null => serde_json::from_value(serde_json::json!({})),
            value => T::deserialize(value),
        }
    }
}

/// `UpdateConfig` payload. Only the location is read; the other ActiveConfig
/// fields may be present and are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigUpdate {
    /// New observer location.
    pub loc: GeoPosition,
}

/// `MoveTargetRelative` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveTargetRelative {
    /// "up", "down", "left" or "right".
    pub direction: String,
    /// Step size in radians.
    #[serde(rename = "radians")]
    pub amount: f64,
}

/// `SetTime` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTime {
    /// New override time.
    pub datetime: DateTime<Utc>,
    /// Optional new time progression factor.
    #[serde(default)]
    pub progression_factor: Option<f64>,
}

/// `SetUpdateFreq` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetUpdateFreq {
    /// Tick period in seconds.
    pub period: f64,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Replace the location.
    UpdateConfig(ConfigUpdate),
    /// Request the active configuration.
    GetConfig,
    /// Nudge the target.
    MoveTargetRelative(MoveTargetRelative),
    /// Switch to a simulated clock.
    SetTime(SetTime),
    /// Return to the wall clock.
    ResetTime,
    /// Change the tick period.
    SetUpdateFreq(SetUpdateFreq),
    /// Request the target direction.
    GetTargetPosition,
}

impl Inbound {
    /// Decode an envelope into a typed message.
    ///
    /// # Errors
    /// - `UnhandledMessageType` for an unknown tag
    /// - `MalformedMessage` when the payload does not fit the tag
    pub fn decode(envelope: &Envelope) -> HelioResult<Self> {
        fn payload<T: DeserializeOwned>(envelope: &Envelope) -> HelioResult<T> {
            envelope.payload().map_err(|e| {
                HelioError::MalformedMessage(format!("bad {} payload: {}", envelope.t, e))
            })
        }

        match envelope.t.as_str() {
            "UpdateConfig" => Ok(Inbound::UpdateConfig(payload(envelope)?)),
            "GetConfig" => Ok(Inbound::GetConfig),
            "MoveTargetRelative" => Ok(Inbound::MoveTargetRelative(payload(envelope)?)),
            "SetTime" => Ok(Inbound::SetTime(payload(envelope)?)),
            "ResetTime" => Ok(Inbound::ResetTime),
            "SetUpdateFreq" => Ok(Inbound::SetUpdateFreq(payload(envelope)?)),
            "GetTargetPosition" => Ok(Inbound::GetTargetPosition),
            other => Err(HelioError::UnhandledMessageType(other.to_string())),
        }
    }
}

/// `Ack` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the request was applied.
    pub success: bool,
}

/// Sent whenever the mirror repositions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reposition {
    /// Active (possibly simulated) time of the move.
    pub time: DateTime<Utc>,
    /// Commanded azimuth axis, degrees.
    pub azi: f64,
    /// Commanded altitude axis, degrees.
    pub ele: f64,
}

/// Free-form notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Notice text.
    pub msg: String,
}

impl Status {
    /// Build a notice.
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// Outbound message, serialized as `{"t": <variant>, "d": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", content = "d")]
pub enum Outbound {
    /// Full active configuration.
    ActiveConfig(ActiveConfig),
    /// Acknowledgement of a request.
    Ack(Ack),
    /// Target direction (radians).
    TargetPosition(Direction),
    /// Mirror moved.
    Reposition(Reposition),
    /// Controller notice.
    Status(Status),
    /// Motion controller status report.
    DeviceStatus(MachineStatus),
    /// Error notice for the originating connection only.
    Error(Status),
}

impl Outbound {
    /// Positive or negative acknowledgement.
    pub fn ack(success: bool) -> Self {
        Outbound::Ack(Ack { success })
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"t":"Error","d":{{"msg":"failed to encode message: {}"}}}}"#, e)
        })
    }
}

/// Non-blocking handle for publishing outbound messages.
///
/// A full queue drops the message instead of stalling the caller, so the
/// control loop never waits on slow operators.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Outbound>,
}

impl Publisher {
    /// Create a publisher and the receiving end drained by the fan-out task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Publish without waiting. Returns whether the message was queued.
    pub fn publish(&self, msg: Outbound) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("Outbound queue full, dropping {:?}", msg);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed");
                false
            }
        }
    }
}
