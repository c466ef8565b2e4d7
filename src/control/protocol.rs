//! Control protocol framing and commands
//!
//! Each frame is one line: the base64 encoding of a JSON object. The object
//! carries an `action` naming the command and, optionally, an `id`. Frames
//! with an `id` get exactly one response frame echoing it; frames without one
//! are fire-and-forget.

use crate::error::ProtocolError;
use crate::state::DaemonState;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    SetVolume {
        volume: u32,
    },
    /// An empty profile disables keyboard sounds
    SetProfile {
        profile: String,
    },
    /// An empty profile disables mouse sounds
    SetMouseProfile {
        profile: String,
    },
    /// `semitones` is `"lo,hi"`; empty disables pitch shifting
    SetPitchShift {
        #[serde(default)]
        semitones: String,
        #[serde(default)]
        profile: Option<String>,
    },
    ShowDaemonWindow,
    GetStatus,
    SetEnabled {
        enabled: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetVolume { .. } => "set_volume",
            Command::SetProfile { .. } => "set_profile",
            Command::SetMouseProfile { .. } => "set_mouse_profile",
            Command::SetPitchShift { .. } => "set_pitch_shift",
            Command::ShowDaemonWindow => "show_daemon_window",
            Command::GetStatus => "get_status",
            Command::SetEnabled { .. } => "set_enabled",
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<Value>,
    pub command: Command,
}

/// A frame that decoded as JSON but not as a command
///
/// Keeps the id (if any) so the caller can still answer.
#[derive(Debug)]
pub struct RejectedFrame {
    pub id: Option<Value>,
    pub error: ProtocolError,
}

/// Decode base64 then JSON
pub fn decode_frame(line: &str) -> Result<Value, ProtocolError> {
    let bytes = STANDARD.decode(line.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encode a JSON value as a frame, without the trailing newline
pub fn encode_frame(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// Parse one line into a request
///
/// The outer error is for frames that are not even JSON objects; the inner
/// one for objects that are not a valid command.
pub fn parse_request(line: &str) -> Result<Result<Request, RejectedFrame>, ProtocolError> {
    let value = decode_frame(line)?;
    if !value.is_object() {
        return Err(ProtocolError::Command("frame is not a JSON object".to_string()));
    }

    let id = value.get("id").filter(|id| !id.is_null()).cloned();
    Ok(match serde_json::from_value::<Command>(value) {
        Ok(command) => Ok(Request { id, command }),
        Err(e) => Err(RejectedFrame {
            id,
            error: ProtocolError::Command(e.to_string()),
        }),
    })
}

/// Encode a request, attaching `id` when given
pub fn encode_request(command: &Command, id: Option<u64>) -> Result<String, ProtocolError> {
    let mut value = serde_json::to_value(command)?;
    if let (Some(id), Some(object)) = (id, value.as_object_mut()) {
        object.insert("id".to_string(), json!(id));
    }
    Ok(encode_frame(&value))
}

/// Success response, with the state record for status queries
pub fn ok_response(id: &Value, state: Option<&DaemonState>) -> Value {
    let mut response = json!({ "id": id, "status": "ok" });
    if let (Some(state), Some(object)) = (state, response.as_object_mut()) {
        object.insert("state".to_string(), json!(state));
    }
    response
}

pub fn error_response(id: &Value, error: &str) -> Value {
    json!({ "id": id, "error": error })
}
