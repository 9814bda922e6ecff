use serde_json::{json, Map, Value};

use crate::envelope::{CallEnvelope, Inbound, Marker};
use crate::error::{FrameError, Result};

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Configuration for the envelope codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum frame size in bytes, applied in both directions. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Serialize a call envelope into its wire text.
pub fn encode_call(envelope: &CallEnvelope, max_payload: usize) -> Result<String> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: text.len(),
            max: max_payload,
        });
    }
    Ok(text)
}

/// Decode one server-to-client frame.
///
/// Wire format:
/// ```text
/// success: {"result": <json>, "marker": <u64>, "eod": 0|1}
/// failure: {"error":  <json>, "marker": <u64>}
/// ```
/// A success without `eod` is a partial result. A failure ends the call unless
/// it explicitly carries `"eod": 0`.
pub fn decode_inbound(text: &str, max_payload: usize) -> Result<Inbound> {
    if text.len() > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: text.len(),
            max: max_payload,
        });
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut fields) = value else {
        return Err(malformed("envelope is not a JSON object"));
    };

    let marker = marker_of(&fields)?;
    let eod = eod_of(&fields)?;

    match (fields.remove("result"), fields.remove("error")) {
        (Some(result), None) => Ok(Inbound::Success {
            marker,
            result,
            terminal: eod.unwrap_or(false),
        }),
        (None, Some(error)) => Ok(Inbound::Failure {
            marker,
            error,
            terminal: eod.unwrap_or(true),
        }),
        (Some(_), Some(_)) => Err(malformed("envelope carries both result and error")),
        (None, None) => Err(malformed("envelope carries neither result nor error")),
    }
}

/// Canonical cache key for a call: procedure name plus ordered arguments.
///
/// Computed before a marker is attached, so identical calls share a key.
pub fn identity_key(procedure: &str, arguments: &[Value]) -> String {
    json!([procedure, arguments]).to_string()
}

fn marker_of(fields: &Map<String, Value>) -> Result<Marker> {
    match fields.get("marker") {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| malformed(&format!("marker {value} is not a non-negative integer"))),
        None => Err(malformed("envelope has no marker")),
    }
}

fn eod_of(fields: &Map<String, Value>) -> Result<Option<bool>> {
    match fields.get("eod") {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(malformed(&format!("eod {value} is not 0 or 1"))),
        },
    }
}

fn malformed(reason: &str) -> FrameError {
    FrameError::Malformed(reason.to_string())
}
