use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-client call correlation number. Starts at 0 and is never reused.
pub type Marker = u64;

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(rename = "function_name")]
    pub procedure: String,
    #[serde(rename = "parameters_list")]
    pub arguments: Vec<Value>,
    pub marker: Marker,
}

impl CallEnvelope {
    pub fn new(procedure: impl Into<String>, arguments: Vec<Value>, marker: Marker) -> Self {
        Self {
            procedure: procedure.into(),
            arguments,
            marker,
        }
    }
}

/// A decoded server-to-client envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A (possibly partial) result.
    Success {
        marker: Marker,
        result: Value,
        terminal: bool,
    },
    /// An error reported by the server for this call.
    Failure {
        marker: Marker,
        error: Value,
        terminal: bool,
    },
}

impl Inbound {
    /// The marker this envelope answers.
    pub fn marker(&self) -> Marker {
        match self {
            Self::Success { marker, .. } | Self::Failure { marker, .. } => *marker,
        }
    }

    /// Whether this is the last envelope for its marker.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Success { terminal, .. } | Self::Failure { terminal, .. } => *terminal,
        }
    }
}
