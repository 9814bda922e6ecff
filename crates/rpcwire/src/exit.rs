use std::fmt;
use std::io;

use rpcwire_client::{ClientError, DisconnectReason};
use rpcwire_frame::FrameError;
use rpcwire_schema::SchemaError;
use rpcwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROBE_UNREACHABLE: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match err {
        TransportError::InvalidAddress { .. } => USAGE,
        TransportError::Connect { .. } | TransportError::Closed => TRANSPORT_ERROR,
        TransportError::Unsupported(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn schema_error(context: &str, err: SchemaError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::Schema(err) => schema_error(context, err),
        ClientError::Shutdown => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Exit code for a client that stopped before the call finished.
pub fn disconnect_code(reason: DisconnectReason) -> i32 {
    match reason {
        DisconnectReason::Unauthorized => PERMISSION_DENIED,
        DisconnectReason::RetriesExhausted { .. } => TRANSPORT_ERROR,
        DisconnectReason::Requested => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_address_is_a_usage_error() {
        let err = transport_error(
            "bad url",
            TransportError::InvalidAddress {
                address: "http://h".into(),
                reason: "wrong scheme".into(),
            },
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("bad url: "));
    }

    #[test]
    fn client_errors_map_through_their_source() {
        let err = client_error(
            "call failed",
            ClientError::Frame(FrameError::PayloadTooLarge { size: 10, max: 1 }),
        );
        assert_eq!(err.code, DATA_INVALID);
        assert_eq!(client_error("x", ClientError::NoRuntime).code, INTERNAL);
        assert_eq!(client_error("x", ClientError::Shutdown).code, FAILURE);
    }

    #[test]
    fn disconnect_reasons_have_distinct_codes() {
        assert_eq!(disconnect_code(DisconnectReason::Unauthorized), 50);
        assert_eq!(
            disconnect_code(DisconnectReason::RetriesExhausted { attempts: 5 }),
            3
        );
        assert_eq!(disconnect_code(DisconnectReason::Requested), 1);
    }
}
