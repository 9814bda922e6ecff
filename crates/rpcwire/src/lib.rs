//! Reconnecting, multiplexing JSON RPC client over WebSocket.
//!
//! rpcwire keeps one duplex connection to an RPC server, matches replies to
//! calls by marker, caches results, queues calls while offline and recovers
//! from connection loss with quadratic backoff.
//!
//! # Crate Structure
//!
//! - [`client`]: the client, its engine and call handles
//! - [`transport`]: address validation and the link/probe capabilities
//! - [`frame`]: wire envelopes and the inbound decoder
//! - [`schema`]: optional per-procedure result contracts (behind `schema` feature)

pub use rpcwire_client::{
    CallHandle, Client, ClientBuilder, ClientConfig, ClientError, ClientEvent, ConnectionState,
    DisconnectReason, EventKind, Result, NO_ARGS,
};

/// Re-export client types.
pub mod client {
    pub use rpcwire_client::*;
}

/// Re-export transport types.
pub mod transport {
    pub use rpcwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rpcwire_frame::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use rpcwire_schema::*;
}
