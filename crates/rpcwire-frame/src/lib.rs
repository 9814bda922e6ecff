//! JSON envelope codec for rpcwire.
//!
//! Every call travels as one JSON text frame:
//! - client to server: `{"function_name", "parameters_list", "marker"}`
//! - server to client: `{"result", "marker", "eod"}` or `{"error", "marker"}`
//!
//! Inbound frames are decoded into a tagged [`Inbound`] value at the boundary,
//! so nothing past this crate inspects raw JSON shapes.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{decode_inbound, encode_call, identity_key, FrameConfig, DEFAULT_MAX_PAYLOAD};
pub use envelope::{CallEnvelope, Inbound, Marker};
pub use error::{FrameError, Result};
