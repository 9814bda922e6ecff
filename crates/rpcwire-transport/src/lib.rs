//! Duplex link and diagnostic probe capabilities.
//!
//! This is the lowest layer of rpcwire. The client never talks to a socket
//! directly; it consumes two small capabilities defined here:
//! - [`Connector`]: opens a message-oriented duplex [`Link`]
//! - [`Prober`]: performs the one-shot request/response diagnostic probe
//!
//! Real implementations live behind features (`websocket`, `http-probe`).
//! [`Link::pair`] gives an in-memory link for tests and custom transports.

pub mod endpoint;
pub mod error;
pub mod traits;

#[cfg(feature = "http-probe")]
pub mod probe;
#[cfg(feature = "websocket")]
pub mod ws;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use traits::{
    Connector, Link, LinkCommand, LinkEvent, LinkPeer, LinkSender, ProbeOutcome, Prober,
    UNAUTHORIZED,
};

#[cfg(feature = "http-probe")]
pub use probe::HttpProber;
#[cfg(feature = "websocket")]
pub use ws::WebSocketConnector;
