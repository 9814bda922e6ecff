//! Reconnecting, multiplexing RPC client.
//!
//! One [`Client`] keeps one duplex link to an RPC server. Calls made while
//! the link is down are queued and flushed in order once it opens. Replies
//! are matched to calls by marker, and successful results are remembered so
//! an identical later call is answered locally.
//!
//! ```no_run
//! # async fn demo() -> rpcwire_client::Result<()> {
//! use rpcwire_client::{Client, EventKind};
//!
//! let client = Client::new("ws://127.0.0.1:8000/rpc")?;
//! client.events().on(EventKind::Ready, |_| println!("connected"));
//! client
//!     .call("add", [1, 2])?
//!     .then(|sum| {
//!         println!("1 + 2 = {sum}");
//!         sum
//!     });
//! # Ok(())
//! # }
//! ```
//!
//! The state machine and routing live in the synchronous [`Engine`]; the
//! [`Client`] only runs it on a tokio task and performs the I/O it asks for.

pub mod action;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod handle;
pub mod multiplexer;
pub mod queue;

pub use action::{Action, TimerId};
pub use cache::ResultCache;
pub use client::{Client, ClientBuilder, NO_ARGS};
pub use config::{CachePolicy, ClientConfig};
pub use connection::{ConnectionManager, ConnectionState, DisconnectReason};
pub use engine::Engine;
pub use error::{ClientError, Result};
pub use event::{ClientEvent, EventBus, EventKind, SubscriptionId};
pub use handle::CallHandle;
pub use multiplexer::{CallMultiplexer, Delivery, ErrorFn, PendingCall, SuccessFn, TimeoutFn};
pub use queue::OutboundQueue;

pub use rpcwire_frame::Marker;
pub use rpcwire_transport::{Endpoint, ProbeOutcome};
