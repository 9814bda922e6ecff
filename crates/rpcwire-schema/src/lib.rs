//! Optional JSON Schema contracts for procedure results.
//!
//! Register a schema per procedure name and the client checks every result
//! it receives for that procedure before handing it to callbacks. A result
//! that breaks its contract is reported as a call failure instead.

pub mod config;
pub mod error;
pub mod registry;
mod strict;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
