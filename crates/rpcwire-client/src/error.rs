/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error, including an invalid address.
    #[error("transport error: {0}")]
    Transport(#[from] rpcwire_transport::TransportError),

    /// Envelope encoding error.
    #[error("frame error: {0}")]
    Frame(#[from] rpcwire_frame::FrameError),

    /// Schema loading error.
    #[cfg(feature = "schema")]
    #[error("schema error: {0}")]
    Schema(#[from] rpcwire_schema::SchemaError),

    /// The client was explicitly disconnected and will not reconnect.
    #[error("client has been shut down")]
    Shutdown,

    /// The client was constructed outside a tokio runtime.
    #[error("no tokio runtime is running")]
    NoRuntime,

    /// A required capability is missing from this build.
    #[error("no {0} configured; enable the matching feature or inject one")]
    MissingCapability(&'static str),
}

pub type Result<T> = std::result::Result<T, ClientError>;
