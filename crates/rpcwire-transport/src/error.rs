/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection address is unusable.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Failed to open a link to the specified address.
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// The required transport was not compiled in.
    #[error("{0} transport is not available in this build")]
    Unsupported(&'static str),

    /// The link has been closed.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
