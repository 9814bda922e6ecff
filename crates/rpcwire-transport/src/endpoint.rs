use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Result, TransportError};

const DUPLEX_SCHEMES: [(&str, &str); 2] = [("ws", "http"), ("wss", "https")];

/// A validated RPC server address and the probe address derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    probe_url: Url,
}

impl Endpoint {
    /// Validate a `ws://` or `wss://` address.
    ///
    /// The probe address is the same URL with the scheme mapped to its
    /// request/response counterpart (`ws` → `http`, `wss` → `https`), so
    /// any token carried in the path or query reaches the probe unchanged.
    pub fn parse(address: &str) -> Result<Self> {
        if address.is_empty() {
            return Err(invalid(address, "address must not be empty"));
        }

        let url = Url::parse(address).map_err(|err| invalid(address, &err.to_string()))?;
        let probe_scheme = DUPLEX_SCHEMES
            .iter()
            .find(|(duplex, _)| *duplex == url.scheme())
            .map(|(_, probe)| *probe)
            .ok_or_else(|| invalid(address, "address must start with the ws:// or wss:// scheme"))?;

        let mut probe_url = url.clone();
        probe_url
            .set_scheme(probe_scheme)
            .map_err(|()| invalid(address, "address cannot be mapped to a probe URL"))?;

        Ok(Self { url, probe_url })
    }

    /// The duplex transport address.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request/response address used by the diagnostic probe.
    pub fn probe_url(&self) -> &Url {
        &self.probe_url
    }

    /// Whether the connection uses TLS (`wss`).
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn invalid(address: &str, reason: &str) -> TransportError {
    TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}
