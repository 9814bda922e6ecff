use std::time::Duration;

use rpcwire_frame::FrameConfig;

/// Result cache growth policy.
///
/// The default keeps every result forever. Bound it with `max_entries`
/// (oldest insertion evicted first) and/or expire entries with `ttl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_entries: Option<usize>,
    pub ttl: Option<Duration>,
}

/// Client tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Reconnection attempts per cycle before giving up. Default: 5.
    pub retry_budget: u32,
    /// Base unit of the quadratic backoff. Default: 1 s.
    pub backoff_unit: Duration,
    /// Time allowed for a link to open. Default: 10 s.
    pub connect_timeout: Duration,
    /// Time allowed for the diagnostic probe. Default: 10 s.
    pub probe_timeout: Duration,
    pub cache: CachePolicy,
    pub frame: FrameConfig,
}

impl ClientConfig {
    /// Delay before reconnection attempt `attempt` (0-based): `attempt² × backoff_unit`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(attempt.saturating_mul(attempt))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            backoff_unit: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            cache: CachePolicy::default(),
            frame: FrameConfig::default(),
        }
    }
}
