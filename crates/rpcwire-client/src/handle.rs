use std::sync::Arc;
use std::time::Duration;

use rpcwire_frame::Marker;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::driver::{lock, DriverEvent, SharedEngine};

/// Registration handle for one call.
///
/// Every method consumes and returns the handle so registrations chain.
/// Replies are held until the handle is dropped, so nothing registered
/// through it can miss an envelope:
///
/// ```no_run
/// # async fn demo(client: rpcwire_client::Client) -> rpcwire_client::Result<()> {
/// use std::time::Duration;
///
/// client
///     .call("add", [1, 2])?
///     .then(|sum| sum)
///     .catch(|err| eprintln!("add failed: {err}"))
///     .timeout(Duration::from_secs(5), || eprintln!("add timed out"));
/// # Ok(())
/// # }
/// ```
pub struct CallHandle {
    marker: Marker,
    engine: SharedEngine,
    wake: mpsc::UnboundedSender<DriverEvent>,
}

impl CallHandle {
    pub(crate) fn new(
        marker: Marker,
        engine: SharedEngine,
        wake: mpsc::UnboundedSender<DriverEvent>,
    ) -> Self {
        Self {
            marker,
            engine,
            wake,
        }
    }

    /// The marker correlating this call with its replies.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// Append a stage to the success pipeline.
    ///
    /// The first stage receives the result; each later stage receives the
    /// previous stage's output. Streamed calls run the pipeline once per
    /// partial result.
    pub fn then<F>(self, stage: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        lock(&self.engine).add_stage(self.marker, Arc::new(stage));
        self
    }

    /// Install the error callback, replacing any previous one.
    ///
    /// Without one, errors are logged at `error` level.
    pub fn catch<F>(self, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        lock(&self.engine).set_error_handler(self.marker, Arc::new(handler));
        self
    }

    /// Give up on the call if it has not finished within `after`.
    ///
    /// The call is torn down, `on_timeout` runs, and any later reply is dropped.
    pub fn timeout<F>(self, after: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.engine).set_timeout(self.marker, after, Box::new(on_timeout));
        let _ = self.wake.send(DriverEvent::Wake);
        self
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        let _ = self.wake.send(DriverEvent::Release(self.marker));
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}
