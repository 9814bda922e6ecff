use std::collections::HashMap;
use std::sync::Arc;

use rpcwire_frame::{Inbound, Marker};
use serde_json::Value;

use crate::action::{Action, TimerId};
use crate::event::ClientEvent;

/// One stage of a call's success pipeline.
pub type SuccessFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
/// A call's error callback.
pub type ErrorFn = Arc<dyn Fn(Value) + Send + Sync>;
/// A call's timeout callback.
pub type TimeoutFn = Box<dyn FnOnce() + Send>;

/// Bookkeeping for one in-flight call.
pub struct PendingCall {
    procedure: String,
    cache_key: Option<String>,
    pipeline: Vec<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_timeout: Option<(TimerId, TimeoutFn)>,
    // false while the caller still holds the handle
    armed: bool,
    held: Vec<Inbound>,
    // a terminal envelope is among `held`
    finished: bool,
}

impl PendingCall {
    /// `cache_key` is set only for calls whose terminal success should be cached.
    pub fn new(procedure: impl Into<String>, cache_key: Option<String>) -> Self {
        Self {
            procedure: procedure.into(),
            cache_key,
            pipeline: Vec::new(),
            on_error: None,
            on_timeout: None,
            armed: false,
            held: Vec::new(),
            finished: false,
        }
    }

    /// Queue an envelope to be dispatched once the record is armed.
    ///
    /// Nothing is queued after a terminal envelope.
    pub fn hold(&mut self, inbound: Inbound) {
        if self.finished {
            tracing::trace!(marker = inbound.marker(), "dropping envelope after final reply");
            return;
        }
        self.finished = inbound.is_terminal();
        self.held.push(inbound);
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }
}

/// Callback work produced by routing, run by the driver outside the engine lock.
pub enum Delivery {
    Success {
        marker: Marker,
        value: Value,
        pipeline: Vec<SuccessFn>,
    },
    Failure {
        marker: Marker,
        procedure: String,
        error: Value,
        handler: Option<ErrorFn>,
    },
    Timeout {
        marker: Marker,
        callback: TimeoutFn,
    },
}

impl Delivery {
    pub fn marker(&self) -> Marker {
        match self {
            Self::Success { marker, .. }
            | Self::Failure { marker, .. }
            | Self::Timeout { marker, .. } => *marker,
        }
    }

    /// Invoke the callbacks. Unhandled errors go to the diagnostic log.
    pub fn run(self) {
        match self {
            Self::Success {
                value, pipeline, ..
            } => {
                pipeline.iter().fold(value, |acc, stage| stage(acc));
            }
            Self::Failure {
                marker,
                procedure,
                error,
                handler,
            } => match handler {
                Some(handler) => handler(error),
                None => tracing::error!(marker, %procedure, %error, "unhandled rpc error"),
            },
            Self::Timeout { callback, .. } => callback(),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success {
                marker,
                value,
                pipeline,
            } => f
                .debug_struct("Success")
                .field("marker", marker)
                .field("value", value)
                .field("stages", &pipeline.len())
                .finish(),
            Self::Failure {
                marker,
                procedure,
                error,
                handler,
            } => f
                .debug_struct("Failure")
                .field("marker", marker)
                .field("procedure", procedure)
                .field("error", error)
                .field("handled", &handler.is_some())
                .finish(),
            Self::Timeout { marker, .. } => {
                f.debug_struct("Timeout").field("marker", marker).finish()
            }
        }
    }
}

/// Marker allocation and per-marker routing of inbound envelopes.
#[derive(Default)]
pub struct CallMultiplexer {
    next_marker: Marker,
    pending: HashMap<Marker, PendingCall>,
}

impl CallMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next marker. Markers start at 0 and are never reused.
    pub fn next_marker(&mut self) -> Marker {
        let marker = self.next_marker;
        self.next_marker += 1;
        marker
    }

    pub fn insert(&mut self, marker: Marker, call: PendingCall) {
        self.pending.insert(marker, call);
    }

    pub fn get(&self, marker: Marker) -> Option<&PendingCall> {
        self.pending.get(&marker)
    }

    pub fn contains(&self, marker: Marker) -> bool {
        self.pending.contains_key(&marker)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn cache_key(&self, marker: Marker) -> Option<&str> {
        self.pending.get(&marker)?.cache_key.as_deref()
    }

    /// Append a success stage. Ignored once the call has settled.
    pub fn add_stage(&mut self, marker: Marker, stage: SuccessFn) {
        if let Some(call) = self.pending.get_mut(&marker) {
            call.pipeline.push(stage);
        }
    }

    /// Install the error callback, replacing any previous one.
    pub fn set_error_handler(&mut self, marker: Marker, handler: ErrorFn) {
        if let Some(call) = self.pending.get_mut(&marker) {
            call.on_error = Some(handler);
        }
    }

    /// Install the timeout callback. Returns the timer it replaced, if any.
    ///
    /// Returns `Err(callback)` when the call has settled or its final reply
    /// is already waiting for release.
    pub fn set_timeout(
        &mut self,
        marker: Marker,
        timer: TimerId,
        callback: TimeoutFn,
    ) -> Result<Option<TimerId>, TimeoutFn> {
        match self.pending.get_mut(&marker) {
            Some(call) if !call.finished => Ok(call
                .on_timeout
                .replace((timer, callback))
                .map(|(previous, _)| previous)),
            _ => Err(callback),
        }
    }

    /// Dispatch one envelope to its call.
    ///
    /// Envelopes for a call whose handle is still held are kept until
    /// [`release`](Self::release). Envelopes for unknown markers are dropped.
    pub fn route(&mut self, inbound: Inbound, out: &mut Vec<Action>, deliveries: &mut Vec<Delivery>) {
        let marker = inbound.marker();
        let Some(call) = self.pending.get_mut(&marker) else {
            tracing::trace!(marker, "dropping envelope for settled call");
            return;
        };

        if !call.armed {
            call.hold(inbound);
            // the reply is in; only the release is outstanding
            if call.finished {
                if let Some((timer, _)) = call.on_timeout.take() {
                    out.push(Action::CancelTimer(timer));
                }
            }
            return;
        }

        let terminal = inbound.is_terminal();
        deliveries.push(match inbound {
            Inbound::Success { result, .. } => Delivery::Success {
                marker,
                value: result,
                pipeline: call.pipeline.clone(),
            },
            Inbound::Failure { error, .. } => Delivery::Failure {
                marker,
                procedure: call.procedure.clone(),
                error,
                handler: call.on_error.clone(),
            },
        });

        if terminal {
            self.settle(marker, out);
        }
    }

    /// The caller let go of the handle: arm the call and dispatch what it holds.
    pub fn release(&mut self, marker: Marker, out: &mut Vec<Action>, deliveries: &mut Vec<Delivery>) {
        let Some(call) = self.pending.get_mut(&marker) else {
            return;
        };
        call.armed = true;
        let held = std::mem::take(&mut call.held);

        for inbound in held {
            if !self.contains(marker) {
                break;
            }
            self.route(inbound, out, deliveries);
        }
    }

    /// A timer fired. Stale timers (replaced or already settled) are ignored.
    pub fn expire(
        &mut self,
        marker: Marker,
        timer: TimerId,
        out: &mut Vec<Action>,
        deliveries: &mut Vec<Delivery>,
    ) {
        let current = self
            .pending
            .get(&marker)
            .and_then(|call| call.on_timeout.as_ref())
            .map(|(id, _)| *id);
        if current != Some(timer) {
            return;
        }

        if let Some(mut call) = self.pending.remove(&marker) {
            tracing::debug!(marker, procedure = %call.procedure, "call timed out");
            if let Some((_, callback)) = call.on_timeout.take() {
                deliveries.push(Delivery::Timeout { marker, callback });
            }
            out.push(Action::Publish(ClientEvent::CallSettled { marker }));
        }
    }

    /// Fail every pending call with a final error, oldest first.
    pub fn fail_all(&mut self, error: &Value, out: &mut Vec<Action>, deliveries: &mut Vec<Delivery>) {
        let mut markers: Vec<Marker> = self.pending.keys().copied().collect();
        markers.sort_unstable();
        for marker in markers {
            self.route(
                Inbound::Failure {
                    marker,
                    error: error.clone(),
                    terminal: true,
                },
                out,
                deliveries,
            );
        }
    }

    fn settle(&mut self, marker: Marker, out: &mut Vec<Action>) {
        if let Some(call) = self.pending.remove(&marker) {
            if let Some((timer, _)) = call.on_timeout {
                out.push(Action::CancelTimer(timer));
            }
            out.push(Action::Publish(ClientEvent::CallSettled { marker }));
        }
    }
}
