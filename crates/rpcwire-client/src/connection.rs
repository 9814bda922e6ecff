use std::fmt;
use std::time::Duration;

use rpcwire_transport::{Endpoint, ProbeOutcome};

use crate::action::{take_sends, Action};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use crate::queue::OutboundQueue;

/// Why a client stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The diagnostic probe was answered with 401.
    Unauthorized,
    /// Every reconnection attempt of the cycle failed.
    RetriesExhausted { attempts: u32 },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Unauthorized => f.write_str("server rejected authorization"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnection attempts")
            }
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    Connecting,
    Open,
    /// The link just went away; resolved within the same step.
    Closed,
    /// Waiting for the diagnostic probe.
    Diagnosing,
    /// Waiting for the backoff delay before reconnection attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Stopped; nothing is retried automatically.
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Diagnosing => f.write_str("diagnosing"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected(reason) => write!(f, "disconnected: {reason}"),
        }
    }
}

/// Connection state machine, backoff policy and outbound queue.
///
/// Never touches I/O itself: every step pushes the [`Action`]s it needs onto
/// the caller's outbox.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: Endpoint,
    state: ConnectionState,
    attempt: u32,
    retry_budget: u32,
    backoff_unit: Duration,
    diagnosed: bool,
    shutdown: bool,
    queue: OutboundQueue,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, config: &ClientConfig) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Idle,
            attempt: 0,
            retry_budget: config.retry_budget,
            backoff_unit: config.backoff_unit,
            diagnosed: false,
            shutdown: false,
            queue: OutboundQueue::new(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Start a connection cycle.
    ///
    /// No-op while a cycle is already running. From a terminal state other
    /// than an explicit disconnect, starts over with a fresh attempt counter.
    pub fn connect(&mut self, out: &mut Vec<Action>) -> Result<()> {
        if self.shutdown {
            return Err(ClientError::Shutdown);
        }
        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnected(_) => {
                self.attempt = 0;
                self.open(out);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Stop for good. No-op when never connected.
    pub fn disconnect(&mut self, out: &mut Vec<Action>) {
        if self.state == ConnectionState::Idle {
            return;
        }
        self.shutdown = true;
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => out.push(Action::Close),
            ConnectionState::Diagnosing | ConnectionState::Reconnecting { .. } => {
                self.finish(DisconnectReason::Requested, out);
            }
            _ => {}
        }
    }

    /// Write now if open, otherwise queue for the next open.
    pub fn send(&mut self, text: String, out: &mut Vec<Action>) {
        if self.state == ConnectionState::Open {
            out.push(Action::Send(text));
        } else {
            tracing::trace!(queued = self.queue.len() + 1, "queued envelope until open");
            self.queue.push(text);
        }
    }

    /// Envelopes that never reached the wire go back ahead of newer ones.
    pub fn requeue_front(&mut self, texts: Vec<String>) {
        self.queue.requeue_front(texts);
    }

    pub fn on_open(&mut self, out: &mut Vec<Action>) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        if self.shutdown {
            out.push(Action::Close);
            return;
        }

        self.state = ConnectionState::Open;
        self.attempt = 0;
        let flushed = self.queue.drain();
        tracing::info!(url = %self.endpoint, flushed = flushed.len(), "connection established");
        out.extend(flushed.into_iter().map(Action::Send));
        out.push(Action::Publish(ClientEvent::Ready));
    }

    pub fn on_transport_error(&mut self, message: String, out: &mut Vec<Action>) {
        tracing::warn!(url = %self.endpoint, error = %message, "transport error");
        out.push(Action::Publish(ClientEvent::TransportError(message)));
    }

    /// The link closed, or failed to open.
    pub fn on_close(&mut self, out: &mut Vec<Action>) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }
        if self.state == ConnectionState::Open {
            tracing::info!(url = %self.endpoint, "connection closed");
        }
        self.state = ConnectionState::Closed;
        self.queue.requeue_front(take_sends(out));
        out.push(Action::Publish(ClientEvent::Closed));

        if self.shutdown {
            self.finish(DisconnectReason::Requested, out);
        } else if self.attempt == 0 && !self.diagnosed {
            self.state = ConnectionState::Diagnosing;
            tracing::debug!(probe = %self.endpoint.probe_url(), "probing server before reconnecting");
            out.push(Action::Probe(self.endpoint.probe_url().clone()));
        } else {
            self.reconnect(out);
        }
    }

    pub fn on_probe(&mut self, outcome: ProbeOutcome, out: &mut Vec<Action>) {
        if self.state != ConnectionState::Diagnosing {
            return;
        }
        match outcome {
            ProbeOutcome::Unauthorized => {
                tracing::warn!(url = %self.endpoint, "server rejected authorization; not reconnecting");
                self.finish(DisconnectReason::Unauthorized, out);
            }
            ProbeOutcome::Reachable(status) => {
                tracing::debug!(status, "probe reached the server");
                self.diagnosed = true;
                self.reconnect(out);
            }
            ProbeOutcome::Unreachable(reason) => {
                // only a 401 keeps the client undiagnosed
                tracing::debug!(%reason, "probe could not reach the server");
                self.diagnosed = true;
                self.reconnect(out);
            }
        }
    }

    pub fn on_reconnect_due(&mut self, out: &mut Vec<Action>) {
        if matches!(self.state, ConnectionState::Reconnecting { .. }) {
            self.open(out);
        }
    }

    fn open(&mut self, out: &mut Vec<Action>) {
        self.state = ConnectionState::Connecting;
        out.push(Action::Open(self.endpoint.url().clone()));
    }

    fn reconnect(&mut self, out: &mut Vec<Action>) {
        if self.attempt >= self.retry_budget {
            tracing::error!(
                url = %self.endpoint,
                attempts = self.attempt,
                "reconnection attempts exhausted"
            );
            self.finish(
                DisconnectReason::RetriesExhausted {
                    attempts: self.attempt,
                },
                out,
            );
            return;
        }

        let delay = self
            .backoff_unit
            .saturating_mul(self.attempt.saturating_mul(self.attempt));
        self.attempt += 1;
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempt,
        };
        tracing::warn!(
            attempt = self.attempt,
            delay_secs = delay.as_secs_f64(),
            "scheduling reconnection"
        );
        out.push(Action::ScheduleReconnect(delay));
        out.push(Action::Publish(ClientEvent::Reconnecting {
            attempt: self.attempt,
            delay,
        }));
    }

    fn finish(&mut self, reason: DisconnectReason, out: &mut Vec<Action>) {
        self.state = ConnectionState::Disconnected(reason);
        self.queue.clear();
        out.push(Action::Publish(ClientEvent::Disconnected(reason)));
    }
}
