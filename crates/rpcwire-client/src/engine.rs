//! Sans-I/O core of the client.
//!
//! The [`Engine`] owns every piece of client state and reacts to inputs
//! (public calls, link events, probe results, timer ticks) by queuing
//! [`Action`]s for I/O and [`Delivery`]s for user callbacks. It never blocks,
//! never spawns and never calls user code, so it can be driven and inspected
//! synchronously.

use std::time::{Duration, Instant};

use rpcwire_frame::{
    decode_inbound, encode_call, identity_key, CallEnvelope, FrameConfig, Inbound, Marker,
};
use rpcwire_transport::{Endpoint, ProbeOutcome};
use serde_json::{json, Value};

#[cfg(feature = "schema")]
use std::sync::Arc;

#[cfg(feature = "schema")]
use rpcwire_schema::SchemaRegistry;

use crate::action::{take_sends, Action, TimerId};
use crate::cache::ResultCache;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, DisconnectReason};
use crate::error::Result;
use crate::event::ClientEvent;
use crate::multiplexer::{
    CallMultiplexer, Delivery, ErrorFn, PendingCall, SuccessFn, TimeoutFn,
};

pub struct Engine {
    conn: ConnectionManager,
    calls: CallMultiplexer,
    cache: ResultCache,
    frame: FrameConfig,
    #[cfg(feature = "schema")]
    schemas: Option<Arc<SchemaRegistry>>,
    next_timer: TimerId,
    out: Vec<Action>,
    deliveries: Vec<Delivery>,
}

impl Engine {
    pub fn new(endpoint: Endpoint, config: &ClientConfig) -> Self {
        Self {
            conn: ConnectionManager::new(endpoint, config),
            calls: CallMultiplexer::new(),
            cache: ResultCache::new(config.cache.clone()),
            frame: config.frame.clone(),
            #[cfg(feature = "schema")]
            schemas: None,
            next_timer: 0,
            out: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    /// Check every success result against the registry before delivery.
    #[cfg(feature = "schema")]
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn state(&self) -> &ConnectionState {
        self.conn.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.conn.endpoint()
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.pending()
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Side effects queued since the last call, in order.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.out)
    }

    /// Callback work queued since the last call, in order.
    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deliveries)
    }

    pub fn connect(&mut self) -> Result<()> {
        self.conn.connect(&mut self.out)
    }

    pub fn disconnect(&mut self) {
        self.transition(|conn, out| conn.disconnect(out));
    }

    /// Issue a call and return its marker.
    ///
    /// A cached result (unless `bypass_cache`) or a terminal disconnect is
    /// answered locally: the answer is held on the call and delivered once
    /// the caller releases its handle.
    pub fn call(
        &mut self,
        procedure: &str,
        arguments: Vec<Value>,
        bypass_cache: bool,
    ) -> Result<Marker> {
        let marker = self.calls.next_marker();

        if !bypass_cache {
            let key = identity_key(procedure, &arguments);
            if let Some(result) = self.cache.get(&key, Instant::now()) {
                tracing::debug!(marker, procedure, "answering call from cache");
                let mut call = PendingCall::new(procedure, None);
                call.hold(Inbound::Success {
                    marker,
                    result,
                    terminal: true,
                });
                self.calls.insert(marker, call);
                return Ok(marker);
            }
            return self.dispatch(procedure, arguments, marker, Some(key));
        }

        self.dispatch(procedure, arguments, marker, None)
    }

    pub fn add_stage(&mut self, marker: Marker, stage: SuccessFn) {
        self.calls.add_stage(marker, stage);
    }

    pub fn set_error_handler(&mut self, marker: Marker, handler: ErrorFn) {
        self.calls.set_error_handler(marker, handler);
    }

    /// Start (or restart) the timeout of a call. Ignored once the call settled.
    pub fn set_timeout(&mut self, marker: Marker, after: Duration, callback: TimeoutFn) {
        let timer = self.next_timer;
        self.next_timer += 1;

        match self.calls.set_timeout(marker, timer, callback) {
            Ok(previous) => {
                if let Some(previous) = previous {
                    self.out.push(Action::CancelTimer(previous));
                }
                self.out.push(Action::StartTimer {
                    timer,
                    marker,
                    after,
                });
            }
            Err(_) => tracing::trace!(marker, "timeout set on a settled call"),
        }
    }

    /// The caller dropped its handle; dispatch what the call holds.
    pub fn release(&mut self, marker: Marker) {
        self.calls.release(marker, &mut self.out, &mut self.deliveries);
    }

    pub fn on_open(&mut self) {
        self.conn.on_open(&mut self.out);
    }

    pub fn on_transport_error(&mut self, message: String) {
        self.conn.on_transport_error(message, &mut self.out);
    }

    pub fn on_close(&mut self) {
        self.transition(|conn, out| conn.on_close(out));
    }

    /// Writes that never reached a link: requeue them and treat the link as closed.
    pub fn on_send_failed(&mut self, unsent: Vec<String>) {
        let mut reclaimed = unsent;
        reclaimed.extend(take_sends(&mut self.out));
        self.conn.requeue_front(reclaimed);
        self.on_close();
    }

    pub fn on_probe(&mut self, outcome: ProbeOutcome) {
        self.transition(|conn, out| conn.on_probe(outcome, out));
    }

    pub fn on_reconnect_due(&mut self) {
        self.conn.on_reconnect_due(&mut self.out);
    }

    pub fn on_timeout(&mut self, marker: Marker, timer: TimerId) {
        self.calls
            .expire(marker, timer, &mut self.out, &mut self.deliveries);
    }

    /// Decode and route one inbound frame.
    pub fn on_message(&mut self, text: &str) {
        let inbound = match decode_inbound(text, self.frame.max_payload_size) {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed envelope");
                self.out
                    .push(Action::Publish(ClientEvent::MalformedEnvelope(err.to_string())));
                return;
            }
        };

        #[cfg(feature = "schema")]
        let inbound = self.check_contract(inbound);

        if let Inbound::Success {
            marker,
            result,
            terminal: true,
        } = &inbound
        {
            if let Some(key) = self.calls.cache_key(*marker) {
                self.cache
                    .insert(key.to_string(), result.clone(), Instant::now());
            }
        }

        self.calls.route(inbound, &mut self.out, &mut self.deliveries);
    }

    fn dispatch(
        &mut self,
        procedure: &str,
        arguments: Vec<Value>,
        marker: Marker,
        cache_key: Option<String>,
    ) -> Result<Marker> {
        let mut call = PendingCall::new(procedure, cache_key);

        if let ConnectionState::Disconnected(reason) = self.conn.state() {
            tracing::debug!(marker, procedure, %reason, "call issued after disconnect");
            call.hold(Inbound::Failure {
                marker,
                error: disconnected_error(*reason),
                terminal: true,
            });
            self.calls.insert(marker, call);
            return Ok(marker);
        }

        let text = encode_call(
            &CallEnvelope::new(procedure, arguments, marker),
            self.frame.max_payload_size,
        )?;
        tracing::trace!(marker, procedure, "issuing call");
        self.calls.insert(marker, call);
        self.conn.send(text, &mut self.out);
        Ok(marker)
    }

    /// Run a connection step; fail every pending call if it ended the client.
    fn transition(&mut self, step: impl FnOnce(&mut ConnectionManager, &mut Vec<Action>)) {
        let was_terminal = self.conn.state().is_terminal();
        step(&mut self.conn, &mut self.out);

        if let ConnectionState::Disconnected(reason) = self.conn.state() {
            if !was_terminal {
                let error = disconnected_error(*reason);
                self.calls
                    .fail_all(&error, &mut self.out, &mut self.deliveries);
            }
        }
    }

    #[cfg(feature = "schema")]
    fn check_contract(&self, inbound: Inbound) -> Inbound {
        let procedure = match (&self.schemas, &inbound) {
            (Some(_), Inbound::Success { marker, .. }) => self
                .calls
                .get(*marker)
                .map(|call| call.procedure().to_string()),
            _ => None,
        };
        let (Some(schemas), Some(procedure)) = (&self.schemas, procedure) else {
            return inbound;
        };

        match inbound {
            Inbound::Success {
                marker,
                result,
                terminal,
            } => match schemas.validate(&procedure, &result) {
                Ok(()) => Inbound::Success {
                    marker,
                    result,
                    terminal,
                },
                Err(err) => {
                    tracing::warn!(marker, %procedure, error = %err, "result violates schema");
                    Inbound::Failure {
                        marker,
                        error: json!({"code": "schema_violation", "message": err.to_string()}),
                        terminal,
                    }
                }
            },
            failure => failure,
        }
    }
}

fn disconnected_error(reason: DisconnectReason) -> Value {
    json!({"code": "disconnected", "reason": reason.to_string()})
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", self.conn.state())
            .field("pending_calls", &self.calls.pending())
            .field("queued", &self.conn.queued())
            .field("cached_results", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn engine() -> Engine {
        Engine::new(Endpoint::parse("ws://h/rpc").unwrap(), &ClientConfig::default())
    }

    fn open_engine() -> Engine {
        let mut engine = engine();
        engine.connect().unwrap();
        engine.on_open();
        engine.take_actions();
        engine
    }

    fn sent(actions: &[Action]) -> Vec<Value> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send(text) => Some(serde_json::from_str(text).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn collect(engine: &mut Engine, marker: Marker) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = Arc::clone(&seen);
        engine.add_stage(
            marker,
            Arc::new(move |v: Value| {
                ok.lock().unwrap().push(v.clone());
                v
            }),
        );
        let err = Arc::clone(&seen);
        engine.set_error_handler(
            marker,
            Arc::new(move |e: Value| err.lock().unwrap().push(json!({"error": e}))),
        );
        seen
    }

    fn run(engine: &mut Engine) {
        engine.take_deliveries().into_iter().for_each(Delivery::run);
    }

    #[test]
    fn call_sends_wire_envelope() {
        let mut engine = open_engine();
        let marker = engine.call("add", vec![json!(1), json!(2)], false).unwrap();

        assert_eq!(marker, 0);
        assert_eq!(
            sent(&engine.take_actions()),
            vec![json!({"function_name": "add", "parameters_list": [1, 2], "marker": 0})]
        );
    }

    #[test]
    fn calls_before_ready_are_flushed_in_order() {
        let mut engine = engine();
        engine.connect().unwrap();
        engine.call("first", vec![], false).unwrap();
        engine.call("second", vec![], false).unwrap();
        assert!(sent(&engine.take_actions()).is_empty());

        engine.on_open();
        let names: Vec<Value> = sent(&engine.take_actions())
            .into_iter()
            .map(|envelope| envelope["function_name"].clone())
            .collect();
        assert_eq!(names, vec![json!("first"), json!("second")]);
    }

    #[test]
    fn concurrent_identical_calls_both_hit_the_network() {
        let mut engine = open_engine();
        engine.call("add", vec![json!(1)], false).unwrap();
        engine.call("add", vec![json!(1)], false).unwrap();
        assert_eq!(sent(&engine.take_actions()).len(), 2);
    }

    #[test]
    fn resolved_call_is_answered_from_cache() {
        let mut engine = open_engine();
        let first = engine.call("add", vec![json!(1), json!(2)], false).unwrap();
        engine.release(first);
        engine.on_message(r#"{"result": 3, "marker": 0, "eod": 1}"#);
        assert_eq!(engine.cached_results(), 1);
        engine.take_actions();

        let second = engine.call("add", vec![json!(1), json!(2)], false).unwrap();
        let seen = collect(&mut engine, second);
        assert!(sent(&engine.take_actions()).is_empty());

        // nothing is delivered while the handle is held
        run(&mut engine);
        assert!(seen.lock().unwrap().is_empty());

        engine.release(second);
        run(&mut engine);
        assert_eq!(*seen.lock().unwrap(), vec![json!(3)]);
        assert_eq!(engine.pending_calls(), 0);
    }

    #[test]
    fn forced_calls_never_touch_the_cache() {
        let mut engine = open_engine();
        for _ in 0..2 {
            let marker = engine.call("now", vec![], true).unwrap();
            engine.release(marker);
        }
        assert_eq!(sent(&engine.take_actions()).len(), 2);

        engine.on_message(r#"{"result": 1, "marker": 0, "eod": 1}"#);
        assert_eq!(engine.cached_results(), 0);
    }

    #[test]
    fn partial_results_are_not_cached() {
        let mut engine = open_engine();
        let marker = engine.call("stream", vec![], false).unwrap();
        let seen = collect(&mut engine, marker);
        engine.release(marker);

        engine.on_message(r#"{"result": "a", "marker": 0}"#);
        engine.on_message(r#"{"result": "b", "marker": 0, "eod": 0}"#);
        assert_eq!(engine.cached_results(), 0);
        engine.on_message(r#"{"result": "c", "marker": 0, "eod": 1}"#);
        run(&mut engine);

        assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(engine.cached_results(), 1);
    }

    #[test]
    fn malformed_frame_is_published_and_dropped() {
        let mut engine = open_engine();
        engine.on_message("not json");
        assert!(matches!(
            engine.take_actions().as_slice(),
            [Action::Publish(ClientEvent::MalformedEnvelope(_))]
        ));
    }

    #[test]
    fn terminal_disconnect_fails_pending_calls() {
        let mut engine = open_engine();
        let marker = engine.call("slow", vec![], false).unwrap();
        let seen = collect(&mut engine, marker);
        engine.release(marker);

        engine.disconnect();
        engine.on_close();
        run(&mut engine);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"error": {"code": "disconnected", "reason": "disconnect requested"}})]
        );
        assert_eq!(engine.pending_calls(), 0);
    }

    #[test]
    fn calls_after_disconnect_fail_without_network() {
        let mut engine = open_engine();
        engine.disconnect();
        engine.on_close();
        engine.take_actions();

        let marker = engine.call("late", vec![], false).unwrap();
        let seen = collect(&mut engine, marker);
        engine.release(marker);
        run(&mut engine);

        assert!(sent(&engine.take_actions()).is_empty());
        assert_eq!(seen.lock().unwrap()[0]["error"]["code"], json!("disconnected"));
    }

    #[test]
    fn timeout_tears_down_and_late_reply_is_dropped() {
        let mut engine = open_engine();
        let marker = engine.call("slow", vec![], false).unwrap();
        let seen = collect(&mut engine, marker);
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        engine.set_timeout(
            marker,
            Duration::from_secs(5),
            Box::new(move || *flag.lock().unwrap() = true),
        );
        engine.release(marker);

        let timer = engine
            .take_actions()
            .iter()
            .find_map(|action| match action {
                Action::StartTimer { timer, after, .. } => {
                    assert_eq!(*after, Duration::from_secs(5));
                    Some(*timer)
                }
                _ => None,
            })
            .unwrap();

        engine.on_timeout(marker, timer);
        engine.on_message(r#"{"result": 1, "marker": 0, "eod": 1}"#);
        run(&mut engine);

        assert!(*fired.lock().unwrap());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(engine.cached_results(), 0);
    }

    #[cfg(feature = "schema")]
    #[test]
    fn schema_violation_becomes_failure_and_is_not_cached() {
        let registry = SchemaRegistry::from_embedded(&[("sum", r#"{"type": "integer"}"#)]).unwrap();
        let mut engine = open_engine().with_schemas(Arc::new(registry));

        let marker = engine.call("sum", vec![json!(1)], false).unwrap();
        let seen = collect(&mut engine, marker);
        engine.release(marker);
        engine.on_message(r#"{"result": "three", "marker": 0, "eod": 1}"#);
        run(&mut engine);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["error"]["code"], json!("schema_violation"));
        assert_eq!(engine.cached_results(), 0);
    }

    #[test]
    fn send_failure_requeues_and_closes() {
        let mut engine = open_engine();
        engine.call("a", vec![], false).unwrap();
        let unsent: Vec<String> = engine
            .take_actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::Send(text) => Some(text),
                _ => None,
            })
            .collect();
        engine.call("b", vec![], false).unwrap();

        engine.on_send_failed(unsent);
        assert_eq!(engine.state(), &ConnectionState::Diagnosing);
        engine.on_probe(ProbeOutcome::Reachable(200));
        engine.on_reconnect_due();
        engine.on_open();

        let names: Vec<Value> = sent(&engine.take_actions())
            .into_iter()
            .map(|envelope| envelope["function_name"].clone())
            .collect();
        assert_eq!(names, vec![json!("a"), json!("b")]);
    }
}
