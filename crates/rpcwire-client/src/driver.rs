use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rpcwire_frame::Marker;
use rpcwire_transport::{
    Connector, Link, LinkEvent, LinkSender, ProbeOutcome, Prober, TransportError,
};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::action::{Action, TimerId};
use crate::engine::Engine;
use crate::event::EventBus;
use crate::multiplexer::Delivery;

pub(crate) type SharedEngine = Arc<Mutex<Engine>>;

/// Lock the engine, recovering from a poisoned lock.
pub(crate) fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Input to the driver task, processed strictly in arrival order.
#[derive(Debug)]
pub(crate) enum DriverEvent {
    /// The engine has new actions queued by a public call.
    Wake,
    Opened { generation: u64, link: Link },
    OpenFailed { generation: u64, error: TransportError },
    Link { generation: u64, event: LinkEvent },
    ProbeDone(ProbeOutcome),
    ReconnectDue,
    TimeoutDue { marker: Marker, timer: TimerId },
    /// A call handle was dropped.
    Release(Marker),
}

/// Single task that performs every side effect the engine asks for.
///
/// Each event is applied to the engine under its lock; callbacks and I/O run
/// afterwards with the lock released.
pub(crate) struct Driver {
    engine: SharedEngine,
    events: EventBus,
    connector: Arc<dyn Connector>,
    prober: Arc<dyn Prober>,
    connect_timeout: Duration,
    probe_timeout: Duration,
    tx: mpsc::UnboundedSender<DriverEvent>,
    rx: mpsc::UnboundedReceiver<DriverEvent>,
    cancel: CancellationToken,
    // bumped whenever the current link is abandoned; events tagged with an
    // older generation are stale
    generation: u64,
    link: Option<LinkSender>,
    reconnect: Option<AbortHandle>,
    timers: HashMap<TimerId, AbortHandle>,
}

pub(crate) struct DriverParts {
    pub engine: SharedEngine,
    pub events: EventBus,
    pub connector: Arc<dyn Connector>,
    pub prober: Arc<dyn Prober>,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub tx: mpsc::UnboundedSender<DriverEvent>,
    pub rx: mpsc::UnboundedReceiver<DriverEvent>,
    pub cancel: CancellationToken,
}

impl Driver {
    pub(crate) fn new(parts: DriverParts) -> Self {
        Self {
            engine: parts.engine,
            events: parts.events,
            connector: parts.connector,
            prober: parts.prober,
            connect_timeout: parts.connect_timeout,
            probe_timeout: parts.probe_timeout,
            tx: parts.tx,
            rx: parts.rx,
            cancel: parts.cancel,
            generation: 0,
            link: None,
            reconnect: None,
            timers: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event);
        }
        self.stop();
    }

    fn handle(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Wake => self.turn(|_| {}),
            DriverEvent::Opened { generation, link } => {
                if generation != self.generation {
                    tracing::debug!(generation, "discarding link opened for an abandoned attempt");
                    link.sender().close();
                    return;
                }
                self.attach(link);
                self.turn(Engine::on_open);
            }
            DriverEvent::OpenFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                self.turn(|engine| {
                    engine.on_transport_error(error.to_string());
                    engine.on_close();
                });
            }
            DriverEvent::Link { generation, event } => {
                if generation != self.generation {
                    tracing::trace!(generation, "ignoring event from a previous link");
                    return;
                }
                match event {
                    LinkEvent::Message(text) => self.turn(|engine| engine.on_message(&text)),
                    LinkEvent::Error(message) => {
                        self.turn(|engine| engine.on_transport_error(message))
                    }
                    LinkEvent::Unsent(texts) => {
                        tracing::debug!(count = texts.len(), "link returned unwritten envelopes");
                        self.abandon_link();
                        self.turn(|engine| engine.on_send_failed(texts));
                    }
                    LinkEvent::Closed => {
                        self.abandon_link();
                        self.turn(Engine::on_close);
                    }
                }
            }
            DriverEvent::ProbeDone(outcome) => self.turn(|engine| engine.on_probe(outcome)),
            DriverEvent::ReconnectDue => {
                self.reconnect = None;
                self.turn(Engine::on_reconnect_due);
            }
            DriverEvent::TimeoutDue { marker, timer } => {
                self.timers.remove(&timer);
                self.turn(|engine| engine.on_timeout(marker, timer));
            }
            DriverEvent::Release(marker) => self.turn(|engine| engine.release(marker)),
        }
    }

    /// Apply one step to the engine, then run its callbacks and side effects.
    fn turn(&mut self, step: impl FnOnce(&mut Engine)) {
        let (actions, deliveries) = {
            let mut engine = lock(&self.engine);
            step(&mut *engine);
            (engine.take_actions(), engine.take_deliveries())
        };
        deliver(deliveries);

        let mut actions: VecDeque<Action> = actions.into();
        while let Some(action) = actions.pop_front() {
            let Action::Send(text) = action else {
                self.perform(action);
                continue;
            };
            if let Err(unsent) = self.write(text) {
                // the link is gone: everything not yet written goes back in the queue
                let mut unsent = vec![unsent];
                actions.retain(|action| match action {
                    Action::Send(text) => {
                        unsent.push(text.clone());
                        false
                    }
                    _ => true,
                });
                self.abandon_link();

                let (more, deliveries) = {
                    let mut engine = lock(&self.engine);
                    engine.on_send_failed(unsent);
                    (engine.take_actions(), engine.take_deliveries())
                };
                deliver(deliveries);
                actions.extend(more);
            }
        }
    }

    fn write(&self, text: String) -> Result<(), String> {
        match &self.link {
            Some(link) => link.send(text.clone()).map_err(|_| text),
            None => Err(text),
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::Open(url) => self.open(url),
            Action::Send(_) => {}
            Action::Close => match self.link.take() {
                Some(link) => link.close(),
                None => {
                    // nothing open yet: abandon the attempt in flight and close now
                    self.generation += 1;
                    let _ = self.tx.send(DriverEvent::Link {
                        generation: self.generation,
                        event: LinkEvent::Closed,
                    });
                }
            },
            Action::Probe(url) => self.probe(url),
            Action::ScheduleReconnect(delay) => {
                if let Some(previous) = self.reconnect.take() {
                    previous.abort();
                }
                let tx = self.tx.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(DriverEvent::ReconnectDue);
                });
                self.reconnect = Some(task.abort_handle());
            }
            Action::StartTimer {
                timer,
                marker,
                after,
            } => {
                let tx = self.tx.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(DriverEvent::TimeoutDue { marker, timer });
                });
                self.timers.insert(timer, task.abort_handle());
            }
            Action::CancelTimer(timer) => {
                if let Some(task) = self.timers.remove(&timer) {
                    task.abort();
                }
            }
            Action::Publish(event) => {
                let events = &self.events;
                if catch_unwind(AssertUnwindSafe(|| events.publish(&event))).is_err() {
                    tracing::error!(?event, "event listener panicked");
                }
            }
        }
    }

    fn open(&mut self, url: Url) {
        self.abandon_link();
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        let tx = self.tx.clone();

        tracing::debug!(%url, generation, "opening link");
        tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, connector.open(&url)).await {
                Ok(Ok(link)) => DriverEvent::Opened { generation, link },
                Ok(Err(error)) => DriverEvent::OpenFailed { generation, error },
                Err(_) => DriverEvent::OpenFailed {
                    generation,
                    error: TransportError::Connect {
                        url: url.to_string(),
                        message: format!("timed out after {timeout:?}"),
                    },
                },
            };
            let _ = tx.send(event);
        });
    }

    fn probe(&self, url: Url) {
        let prober = Arc::clone(&self.prober);
        let timeout = self.probe_timeout;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, prober.probe(&url))
                .await
                .unwrap_or_else(|_| {
                    ProbeOutcome::Unreachable(format!("timed out after {timeout:?}"))
                });
            let _ = tx.send(DriverEvent::ProbeDone(outcome));
        });
    }

    /// Start forwarding the link's events into the driver queue.
    fn attach(&mut self, link: Link) {
        let generation = self.generation;
        let (sender, mut events) = link.into_parts();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closed = event == LinkEvent::Closed;
                if tx.send(DriverEvent::Link { generation, event }).is_err() || closed {
                    return;
                }
            }
            let _ = tx.send(DriverEvent::Link {
                generation,
                event: LinkEvent::Closed,
            });
        });
        self.link = Some(sender);
    }

    /// Forget the current link so its remaining events are ignored.
    fn abandon_link(&mut self) {
        self.generation += 1;
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
        for (_, task) in self.timers.drain() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        tracing::debug!("client driver stopped");
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        let marker = delivery.marker();
        if catch_unwind(AssertUnwindSafe(|| delivery.run())).is_err() {
            tracing::error!(marker, "call callback panicked");
        }
    }
}
