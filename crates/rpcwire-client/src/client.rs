use std::fmt;
use std::sync::{Arc, Mutex};

use rpcwire_transport::{Connector, Endpoint, Prober};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "schema")]
use rpcwire_schema::SchemaRegistry;

use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::driver::{lock, Driver, DriverEvent, DriverParts, SharedEngine};
use crate::engine::Engine;
use crate::error::{ClientError, Result};
use crate::event::EventBus;
use crate::handle::CallHandle;

/// Empty argument list, for procedures that take no parameters.
pub const NO_ARGS: [Value; 0] = [];

/// Reconnecting RPC client bound to one server address.
///
/// Cloning is cheap; clones share the connection, the pending calls and the
/// result cache. The connection is driven by a background task on the tokio
/// runtime the client was built on, and stops when the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    engine: SharedEngine,
    events: EventBus,
    wake: mpsc::UnboundedSender<DriverEvent>,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Client {
    /// Build a client with default settings and start connecting.
    ///
    /// Fails immediately on an address that is not `ws://` or `wss://`.
    /// Must be called from within a tokio runtime.
    pub fn new(address: &str) -> Result<Self> {
        Self::builder(address).build()
    }

    pub fn with_config(address: &str, config: ClientConfig) -> Result<Self> {
        Self::builder(address).config(config).build()
    }

    pub fn builder(address: &str) -> ClientBuilder {
        ClientBuilder::new(address)
    }

    /// Call a procedure, answering from the result cache when possible.
    pub fn call<I>(&self, procedure: &str, arguments: I) -> Result<CallHandle>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.issue(procedure, arguments, false)
    }

    /// Call a procedure over the network, never reading or writing the cache.
    pub fn call_force<I>(&self, procedure: &str, arguments: I) -> Result<CallHandle>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.issue(procedure, arguments, true)
    }

    /// Start a new connection cycle after the client gave up on its own.
    ///
    /// No-op while connecting or connected. Fails after [`disconnect`](Self::disconnect).
    pub fn connect(&self) -> Result<()> {
        lock(&self.inner.engine).connect()?;
        self.wake();
        Ok(())
    }

    /// Close the connection and never reconnect. Pending calls fail.
    pub fn disconnect(&self) {
        lock(&self.inner.engine).disconnect();
        self.wake();
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.engine).state().clone()
    }

    /// Lifecycle notifications for this client.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    fn issue<I>(&self, procedure: &str, arguments: I, bypass_cache: bool) -> Result<CallHandle>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let arguments: Vec<Value> = arguments.into_iter().map(Into::into).collect();
        let marker = lock(&self.inner.engine).call(procedure, arguments, bypass_cache)?;
        self.wake();
        Ok(CallHandle::new(
            marker,
            Arc::clone(&self.inner.engine),
            self.inner.wake.clone(),
        ))
    }

    fn wake(&self) {
        let _ = self.inner.wake.send(DriverEvent::Wake);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = lock(&self.inner.engine);
        f.debug_struct("Client")
            .field("endpoint", &engine.endpoint().to_string())
            .field("state", engine.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`] with injectable transports.
pub struct ClientBuilder {
    address: String,
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    prober: Option<Arc<dyn Prober>>,
    #[cfg(feature = "schema")]
    schemas: Option<Arc<SchemaRegistry>>,
}

impl ClientBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            config: ClientConfig::default(),
            connector: None,
            prober: None,
            #[cfg(feature = "schema")]
            schemas: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom duplex transport instead of WebSocket.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use a custom diagnostic probe instead of HTTP.
    pub fn prober(mut self, prober: impl Prober + 'static) -> Self {
        self.prober = Some(Arc::new(prober));
        self
    }

    /// Validate results against per-procedure schemas.
    #[cfg(feature = "schema")]
    pub fn schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(Arc::new(schemas));
        self
    }

    /// Validate the address, spawn the driver and start connecting.
    pub fn build(self) -> Result<Client> {
        let endpoint = Endpoint::parse(&self.address)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&self.config)?,
        };
        let prober = match self.prober {
            Some(prober) => prober,
            None => default_prober(&self.config)?,
        };

        let engine = Engine::new(endpoint, &self.config);
        #[cfg(feature = "schema")]
        let engine = match self.schemas {
            Some(schemas) => engine.with_schemas(schemas),
            None => engine,
        };
        let mut engine = engine;
        engine.connect()?;
        let engine = Arc::new(Mutex::new(engine));

        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventBus::new();
        let cancel = CancellationToken::new();
        let driver = Driver::new(DriverParts {
            engine: Arc::clone(&engine),
            events: events.clone(),
            connector,
            prober,
            connect_timeout: self.config.connect_timeout,
            probe_timeout: self.config.probe_timeout,
            tx: tx.clone(),
            rx,
            cancel: cancel.clone(),
        });
        runtime.spawn(driver.run());

        let client = Client {
            inner: Arc::new(Inner {
                engine,
                events,
                wake: tx,
                cancel,
            }),
        };
        client.wake();
        Ok(client)
    }
}

#[cfg(feature = "websocket")]
fn default_connector(config: &ClientConfig) -> Result<Arc<dyn Connector>> {
    Ok(Arc::new(rpcwire_transport::WebSocketConnector::with_timeout(
        config.connect_timeout,
    )))
}

#[cfg(not(feature = "websocket"))]
fn default_connector(_config: &ClientConfig) -> Result<Arc<dyn Connector>> {
    Err(ClientError::MissingCapability("connector"))
}

#[cfg(feature = "http-probe")]
fn default_prober(config: &ClientConfig) -> Result<Arc<dyn Prober>> {
    Ok(Arc::new(rpcwire_transport::HttpProber::with_timeout(
        config.probe_timeout,
    )))
}

#[cfg(not(feature = "http-probe"))]
fn default_prober(_config: &ClientConfig) -> Result<Arc<dyn Prober>> {
    Err(ClientError::MissingCapability("prober"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_address_fails_before_anything_runs() {
        for address in ["", "http://h/rpc", "not a url"] {
            assert!(matches!(
                Client::new(address),
                Err(ClientError::Transport(_))
            ));
        }
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        assert!(matches!(
            Client::new("ws://127.0.0.1:9/rpc"),
            Err(ClientError::NoRuntime)
        ));
    }
}
