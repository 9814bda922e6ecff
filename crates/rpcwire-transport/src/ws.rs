use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Link, LinkCommand, LinkPeer};

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens links over WebSocket (`ws://` and `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector with the default handshake timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a connector with an explicit handshake timeout.
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Link> {
        let handshake = connect_async(url.as_str());
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                message: format!("handshake timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|err| TransportError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        tracing::debug!(url = %url, "websocket handshake complete");

        let (link, peer) = Link::pair();
        tokio::spawn(pump(stream, peer));
        Ok(link)
    }
}

/// Move frames between the socket and the link until either side ends.
///
/// If the socket goes away first, every send it did not write is handed back.
async fn pump(stream: WsStream, mut peer: LinkPeer) {
    let (mut write, mut read) = stream.split();
    let mut unsent = Vec::new();

    let closed_locally = loop {
        tokio::select! {
            command = peer.next_command() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(err) = write.send(Message::Text(text.clone())).await {
                        peer.fail(err.to_string());
                        unsent.push(text);
                        break false;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = write.close().await;
                    break true;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if peer.deliver(text).is_err() {
                        break true;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if peer.deliver(text).is_err() {
                            break true;
                        }
                    }
                    Err(_) => peer.fail("received a binary frame that is not UTF-8"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server closed the websocket");
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    peer.fail(err.to_string());
                    break false;
                }
                None => break false,
            },
        }
    };

    if !closed_locally {
        unsent.extend(peer.drain_sends());
        if !unsent.is_empty() {
            tracing::debug!(count = unsent.len(), "returning unwritten messages");
        }
        peer.return_unsent(unsent);
    }
    peer.close();
}
