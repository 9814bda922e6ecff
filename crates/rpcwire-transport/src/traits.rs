use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Result, TransportError};

/// HTTP status the probe interprets as an authorization failure.
pub const UNAUTHORIZED: u16 = 401;

/// Something that happened on a link, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A complete text message.
    Message(String),
    /// A transport-level error. The link may still close afterwards.
    Error(String),
    /// Messages accepted for sending that never reached the wire, oldest first.
    /// The link is unusable from here on.
    Unsent(Vec<String>),
    /// The link is closed; no further events follow.
    Closed,
}

/// An instruction for the remote side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Write one text message.
    Send(String),
    /// Close the link.
    Close,
}

/// Cloneable write half of a [`Link`].
#[derive(Debug, Clone)]
pub struct LinkSender {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkSender {
    /// Queue a text message for writing.
    pub fn send(&self, text: String) -> Result<()> {
        self.commands
            .send(LinkCommand::Send(text))
            .map_err(|_| TransportError::Closed)
    }

    /// Ask the transport to close. Closing an already closed link is a no-op.
    pub fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }

    /// Whether the transport side has gone away.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// An open, message-oriented duplex link.
///
/// The transport behind it is reached only through channels, so a link can be
/// backed by a WebSocket, an in-memory peer, or anything else that pumps text.
#[derive(Debug)]
pub struct Link {
    sender: LinkSender,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Create an in-memory link and the peer that plays the transport role.
    pub fn pair() -> (Link, LinkPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let link = Link {
            sender: LinkSender {
                commands: command_tx,
            },
            events: event_rx,
        };
        let peer = LinkPeer {
            commands: command_rx,
            events: event_tx,
        };
        (link, peer)
    }

    /// Borrow the write half.
    pub fn sender(&self) -> &LinkSender {
        &self.sender
    }

    /// Wait for the next event. Returns `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Split into the write half and the event stream.
    pub fn into_parts(self) -> (LinkSender, mpsc::UnboundedReceiver<LinkEvent>) {
        (self.sender, self.events)
    }
}

/// The transport side of a [`Link`].
#[derive(Debug)]
pub struct LinkPeer {
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkPeer {
    /// Wait for the next command from the link owner.
    ///
    /// Returns `None` once the owner dropped its [`Link`] and every sender.
    pub async fn next_command(&mut self) -> Option<LinkCommand> {
        self.commands.recv().await
    }

    /// Take a command if one is already queued.
    pub fn try_next_command(&mut self) -> Option<LinkCommand> {
        self.commands.try_recv().ok()
    }

    /// Deliver a text message to the link owner.
    pub fn deliver(&self, text: impl Into<String>) -> Result<()> {
        self.events
            .send(LinkEvent::Message(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Report a transport error.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Error(message.into()));
    }

    /// Hand back messages that could not be written.
    pub fn return_unsent(&self, texts: Vec<String>) {
        if !texts.is_empty() {
            let _ = self.events.send(LinkEvent::Unsent(texts));
        }
    }

    /// Take every queued `Send` without waiting, stopping at a `Close`.
    pub fn drain_sends(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(LinkCommand::Send(text)) = self.try_next_command() {
            texts.push(text);
        }
        texts
    }

    /// Report that the link is closed.
    pub fn close(&self) {
        let _ = self.events.send(LinkEvent::Closed);
    }
}

/// Opens duplex links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a link to `url`. An error counts as an immediate close.
    async fn open(&self, url: &Url) -> Result<Link>;
}

/// Result of the diagnostic probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered with a status other than 401.
    Reachable(u16),
    /// The server answered 401.
    Unauthorized,
    /// No response was obtained.
    Unreachable(String),
}

impl ProbeOutcome {
    /// Classify a completed response by status.
    pub fn from_status(status: u16) -> Self {
        if status == UNAUTHORIZED {
            Self::Unauthorized
        } else {
            Self::Reachable(status)
        }
    }
}

/// Performs the one-shot request/response diagnostic probe.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Issue a side-effect-free request against `url`.
    async fn probe(&self, url: &Url) -> ProbeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_commands_and_events_in_order() {
        let (mut link, mut peer) = Link::pair();

        link.sender().send("one".to_string()).unwrap();
        link.sender().send("two".to_string()).unwrap();
        link.sender().close();

        assert_eq!(
            peer.next_command().await,
            Some(LinkCommand::Send("one".to_string()))
        );
        assert_eq!(
            peer.next_command().await,
            Some(LinkCommand::Send("two".to_string()))
        );
        assert_eq!(peer.next_command().await, Some(LinkCommand::Close));

        peer.deliver("reply").unwrap();
        peer.fail("reset");
        peer.close();

        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Message("reply".to_string()))
        );
        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Error("reset".to_string()))
        );
        assert_eq!(link.next_event().await, Some(LinkEvent::Closed));
    }

    #[tokio::test]
    async fn unwritten_sends_can_be_handed_back() {
        let (mut link, mut peer) = Link::pair();
        link.sender().send("a".to_string()).unwrap();
        link.sender().send("b".to_string()).unwrap();
        link.sender().close();
        link.sender().send("after close".to_string()).unwrap();

        let unsent = peer.drain_sends();
        assert_eq!(unsent, vec!["a".to_string(), "b".to_string()]);

        peer.return_unsent(Vec::new());
        peer.return_unsent(unsent);
        peer.close();

        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Unsent(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(link.next_event().await, Some(LinkEvent::Closed));
    }

    #[tokio::test]
    async fn dropped_peer_closes_both_directions() {
        let (mut link, peer) = Link::pair();
        drop(peer);

        assert!(link.sender().is_closed());
        assert!(matches!(
            link.sender().send("late".to_string()),
            Err(TransportError::Closed)
        ));
        assert_eq!(link.next_event().await, None);
    }

    #[test]
    fn probe_status_classification() {
        assert_eq!(ProbeOutcome::from_status(401), ProbeOutcome::Unauthorized);
        assert_eq!(ProbeOutcome::from_status(200), ProbeOutcome::Reachable(200));
        assert_eq!(ProbeOutcome::from_status(403), ProbeOutcome::Reachable(403));
        assert_eq!(ProbeOutcome::from_status(500), ProbeOutcome::Reachable(500));
    }
}
