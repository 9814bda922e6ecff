use std::time::Duration;

use rpcwire_frame::Marker;
use url::Url;

use crate::event::ClientEvent;

/// Identifies one call timeout registration.
pub type TimerId = u64;

/// Side effect requested by the engine and carried out by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a link to the address.
    Open(Url),
    /// Write one envelope on the open link.
    Send(String),
    /// Close the current link, or abandon the one being opened.
    Close,
    /// Run the diagnostic probe.
    Probe(Url),
    /// Report back with a reconnect tick after the delay.
    ScheduleReconnect(Duration),
    /// Report back with a timeout tick for `marker` after the delay.
    StartTimer {
        timer: TimerId,
        marker: Marker,
        after: Duration,
    },
    CancelTimer(TimerId),
    Publish(ClientEvent),
}

/// Pull every queued `Send` out of `out`, in order.
pub(crate) fn take_sends(out: &mut Vec<Action>) -> Vec<String> {
    let mut sends = Vec::new();
    out.retain(|action| match action {
        Action::Send(text) => {
            sends.push(text.clone());
            false
        }
        _ => true,
    });
    sends
}
