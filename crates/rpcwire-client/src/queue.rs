use std::collections::VecDeque;

/// FIFO of serialized envelopes waiting for an open link.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope behind everything already queued.
    pub fn push(&mut self, text: String) {
        self.entries.push_back(text);
    }

    /// Put envelopes that never reached the wire back ahead of newer entries,
    /// keeping their relative order.
    pub fn requeue_front(&mut self, texts: Vec<String>) {
        for text in texts.into_iter().rev() {
            self.entries.push_front(text);
        }
    }

    /// Take every entry in enqueue order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<String> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
