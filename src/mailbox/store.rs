//! Per-job message container.

use tracing::warn;

use super::types::RawMessage;

/// Holds the fetched messages for one job. Populated once, read-only after.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<RawMessage>,
    loaded: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the store. A second load is ignored.
    pub fn load(&mut self, messages: Vec<RawMessage>) {
        if self.loaded {
            warn!("MessageStore already loaded, ignoring second load");
            return;
        }
        self.messages = messages;
        self.loaded = true;
    }

    /// Read view over all messages, in fetch order.
    pub fn all(&self) -> &[RawMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
