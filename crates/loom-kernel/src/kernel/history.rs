//! Bounded, insertion-ordered message history.

use std::collections::VecDeque;

use loom_core::messages::{Message, MessageDelta, ReplyMessage};

/// Sliding window over the most recent messages.
///
/// Messages are keyed by id. Pushing an id that is already buffered replaces
/// that entry in place; pushing a new id appends and evicts the oldest
/// entries once `limit` is exceeded. Eviction order is insertion order, not
/// access order.
#[derive(Clone, Debug)]
pub struct MessageBuffer {
    limit: usize,
    messages: VecDeque<Message>,
}

impl MessageBuffer {
    /// Empty buffer holding at most `limit` messages (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            messages: VecDeque::with_capacity(limit.min(256)),
        }
    }

    /// Buffer seeded with `messages`, keeping the last `limit`.
    pub fn seeded(limit: usize, messages: impl IntoIterator<Item = Message>) -> Self {
        let mut buffer = Self::new(limit);
        for message in messages {
            let _ = buffer.push(message);
        }
        buffer
    }

    /// Insert or replace `message`; returns evicted messages, oldest first.
    pub fn push(&mut self, message: Message) -> Vec<Message> {
        if let Some(slot) = self.position(message.id()) {
            self.messages[slot] = message;
            return Vec::new();
        }
        self.messages.push_back(message);
        let overflow = self.messages.len().saturating_sub(self.limit);
        self.messages.drain(..overflow).collect()
    }

    /// Fold a reply delta into the buffered reply with the same id.
    ///
    /// A delta for an unknown id first materializes an empty reply.
    pub fn apply_delta(&mut self, delta: &MessageDelta) -> Vec<Message> {
        let text = delta.delta.text();
        if let Some(slot) = self.position(&delta.id) {
            if let Message::Reply(reply) = &mut self.messages[slot] {
                reply.text.push_str(text);
            }
            return Vec::new();
        }
        self.push(Message::Reply(ReplyMessage {
            id: delta.id.clone(),
            timestamp: delta.timestamp,
            text: text.to_owned(),
        }))
    }

    /// Buffered message by id.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.position(id).map(|i| &self.messages[i])
    }

    /// Whether `id` is buffered.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Oldest-first copy of the buffer.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of buffered messages.
    pub fn limit(&self) -> usize {
        self.limit
    }

    // Recent messages are the ones updated, so scan from the back.
    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id() == id)
    }
}
