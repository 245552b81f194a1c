//! Broadcast-based typed event emitter.
//!
//! The kernel and the runtime each own one emitter over their own event enum.

use tokio::sync::broadcast;

/// Default broadcast channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Typed fan-out over a broadcast channel.
///
/// `emit` never awaits. Receivers that fall more than `capacity` events
/// behind observe `RecvError::Lagged` instead of blocking the sender.
pub struct EventEmitter<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventEmitter<E> {
    /// Emitter whose channel holds `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit to all current subscribers; returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receiver for every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_reaches_nobody() {
        let emitter = EventEmitter::<u32>::with_capacity(DEFAULT_CAPACITY);
        assert_eq!(emitter.emit(1), 0);
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_events_in_order() {
        let emitter = EventEmitter::with_capacity(8);
        let _ = emitter.emit("dropped");
        let mut rx = emitter.subscribe();
        let _ = emitter.emit("a");
        let _ = emitter.emit("b");
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let emitter = EventEmitter::with_capacity(2);
        let mut rx = emitter.subscribe();
        for i in 0..3 {
            let _ = emitter.emit(i);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let emitter = EventEmitter::with_capacity(0);
        let _rx = emitter.subscribe();
        assert_eq!(emitter.emit(7), 1);
    }
}
