//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, enabling testing and alternative transport
//! implementations: an in-process message channel drained by a dedicated
//! provider task, a logging sink, or nothing at all.

use tokio::sync::broadcast;

use super::ProviderEvent;

/// Trait for emitting provider events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits one event.
    fn emit(&self, event: ProviderEvent);
}

/// No-op emitter for tests that don't care about event output.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: ProviderEvent) {}
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit(&self, event: ProviderEvent) {
        tracing::debug!(?event, "provider_event");
    }
}

/// Emitter backed by a [`tokio::sync::broadcast`] channel, drained by
/// whatever subscribes (tests today, an external transport tomorrow).
/// Lagging subscribers drop the oldest events rather than blocking the
/// component that emitted them.
pub struct BroadcastEventEmitter {
    tx: broadcast::Sender<ProviderEvent>,
}

impl BroadcastEventEmitter {
    /// Creates a new emitter with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEventEmitter {
    fn emit(&self, event: ProviderEvent) {
        // No subscribers is a normal, expected state; ignore the error.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit(&self, _event: ProviderEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter {
            count: AtomicUsize::new(0),
        });
        emitter.emit(
            SessionEvent::Connected {
                player_id: "aa:bb:cc:dd:ee:01".into(),
            }
            .into(),
        );
        emitter.emit(
            SessionEvent::Disconnected {
                player_id: "aa:bb:cc:dd:ee:01".into(),
            }
            .into(),
        );
        assert_eq!(emitter.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broadcast_emitter_delivers_to_subscriber() {
        let emitter = BroadcastEventEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.emit(
            SessionEvent::Connected {
                player_id: "aa:bb:cc:dd:ee:01".into(),
            }
            .into(),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ProviderEvent::Session(SessionEvent::Connected {
                player_id: "aa:bb:cc:dd:ee:01".into()
            })
        );
    }

    #[test]
    fn broadcast_emitter_without_subscribers_does_not_panic() {
        let emitter = BroadcastEventEmitter::new(4);
        emitter.emit(
            SessionEvent::Disconnected {
                player_id: "x".into(),
            }
            .into(),
        );
    }
}
