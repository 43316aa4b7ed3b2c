//! Engine event broadcasting
//!
//! One-to-many notification of engine state changes over a
//! tokio::broadcast channel. Subscribers that fall behind lose the oldest
//! events rather than blocking the output cycle.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::audio::types::AudioFormat;

/// Engine lifecycle and device events.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A sink was opened (or reopened) with the negotiated format
    SinkOpened {
        device: String,
        format: AudioFormat,
        passthrough: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Opening the sink failed; the engine keeps running without output
    SinkFailed {
        device: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A stream joined the mix
    StreamAdded {
        stream_id: Uuid,
        format: AudioFormat,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A destroyed stream was reclaimed by the output cycle
    StreamRemoved {
        stream_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A draining stream ran out of data and finished playback
    StreamDrained {
        stream_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Master volume changed
    VolumeChanged {
        volume: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast channel for [`EngineEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events. Events emitted before subscription
    /// are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening.
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.emit_lossy(EngineEvent::VolumeChanged {
            volume: 0.5,
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit_lossy(EngineEvent::VolumeChanged {
            volume: 0.25,
            timestamp: chrono::Utc::now(),
        });
        match rx.try_recv().unwrap() {
            EngineEvent::VolumeChanged { volume, .. } => assert_eq!(volume, 0.25),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
