//! Engine events and the event bus
//!
//! The worker loop is the only producer of [`EngineEvent`]s; collaborators
//! observe the engine exclusively through them. The bus offers two delivery
//! paths: a tokio broadcast channel for async consumers, and synchronous
//! handler callbacks registered with a filter for collaborators that want
//! only a slice of the stream. Handlers run on the publishing thread and
//! must return quickly.

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::machine::{GcodeParserState, MachineState};

/// Everything the engine tells the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A status report was decoded and merged into a new snapshot
    StatusUpdated(MachineState),
    /// A `[GC:...]` parser-state report was decoded
    ParserStateUpdated(GcodeParserState),
    /// The oldest in-flight command was acknowledged with `ok`
    CommandAcknowledged {
        /// Sequence number of the acknowledged command.
        seq: u64,
    },
    /// The oldest in-flight command was rejected with `error:<n>`
    CommandFailed {
        /// Sequence number of the failed command.
        seq: u64,
        /// Numeric Grbl error code.
        code: u8,
        /// Human-readable description from the fixed error table.
        description: String,
    },
    /// The firmware raised `ALARM:<n>`; motion is locked out until `$X`
    AlarmRaised {
        /// Numeric Grbl alarm code.
        code: u8,
        /// Human-readable description from the fixed alarm table.
        description: String,
    },
    /// The transport failed while running; the connection is dead
    ConnectionLost {
        /// Text of the underlying transport error.
        reason: String,
    },
    /// The startup banner arrived; the engine is ready for commands
    InitializationComplete {
        /// Version string from the banner, e.g. `1.1h`.
        firmware_version: String,
    },
    /// No banner arrived within the timeout, even after a soft reset
    InitializationFailed,
    /// A settings or feedback line, passed through for display
    Message(String),
    /// A line no classifier recognized, preserved verbatim
    UnrecognizedLine(String),
}

/// Coarse event grouping used by subscription filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    /// Status and parser-state snapshots
    Status,
    /// Per-command acknowledgements and failures
    Command,
    /// Alarm conditions
    Alarm,
    /// Connection lifecycle
    Connection,
    /// Messages and unrecognized lines
    Diagnostic,
}

impl EngineEvent {
    /// Category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            Self::StatusUpdated(_) | Self::ParserStateUpdated(_) => EventCategory::Status,
            Self::CommandAcknowledged { .. } | Self::CommandFailed { .. } => EventCategory::Command,
            Self::AlarmRaised { .. } => EventCategory::Alarm,
            Self::ConnectionLost { .. }
            | Self::InitializationComplete { .. }
            | Self::InitializationFailed => EventCategory::Connection,
            Self::Message(_) | Self::UnrecognizedLine(_) => EventCategory::Diagnostic,
        }
    }
}

/// Async event consumer, registered through the engine
#[async_trait::async_trait]
pub trait EngineListener: Send + Sync {
    /// Called for every published event
    async fn on_event(&self, event: EngineEvent);
}

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event categories
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check whether an event passes this filter
    pub fn matches(&self, event: &EngineEvent) -> bool {
        match self {
            Self::All => true,
            Self::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type Handler = Box<dyn Fn(EngineEvent) + Send + Sync>;

/// Event distribution for one engine
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, Handler)>>,
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an event to all handlers and broadcast receivers.
    ///
    /// Returns how many consumers saw it. Zero consumers is not an error;
    /// the engine publishes unconditionally.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let handlers = self.handlers.read();
        let mut delivered = 0;
        for (filter, handler) in handlers.values() {
            if filter.matches(&event) {
                handler(event.clone());
                delivered += 1;
            }
        }
        delivered + self.sender.send(event).unwrap_or(0)
    }

    /// New broadcast receiver for async consumption
    pub fn receiver(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Register a synchronous handler; it runs on the publishing thread
    pub fn subscribe_fn<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("subscription {} added", id);
        id
    }

    /// Remove a handler; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("subscription {} removed", id);
        }
        removed
    }

    /// Number of registered synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn handler_receives_matching_events_only() {
        let bus = EventBus::new(16);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe_fn(
            EventFilter::Categories(vec![EventCategory::Alarm]),
            move |_| {
                seen2.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(EngineEvent::Message("hello".to_string()));
        bus.publish(EngineEvent::AlarmRaised {
            code: 1,
            description: "hard limit".to_string(),
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let bus = EventBus::new(16);
        let id = bus.subscribe_fn(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_receiver_sees_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.receiver();
        bus.publish(EngineEvent::CommandAcknowledged { seq: 7 });
        let event = rx.recv().await.expect("event");
        assert_eq!(event, EngineEvent::CommandAcknowledged { seq: 7 });
    }
}
