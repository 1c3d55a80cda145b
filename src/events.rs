// src/events.rs

//! Structured events published by the limiters.
//!
//! Every limiter owns an [`EventPublisher`]. Subscribers get their own
//! receiving end of a broadcast channel and drain it at their own pace;
//! a subscriber that falls more than the channel capacity behind loses the
//! oldest events rather than slowing the limiter down.

// dependencies
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LimitIncreased,
    LimitDecreased,
    CallPermitted,
    CallRejected,
    CallFinished,
}

/// A single event record.
#[derive(Debug, Clone)]
pub struct LimiterEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub kind: EventKind,
    pub metadata: HashMap<String, String>,
}

impl LimiterEvent {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Sending half of a limiter's event channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    name: String,
    sender: broadcast::Sender<LimiterEvent>,
}

impl EventPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a new receiver. It only sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.sender.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Publish an event. The metadata closure only runs when someone is
    /// listening.
    pub fn publish<F>(&self, kind: EventKind, metadata: F)
    where
        F: FnOnce() -> Vec<(&'static str, String)>,
    {
        if !self.has_subscribers() {
            return;
        }
        let event = LimiterEvent {
            name: self.name.clone(),
            timestamp: SystemTime::now(),
            kind,
            metadata: metadata()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        };
        // a send error only means every receiver was dropped in the meantime
        let _ = self.sender.send(event);
    }
}
