//! Notification bus
//!
//! A thin topic filter over a tokio broadcast channel. Emitting never blocks
//! and never fails; an event nobody listens to is simply dropped.

use std::collections::HashSet;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::messages::Event;

/// Default capacity of the broadcast channel
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; returns the number of receivers it reached
    pub fn emit(&self, event: Event) -> usize {
        let topic = event.topic.clone();
        match self.tx.send(event) {
            Ok(n) => {
                tracing::trace!(topic = %topic, receivers = n, "Emitted event");
                n
            }
            Err(_) => 0,
        }
    }

    /// Listen to a set of topics
    ///
    /// Patterns are exact topics, `*` for everything, or a prefix ending in
    /// `*` (`new-*` matches `new-item`).
    pub fn subscribe<I, S>(&self, topics: I) -> EventStream
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventStream {
            rx: self.tx.subscribe(),
            patterns: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn subscribe_all(&self) -> EventStream {
        self.subscribe(["*"])
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Filtered receiving end of an `EventBus`
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
    patterns: HashSet<String>,
}

impl EventStream {
    fn accepts(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| topic_matches(p, topic))
    }

    /// Next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event.topic) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event.topic) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every matching event already queued
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" || pattern == topic {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::messages::Payload;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("*", "new-item"));
        assert!(topic_matches("new-item", "new-item"));
        assert!(topic_matches("new-*", "new-item"));
        assert!(!topic_matches("new-*", "deleted-item-pk"));
        assert!(!topic_matches("new-item", "new-items"));
    }

    #[tokio::test]
    async fn test_subscribe_filters_topics() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe(["new-item"]);

        bus.emit(Event::got_data());
        bus.emit(Event::inserted("item", vec![]));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.topic, "new-item");
        assert!(matches!(event.payload, Payload::New { .. }));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_emit_without_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(Event::got_data()), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers() {
        let bus = EventBus::new(2);
        let mut stream = bus.subscribe_all();
        for _ in 0..5 {
            bus.emit(Event::got_data());
        }
        bus.emit(Event::refresh());

        let events = stream.drain();
        assert_eq!(events.last().unwrap().topic, "refresh");
        assert!(events.len() <= 2);
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe_all();
        drop(bus);
        assert!(stream.recv().await.is_none());
    }
}
