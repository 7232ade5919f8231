// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Message channel abstraction
//!
//! The publish/subscribe transport between the dashboard and the device
//! is an injected capability: [`MessageChannel`] covers the outbound
//! requests, and adapters deliver inbound traffic as typed
//! [`ChannelEvent`]s that the aggregator drains in arrival order.
//! Delivery is best effort, most recent wins.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use crate::error::ChannelError;

/// Statistics about channel usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetrics {
    /// Total payload bytes published
    pub bytes_published: u64,
    /// Total messages published
    pub messages_published: u64,
    /// Total messages delivered to us
    pub messages_received: u64,
    /// Number of reconnect requests
    pub reconnects: u64,
}

/// Inbound traffic produced by a channel adapter
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A message arrived on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Connection established (or re-established)
    Connected,
    /// Connection lost
    Disconnected,
    /// Transport reported an error
    Error(ChannelError),
}

impl ChannelEvent {
    /// Convenience constructor for a message event
    pub fn message(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        ChannelEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Trait for publish/subscribe channels
pub trait MessageChannel {
    /// Subscribe to a set of topics
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError>;

    /// Unsubscribe from a set of topics
    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError>;

    /// Publish a payload on a topic
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError>;

    /// Check if the channel is currently connected
    fn is_connected(&self) -> bool;

    /// Ask the transport to reconnect
    fn reconnect(&mut self) -> Result<(), ChannelError>;

    /// Get channel metrics
    fn metrics(&self) -> ChannelMetrics;
}

#[derive(Debug, Default)]
struct MemoryChannelState {
    connected: bool,
    subscriptions: BTreeSet<String>,
    published: Vec<(String, Vec<u8>)>,
    incoming: VecDeque<ChannelEvent>,
    fail_subscribe: bool,
    fail_publish: bool,
    metrics: ChannelMetrics,
}

/// In-memory channel for tests and local wiring
///
/// Cloning yields another handle to the same channel, so the aggregator
/// and the command publisher can each hold one.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    state: Rc<RefCell<MemoryChannelState>>,
}

impl MemoryChannel {
    /// Create a connected channel
    pub fn new() -> Self {
        let state = MemoryChannelState {
            connected: true,
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Create a channel that starts disconnected
    pub fn disconnected() -> Self {
        let channel = Self::new();
        channel.set_connected(false);
        channel
    }

    /// Force the connection flag
    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    /// Make subsequent subscribe calls fail
    pub fn fail_subscriptions(&self, fail: bool) {
        self.state.borrow_mut().fail_subscribe = fail;
    }

    /// Make subsequent publish calls fail
    pub fn fail_publishes(&self, fail: bool) {
        self.state.borrow_mut().fail_publish = fail;
    }

    /// Queue an inbound message (simulate broker delivery)
    pub fn push_message(&self, topic: &str, payload: &[u8]) {
        self.push_event(ChannelEvent::message(topic, payload));
    }

    /// Queue any inbound event
    pub fn push_event(&self, event: ChannelEvent) {
        self.state.borrow_mut().incoming.push_back(event);
    }

    /// Take every queued inbound event, oldest first
    pub fn take_events(&self) -> Vec<ChannelEvent> {
        let mut state = self.state.borrow_mut();
        let events: Vec<_> = state.incoming.drain(..).collect();
        state.metrics.messages_received += events
            .iter()
            .filter(|e| matches!(e, ChannelEvent::Message { .. }))
            .count() as u64;
        events
    }

    /// Everything published so far, in order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().published.clone()
    }

    /// Currently subscribed topics
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.iter().cloned().collect()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel for MemoryChannel {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        if state.fail_subscribe {
            return Err(ChannelError::Refused {
                reason: "subscription rejected".to_string(),
            });
        }
        if !state.connected {
            return Err(ChannelError::Disconnected {
                reason: "not connected".to_string(),
            });
        }
        state
            .subscriptions
            .extend(topics.iter().map(|t| t.to_string()));
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        for topic in topics {
            state.subscriptions.remove(*topic);
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        if state.fail_publish || !state.connected {
            return Err(ChannelError::Disconnected {
                reason: "Channel is closed".to_string(),
            });
        }

        state.published.push((topic.to_string(), payload.to_vec()));
        state.metrics.bytes_published += payload.len() as u64;
        state.metrics.messages_published += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn reconnect(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.borrow_mut();
        state.metrics.reconnects += 1;
        state.connected = true;
        Ok(())
    }

    fn metrics(&self) -> ChannelMetrics {
        self.state.borrow().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_channel_publish() {
        let mut channel = MemoryChannel::new();
        channel.publish("hour", b"3").unwrap();

        assert_eq!(channel.published(), vec![("hour".to_string(), b"3".to_vec())]);
        let metrics = channel.metrics();
        assert_eq!(metrics.messages_published, 1);
        assert_eq!(metrics.bytes_published, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let mut a = MemoryChannel::new();
        let b = a.clone();
        a.publish("mode", b"2").unwrap();
        assert_eq!(b.published().len(), 1);
    }

    #[test]
    fn test_disconnected_rejects_publish_and_subscribe() {
        let mut channel = MemoryChannel::disconnected();
        assert!(channel.publish("hour", b"1").is_err());
        assert!(channel.subscribe(&["sensor/tds"]).is_err());

        channel.reconnect().unwrap();
        assert!(channel.is_connected());
        assert!(channel.subscribe(&["sensor/tds"]).is_ok());
        assert_eq!(channel.metrics().reconnects, 1);
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut channel = MemoryChannel::new();
        channel.subscribe(&["sensor/tds", "sensor/turbidity"]).unwrap();
        assert_eq!(channel.subscriptions().len(), 2);

        channel.unsubscribe(&["sensor/tds"]).unwrap();
        assert_eq!(channel.subscriptions(), vec!["sensor/turbidity".to_string()]);
    }

    #[test]
    fn test_events_drain_in_order() {
        let channel = MemoryChannel::new();
        channel.push_event(ChannelEvent::Connected);
        channel.push_message("sensor/tds", b"1");
        channel.push_message("sensor/tds", b"2");

        let events = channel.take_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ChannelEvent::Connected);
        assert_eq!(events[2], ChannelEvent::message("sensor/tds", b"2".to_vec()));
        assert!(channel.take_events().is_empty());
        assert_eq!(channel.metrics().messages_received, 2);
    }

    #[test]
    fn test_subscription_fault_injection() {
        let mut channel = MemoryChannel::new();
        channel.fail_subscriptions(true);
        assert!(matches!(
            channel.subscribe(&["sensor/tds"]),
            Err(ChannelError::Refused { .. })
        ));
    }
}
