//! Channel descriptions and lifecycle statuses.
//!
//! A [`ChannelSpec`] is a description of one subscription: its topic,
//! whether broadcasts are acknowledged, and the handlers for its events.
//! Specs are produced by a [`ChannelFactory`] so a channel can be rebuilt
//! from scratch whenever the old handle has to be thrown away.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ChannelError;
use crate::messages::Message;

/// Handler for one event on a channel.
pub type EventHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Description of a channel to join.
#[derive(Clone)]
pub struct ChannelSpec {
    topic: String,
    ack: bool,
    handlers: HashMap<String, EventHandler>,
}

impl ChannelSpec {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ack: false,
            handlers: HashMap::new(),
        }
    }

    /// Ask the server to acknowledge broadcasts sent on this channel.
    pub fn with_ack(mut self) -> Self {
        self.ack = true;
        self
    }

    /// Register a handler for `event`, replacing any previous one.
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Arc::new(handler));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn ack(&self) -> bool {
        self.ack
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// The handler for `event`, if any.
    pub fn handler(&self, event: &str) -> Option<EventHandler> {
        self.handlers.get(event).cloned()
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.handlers.keys().collect();
        events.sort();
        f.debug_struct("ChannelSpec")
            .field("topic", &self.topic)
            .field("ack", &self.ack)
            .field("events", &events)
            .finish()
    }
}

/// Builds a fresh [`ChannelSpec`] each time a channel is (re)created.
pub trait ChannelFactory: Send + Sync {
    fn create(&self) -> ChannelSpec;
}

impl<F> ChannelFactory for F
where
    F: Fn() -> ChannelSpec + Send + Sync,
{
    fn create(&self) -> ChannelSpec {
        self()
    }
}

/// Lifecycle status reported by the transport for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Joined,
    Closed,
    TimedOut,
    ChannelError(ChannelError),
}

/// A status tagged with the channel instance it belongs to.
///
/// Each join gets a fresh generation, so updates from a disposed channel
/// can be told apart from updates for its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub topic: String,
    pub generation: u64,
    pub status: ChannelStatus,
}

/// Options for a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Wait for the server to acknowledge the broadcast.
    pub ack: bool,
    /// How long to wait for the acknowledgement.
    pub timeout: Duration,
}

impl SendOptions {
    pub fn acked(timeout: Duration) -> Self {
        Self { ack: true, timeout }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            ack: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Ok,
    Error,
    TimedOut,
}

impl SendStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SendStatus::Ok)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SendStatus::Ok => "ok",
            SendStatus::Error => "error",
            SendStatus::TimedOut => "timed out",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_spec_builder() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let spec = ChannelSpec::new("precheck")
            .with_ack()
            .on("precheck-request", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(spec.topic(), "precheck");
        assert!(spec.ack());
        assert!(spec.handles("precheck-request"));
        assert!(spec.handler("other").is_none());

        let handler = spec.handler("precheck-request").unwrap();
        handler(Message::new("precheck-request", serde_json::Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_factory() {
        let factory = || ChannelSpec::new("db-changes");
        assert_eq!(factory.create().topic(), "db-changes");
    }
}
