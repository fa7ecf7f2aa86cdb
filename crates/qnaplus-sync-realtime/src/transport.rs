//! Transport abstraction for realtime channels.
//!
//! A transport joins channels described by [`ChannelSpec`]s, delivers
//! incoming messages to their handlers, and reports lifecycle statuses
//! back through a [`StatusUpdate`] sender. Implementations may use
//! WebSockets or anything else that can carry named broadcasts.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::{ChannelSpec, SendOptions, SendStatus, StatusUpdate};
use crate::error::Result;
use crate::messages::Message;

/// Sender half used by transports to report channel statuses.
pub type StatusSender = mpsc::UnboundedSender<StatusUpdate>;

/// Transport trait for realtime channels.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `spec.topic()`.
    ///
    /// Statuses for this channel (including the eventual `Joined` or a
    /// join failure) are reported on `status`, tagged with `generation`.
    async fn join(&self, spec: ChannelSpec, generation: u64, status: StatusSender) -> Result<()>;

    /// Unsubscribe the channel instance `generation` on `topic`.
    ///
    /// Leaving an instance that is already gone is not an error.
    async fn leave(&self, topic: &str, generation: u64) -> Result<()>;

    /// Broadcast `message` on `topic`.
    async fn send(&self, topic: &str, message: Message, options: SendOptions) -> SendStatus;
}

/// An in-process transport hub.
///
/// Every send is delivered to every live channel on the same topic,
/// including channels joined by the sender. Tests can script join
/// outcomes and send results, and inject statuses into live channels.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    use crate::channel::{ChannelStatus, EventHandler};
    use crate::error::RealtimeError;

    struct LiveChannel {
        spec: ChannelSpec,
        generation: u64,
        status: StatusSender,
    }

    #[derive(Default)]
    struct Hub {
        live: HashMap<String, Vec<LiveChannel>>,
        join_script: HashMap<String, VecDeque<ChannelStatus>>,
        send_script: VecDeque<SendStatus>,
        joins: HashMap<String, usize>,
        sent: Vec<(String, Message)>,
    }

    /// In-memory transport implementation.
    #[derive(Clone, Default)]
    pub struct MemoryTransport {
        hub: Arc<RwLock<Hub>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the statuses the next joins on `topic` report instead of
        /// `Joined`, in order.
        pub async fn script_joins<I>(&self, topic: &str, statuses: I)
        where
            I: IntoIterator<Item = ChannelStatus>,
        {
            self.hub
                .write()
                .await
                .join_script
                .entry(topic.to_string())
                .or_default()
                .extend(statuses);
        }

        /// Queue results for the next sends, in order.
        pub async fn script_sends<I>(&self, results: I)
        where
            I: IntoIterator<Item = SendStatus>,
        {
            self.hub.write().await.send_script.extend(results);
        }

        /// Report `status` for every live channel on `topic`.
        pub async fn inject_status(&self, topic: &str, status: ChannelStatus) {
            let hub = self.hub.read().await;
            for channel in hub.live.get(topic).into_iter().flatten() {
                let _ = channel.status.send(StatusUpdate {
                    topic: topic.to_string(),
                    generation: channel.generation,
                    status: status.clone(),
                });
            }
        }

        /// Deliver `message` to live channels on `topic` without recording
        /// it as sent. Stands in for a message from another process.
        pub async fn deliver(&self, topic: &str, message: Message) -> usize {
            let handlers = self.handlers_for(topic, &message.event).await;
            let delivered = handlers.len();
            for handler in handlers {
                handler(message.clone());
            }
            delivered
        }

        /// Number of live channel instances on `topic`.
        pub async fn live_channels(&self, topic: &str) -> usize {
            self.hub.read().await.live.get(topic).map_or(0, Vec::len)
        }

        /// Number of joins ever issued for `topic`.
        pub async fn join_count(&self, topic: &str) -> usize {
            self.hub.read().await.joins.get(topic).copied().unwrap_or(0)
        }

        /// Messages sent on `topic`, in order.
        pub async fn sent(&self, topic: &str) -> Vec<Message> {
            self.hub
                .read()
                .await
                .sent
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, m)| m.clone())
                .collect()
        }

        async fn handlers_for(&self, topic: &str, event: &str) -> Vec<EventHandler> {
            let hub = self.hub.read().await;
            hub.live
                .get(topic)
                .into_iter()
                .flatten()
                .filter_map(|channel| channel.spec.handler(event))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn join(&self, spec: ChannelSpec, generation: u64, status: StatusSender) -> Result<()> {
            let topic = spec.topic().to_string();
            let mut hub = self.hub.write().await;
            *hub.joins.entry(topic.clone()).or_default() += 1;

            let outcome = hub
                .join_script
                .get_mut(&topic)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ChannelStatus::Joined);

            status
                .send(StatusUpdate {
                    topic: topic.clone(),
                    generation,
                    status: outcome,
                })
                .map_err(|_| RealtimeError::Stopped)?;

            hub.live.entry(topic).or_default().push(LiveChannel {
                spec,
                generation,
                status,
            });
            Ok(())
        }

        async fn leave(&self, topic: &str, generation: u64) -> Result<()> {
            let mut hub = self.hub.write().await;
            if let Some(channels) = hub.live.get_mut(topic) {
                channels.retain(|channel| channel.generation != generation);
                if channels.is_empty() {
                    hub.live.remove(topic);
                }
            }
            Ok(())
        }

        async fn send(&self, topic: &str, message: Message, _options: SendOptions) -> SendStatus {
            let result = {
                let mut hub = self.hub.write().await;
                hub.sent.push((topic.to_string(), message.clone()));
                hub.send_script.pop_front().unwrap_or(SendStatus::Ok)
            };
            if result.is_ok() {
                self.deliver(topic, message).await;
            }
            result
        }
    }
}
