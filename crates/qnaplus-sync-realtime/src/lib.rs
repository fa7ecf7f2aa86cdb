//! # qnaplus sync realtime
//!
//! Named broadcast channels and the manager that keeps them subscribed.
//!
//! ## Overview
//!
//! Channels are described by [`ChannelSpec`]s built from a
//! [`ChannelFactory`]. The [`SubscriptionManager`] joins them on a
//! [`Transport`], tracks each topic's lifecycle, and rebuilds a channel
//! from its factory when the server rejects it with an expired token.
//!
//! ## Key Properties
//!
//! - **Single live channel**: a topic never has two joined instances
//! - **Bounded retry**: credential-expiry resubscribes back off
//!   exponentially and stop after a fixed number of attempts
//! - **Stale-safe**: statuses from a disposed instance are ignored
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qnaplus_sync_realtime::{
//!     topics, BackoffPolicy, ChannelSpec, MemoryTransport, SubscriptionCallbacks,
//!     SubscriptionManager,
//! };
//!
//! async fn example() {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let manager = SubscriptionManager::new(transport, BackoffPolicy::default());
//!
//!     manager
//!         .add(
//!             || ChannelSpec::new(topics::DB_CHANGES).on("question_update", |_msg| {}),
//!             SubscriptionCallbacks::new().on_subscribe(|topic| println!("joined {topic}")),
//!         )
//!         .await;
//!
//!     let stop = manager.start().await;
//!     // ...
//!     stop.stop().await;
//! }
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! add ──> Created ──start──> Joining ──> Joined
//!                               ^          │ expired token
//!                               └─ Backoff <┘
//! ```

pub mod backoff;
pub mod channel;
pub mod error;
pub mod manager;
pub mod messages;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use channel::{
    ChannelFactory, ChannelSpec, ChannelStatus, EventHandler, SendOptions, SendStatus,
    StatusUpdate,
};
pub use error::{ChannelError, RealtimeError, Result};
pub use manager::{StopHandle, SubscriptionCallbacks, SubscriptionManager, TopicState, Unregister};
pub use messages::{
    events, topics, ForumStateUpdate, Message, PrecheckRequest, PrecheckResponse, RenotifyPayload,
};
pub use transport::memory::MemoryTransport;
pub use transport::{StatusSender, Transport};
