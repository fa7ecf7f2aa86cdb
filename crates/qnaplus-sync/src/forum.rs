//! Per-program forum open/closed tracking.
//!
//! The updater persists probed states; a flip is stored together with its
//! `forum_change` outbox event and announced on `program-states`. Listeners
//! on that topic trigger a dispatch so the event goes out promptly instead
//! of waiting for the next scheduled run.

use std::sync::Arc;

use qnaplus_sync_core::{classify_forum, ForumState, ForumTransition};
use qnaplus_sync_realtime::{
    events, topics, ChannelSpec, ForumStateUpdate, Message, SendOptions, Transport,
};
use qnaplus_sync_store::Store;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Persists probed forum states and announces flips.
pub struct ForumStateUpdater {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
}

impl ForumStateUpdater {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Store `states`, returning the programs whose state flipped.
    ///
    /// A program seen for the first time is recorded without a transition.
    pub async fn apply(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>> {
        self.apply_inner(states).instrument(info_span!("forum_state")).await
    }

    async fn apply_inner(&self, states: &[ForumState]) -> Result<Vec<ForumTransition>> {
        let transitions = self.store.update_forum_states(states).await?;
        for transition in &transitions {
            info!(
                program = %transition.after.program,
                from = transition.before.open,
                to = transition.after.open,
                "forum state changed"
            );
            let update = ForumStateUpdate {
                program: transition.after.program.clone(),
                old_open: Some(transition.before.open),
                new_open: transition.after.open,
            };
            let message = Message::encode(events::FORUM_STATE_UPDATE, &update)?;
            let status = self
                .transport
                .send(topics::PROGRAM_STATES, message, SendOptions::default())
                .await;
            if !status.is_ok() {
                // The event is already in the outbox; the next run sends it.
                warn!(program = %update.program, status = %status, "forum state announcement not sent");
            }
        }
        Ok(transitions)
    }
}

/// Reacts to `forum_state_update` broadcasts by dispatching the outbox.
#[derive(Clone)]
pub struct ForumStateListener {
    dispatcher: Arc<Dispatcher>,
}

impl ForumStateListener {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Whether `update` is a real transition worth dispatching for.
    pub fn is_transition(update: &ForumStateUpdate) -> bool {
        let Some(old_open) = update.old_open else {
            warn!(
                program = %update.program,
                new_open = update.new_open,
                "unable to read previous forum state, ignoring update"
            );
            return false;
        };
        let before = ForumState::new(update.program.clone(), old_open);
        let after = ForumState::new(update.program.clone(), update.new_open);
        classify_forum(&before, &after).is_some()
    }

    /// Add the update handler to the `program-states` channel.
    pub fn attach(&self, spec: ChannelSpec) -> ChannelSpec {
        let listener = self.clone();
        spec.on(events::FORUM_STATE_UPDATE, move |message| {
            let update = match message.decode::<ForumStateUpdate>() {
                Ok(update) => update,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed forum state update");
                    return;
                }
            };
            if !Self::is_transition(&update) {
                debug!(program = %update.program, "forum state unchanged");
                return;
            }
            let dispatcher = listener.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.dispatch().await {
                    warn!(error = %e, "dispatch after forum state change failed");
                }
            });
        })
    }
}
