//! Existence checks for question ids.
//!
//! Clients broadcast `{room, id}` on the `precheck` topic and listen on a
//! room of their own. The responder asks the upstream forum whether the
//! question exists and answers `{exists}` on that room.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qnaplus_sync_core::QuestionId;
use qnaplus_sync_realtime::{
    events, ChannelSpec, Message, PrecheckRequest, PrecheckResponse, SendOptions, SendStatus,
    Transport,
};
use tracing::{error, info, info_span, warn, Instrument};

/// Answers whether a question exists upstream.
#[async_trait]
pub trait PrecheckProbe: Send + Sync {
    /// Any failure to reach the question counts as "does not exist".
    async fn exists(&self, id: QuestionId) -> bool;
}

/// Serves precheck requests.
#[derive(Clone)]
pub struct PrecheckResponder {
    probe: Arc<dyn PrecheckProbe>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl PrecheckResponder {
    pub fn new(probe: Arc<dyn PrecheckProbe>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            probe,
            transport,
            timeout,
        }
    }

    /// Probe and answer one request on its room.
    pub async fn respond(&self, request: PrecheckRequest) -> SendStatus {
        let span = info_span!("precheck", id = %request.id, room = %request.room);
        async {
            info!("received precheck request");
            let exists = self.probe.exists(request.id).await;
            info!(exists, "precheck probed");

            let message = match Message::encode(events::PRECHECK_RESPONSE, &PrecheckResponse { exists }) {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "failed to encode precheck response");
                    return SendStatus::Error;
                }
            };

            // The room is a one-shot channel: send with ack, then leave.
            let status = self
                .transport
                .send(&request.room, message, SendOptions::acked(self.timeout))
                .await;
            if status.is_ok() {
                info!("precheck response sent");
            } else {
                warn!(status = %status, "failed to send precheck response");
            }
            if let Err(e) = self.transport.leave(&request.room, 0).await {
                warn!(error = %e, "failed to leave precheck room");
            }
            status
        }
        .instrument(span)
        .await
    }

    /// Add the request handler to the `precheck` channel.
    pub fn attach(&self, spec: ChannelSpec) -> ChannelSpec {
        let responder = self.clone();
        spec.on(events::PRECHECK_REQUEST, move |message| {
            let request = match message.decode::<PrecheckRequest>() {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed precheck request");
                    return;
                }
            };
            let responder = responder.clone();
            tokio::spawn(async move {
                responder.respond(request).await;
            });
        })
    }
}
