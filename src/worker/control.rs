//! Control Channel
//!
//! Out-of-band commands delivered by message passing: force-activate, seed,
//! clear, version query, plus the background sync and push triggers whose
//! business logic belongs to a collaborator behind `BackgroundHooks`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::registration::Registration;
use crate::cache::StoreError;

/// Capacity of the control queue
const CONTROL_QUEUE_DEPTH: usize = 64;

/// Reply to a version query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// Commands accepted by the control channel
#[derive(Debug)]
pub enum ControlMessage {
    /// Leave the Waiting state immediately
    SkipWaiting,
    /// Add URLs to the current core store
    CacheUrls { urls: Vec<String> },
    /// Delete every store
    ClearCache,
    /// Report the current generation tag on the provided channel
    GetVersion { reply: oneshot::Sender<VersionReply> },
    /// Deferred background sync
    Sync { tag: String },
    /// Push message; the notification is shown before the message counts as handled
    Push { payload: serde_json::Value },
}

impl ControlMessage {
    fn kind(&self) -> &'static str {
        match self {
            ControlMessage::SkipWaiting => "SKIP_WAITING",
            ControlMessage::CacheUrls { .. } => "CACHE_URLS",
            ControlMessage::ClearCache => "CLEAR_CACHE",
            ControlMessage::GetVersion { .. } => "GET_VERSION",
            ControlMessage::Sync { .. } => "SYNC",
            ControlMessage::Push { .. } => "PUSH",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("No active worker")]
    NoActiveWorker,

    #[error("Nothing is waiting to activate")]
    NothingWaiting,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Reply channel closed")]
    ReplyDropped,

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("Background hook failed: {0}")]
    Hook(String),
}

/// Collaborator hooks for the auxiliary triggers
#[async_trait]
pub trait BackgroundHooks: Send + Sync {
    async fn on_sync(&self, tag: &str) -> anyhow::Result<()>;

    async fn show_notification(&self, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// Hooks that only record that the trigger fired
pub struct LoggingHooks;

#[async_trait]
impl BackgroundHooks for LoggingHooks {
    async fn on_sync(&self, tag: &str) -> anyhow::Result<()> {
        info!(tag = tag, "Background sync triggered");
        Ok(())
    }

    async fn show_notification(&self, payload: &serde_json::Value) -> anyhow::Result<()> {
        info!(payload = %payload, "Push notification received");
        Ok(())
    }
}

/// Handle one control message against the registration
///
/// Returns a short human-readable summary of what was done.
pub async fn dispatch(
    registration: &Registration,
    message: ControlMessage,
) -> Result<String, ControlError> {
    debug!(kind = message.kind(), "Dispatching control message");

    match message {
        ControlMessage::SkipWaiting => {
            if registration.skip_waiting().await {
                Ok("Waiting generation activated".to_string())
            } else {
                Err(ControlError::NothingWaiting)
            }
        }

        ControlMessage::CacheUrls { urls } => {
            let worker = registration.active().await.ok_or(ControlError::NoActiveWorker)?;
            let report = worker.seed(&urls).await;
            info!(
                generation = worker.generation(),
                cached = report.cached,
                failed = report.failed.len(),
                "Seeded core store"
            );
            Ok(format!("Cached {} of {} URLs", report.cached, urls.len()))
        }

        ControlMessage::ClearCache => {
            let removed = registration.storage().clear().await?;
            Ok(format!("Deleted {} stores", removed))
        }

        ControlMessage::GetVersion { reply } => {
            let version = registration.current_version().await.unwrap_or_default();
            reply
                .send(VersionReply { version: version.clone() })
                .map_err(|_| ControlError::ReplyDropped)?;
            Ok(version)
        }

        ControlMessage::Sync { tag } => {
            registration
                .hooks()
                .on_sync(&tag)
                .await
                .map_err(|e| ControlError::Hook(e.to_string()))?;
            Ok(format!("Sync '{}' handled", tag))
        }

        ControlMessage::Push { payload } => {
            registration
                .hooks()
                .show_notification(&payload)
                .await
                .map_err(|e| ControlError::Hook(e.to_string()))?;
            Ok("Notification shown".to_string())
        }
    }
}

/// A queued message and where to report its outcome
struct Envelope {
    message: ControlMessage,
    ack: Option<oneshot::Sender<Result<String, ControlError>>>,
}

/// Sending half of the control channel
///
/// Each message is handled in its own task; there is no ordering between messages.
#[derive(Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<Envelope>,
}

impl ControlChannel {
    /// Start the dispatch loop for `registration`
    pub fn spawn(registration: Arc<Registration>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(CONTROL_QUEUE_DEPTH);

        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let registration = Arc::clone(&registration);
                tokio::spawn(async move {
                    let kind = envelope.message.kind();
                    let result = dispatch(&registration, envelope.message).await;
                    if let Err(e) = &result {
                        error!(kind = kind, error = %e, "Control message failed");
                    }
                    if let Some(ack) = envelope.ack {
                        let _ = ack.send(result);
                    }
                });
            }
            debug!("Control channel closed");
        });

        (Self { tx }, handle)
    }

    /// Fire and forget
    pub async fn send(&self, message: ControlMessage) -> Result<(), ControlError> {
        self.tx
            .send(Envelope { message, ack: None })
            .await
            .map_err(|_| ControlError::ChannelClosed)
    }

    /// Send and wait for the outcome
    pub async fn request(&self, message: ControlMessage) -> Result<String, ControlError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                ack: Some(ack),
            })
            .await
            .map_err(|_| ControlError::ChannelClosed)?;
        done.await.map_err(|_| ControlError::ChannelClosed)?
    }

    /// Ask for the current generation tag
    pub async fn version(&self) -> Result<VersionReply, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::GetVersion { reply }).await?;
        rx.await.map_err(|_| ControlError::ReplyDropped)
    }
}
