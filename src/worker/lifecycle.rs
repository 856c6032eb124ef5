//! Lifecycle Manager
//!
//! Installing → Waiting → Activating → Activated → Redundant.
//! Install pre-warms the core store; activation sweeps stale generations and
//! claims the open clients. State changes are published on a watch channel.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::clients::Clients;
use super::WorkerContext;
use crate::net::{FetchMode, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Activated,
    /// Superseded by a newer generation; terminal
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Outcome of pre-caching a list of URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: Vec<String>,
}

/// Outcome of activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generation stores that were deleted
    pub deleted: Vec<String>,
    /// Clients claimed by this generation
    pub claimed: usize,
}

pub struct Lifecycle {
    ctx: WorkerContext,
    clients: Arc<Clients>,
    state: watch::Sender<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl Lifecycle {
    pub fn new(ctx: WorkerContext, clients: Arc<Clients>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Installing);
        let skip_waiting = AtomicBool::new(ctx.config.skip_waiting);
        Self {
            ctx,
            clients,
            state,
            skip_waiting,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Ask to leave the Waiting state as soon as possible
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    pub fn should_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        info!(
            generation = %self.ctx.config.generation_tag,
            from = %previous,
            to = %next,
            "Lifecycle transition"
        );
    }

    /// Pre-populate the core store from the manifest, bypassing HTTP caches.
    ///
    /// Individual failures are logged and reported, never fatal.
    pub async fn install(&self) -> InstallReport {
        let core = self.ctx.config.core_cache_name();
        info!(store = %core, urls = self.ctx.config.manifest.len(), "Installing");

        self.ctx.storage.open(&core).await;
        let report = precache(&self.ctx, &self.ctx.config.manifest, FetchMode::Reload).await;

        if report.failed.is_empty() {
            info!(store = %core, cached = report.cached, "Install complete");
        } else {
            warn!(
                store = %core,
                cached = report.cached,
                failed = report.failed.len(),
                "Install completed with pre-cache failures"
            );
        }

        self.transition(LifecycleState::Waiting);
        report
    }

    /// Delete stale generation stores, then claim every open client.
    ///
    /// All deletions are joined before the generation is marked Activated.
    pub async fn activate(&self) -> ActivationReport {
        match self.state() {
            LifecycleState::Activated | LifecycleState::Redundant => {
                debug!(state = %self.state(), "Activation skipped");
                return ActivationReport::default();
            }
            _ => {}
        }
        self.transition(LifecycleState::Activating);

        let current = self.ctx.config.core_cache_name();
        let mut sweep = JoinSet::new();
        for name in self.ctx.storage.keys().await {
            if !self.ctx.config.is_core_cache(&name) || name == current {
                continue;
            }
            let storage = Arc::clone(&self.ctx.storage);
            sweep.spawn(async move {
                info!(store = %name, "Deleting stale generation");
                let result = storage.delete(&name).await;
                (name, result)
            });
        }

        let mut deleted = Vec::new();
        while let Some(joined) = sweep.join_next().await {
            match joined {
                Ok((name, Ok(_))) => deleted.push(name),
                Ok((name, Err(e))) => warn!(store = %name, error = %e, "Failed to delete stale store"),
                Err(e) => warn!(error = %e, "Stale store deletion task failed"),
            }
        }
        deleted.sort();

        let claimed = self.clients.claim(&self.ctx.config.generation_tag);
        self.transition(LifecycleState::Activated);

        ActivationReport { deleted, claimed }
    }

    /// Terminal transition once a newer generation has activated
    pub fn mark_redundant(&self) {
        self.ctx.retire();
        self.transition(LifecycleState::Redundant);
    }
}

/// Fetch every URL concurrently and store the 200s in the core store
pub(crate) async fn precache(ctx: &WorkerContext, urls: &[String], mode: FetchMode) -> InstallReport {
    let core = ctx.config.core_cache_name();
    let mut report = InstallReport::default();
    let mut fetches = JoinSet::new();

    for raw in urls {
        let url = match ctx.config.resolve_url(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %raw, error = %e, "Skipping unresolvable URL");
                report.failed.push(raw.clone());
                continue;
            }
        };
        let ctx = ctx.clone();
        let core = core.clone();
        let raw = raw.clone();
        fetches.spawn(async move {
            let request = Request::get(url).with_mode(mode);
            match ctx.fetcher.fetch(&request).await {
                Ok(response) if response.is_cacheable() => {
                    let copy = response.stamped(SystemTime::now());
                    match ctx.storage.put(&core, &request, copy).await {
                        Ok(()) => Ok(raw),
                        Err(e) => {
                            warn!(url = %raw, error = %e, "Failed to store pre-cached response");
                            Err(raw)
                        }
                    }
                }
                Ok(response) => {
                    warn!(url = %raw, status = response.status, "Pre-cache got non-200 response");
                    Err(raw)
                }
                Err(e) => {
                    warn!(url = %raw, error = %e, "Pre-cache fetch failed");
                    Err(raw)
                }
            }
        });
    }

    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok(Ok(_)) => report.cached += 1,
            Ok(Err(url)) => report.failed.push(url),
            Err(e) => warn!(error = %e, "Pre-cache task failed"),
        }
    }
    report.failed.sort();
    report
}
