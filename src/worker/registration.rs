//! Registration - Controls generation hand-over
//!
//! Tracks the active and waiting workers. A newly installed generation waits
//! while another one is active, unless it asked to skip waiting; activating it
//! makes the previous generation redundant.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::clients::Clients;
use super::control::BackgroundHooks;
use super::interceptor::FetchOutcome;
use super::lifecycle::InstallReport;
use super::Worker;
use crate::cache::CacheStorage;
use crate::net::{Request, Response};

/// Status snapshot for reporting
#[derive(Debug, Clone)]
pub struct RegistrationStatus {
    pub active: Option<(String, String)>,
    pub waiting: Option<String>,
    pub clients: usize,
}

/// Owner of every generation running in this process
pub struct Registration {
    storage: Arc<CacheStorage>,
    clients: Arc<Clients>,
    hooks: Arc<dyn BackgroundHooks>,
    active: RwLock<Option<Arc<Worker>>>,
    waiting: RwLock<Option<Arc<Worker>>>,
}

impl Registration {
    pub fn new(storage: Arc<CacheStorage>, clients: Arc<Clients>, hooks: Arc<dyn BackgroundHooks>) -> Self {
        Self {
            storage,
            clients,
            hooks,
            active: RwLock::new(None),
            waiting: RwLock::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.clients
    }

    pub fn hooks(&self) -> &Arc<dyn BackgroundHooks> {
        &self.hooks
    }

    pub async fn active(&self) -> Option<Arc<Worker>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<Worker>> {
        self.waiting.read().await.clone()
    }

    /// Install a new generation; activate it unless it has to wait
    pub async fn install(&self, worker: Arc<Worker>) -> InstallReport {
        info!(generation = worker.generation(), "Installing generation");
        let report = worker.lifecycle().install().await;

        let has_active = self.active.read().await.is_some();
        if !has_active || worker.lifecycle().should_skip_waiting() {
            self.promote(worker).await;
        } else {
            info!(generation = worker.generation(), "Generation installed, waiting for activation");
            let previous = self.waiting.write().await.replace(worker);
            if let Some(previous) = previous {
                // A newer install replaces a generation that never activated
                previous.lifecycle().mark_redundant();
            }
        }

        report
    }

    /// Activate the waiting generation now; returns false if nothing is waiting
    pub async fn skip_waiting(&self) -> bool {
        let waiting = self.waiting.write().await.take();
        match waiting {
            Some(worker) => {
                worker.lifecycle().skip_waiting();
                self.promote(worker).await;
                true
            }
            None => {
                debug!("skip_waiting: no generation waiting");
                false
            }
        }
    }

    async fn promote(&self, worker: Arc<Worker>) {
        // The outgoing generation must be quiet before the sweep deletes its store
        let previous = self.active.write().await.replace(Arc::clone(&worker));
        if let Some(previous) = previous {
            previous.lifecycle().mark_redundant();
            previous.settle().await;
        }

        let report = worker.lifecycle().activate().await;
        info!(
            generation = worker.generation(),
            deleted = ?report.deleted,
            claimed = report.claimed,
            "Generation activated"
        );
    }

    /// Route a request to the active generation
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        match self.active().await {
            Some(worker) => worker.interceptor().handle(request).await,
            None if request.is_interceptable() => FetchOutcome::Respond(Response::service_unavailable()),
            None => FetchOutcome::PassThrough,
        }
    }

    /// Generation tag of the active worker, or the waiting one before any activation
    pub async fn current_version(&self) -> Option<String> {
        if let Some(worker) = self.active().await {
            return Some(worker.generation().to_string());
        }
        self.waiting().await.map(|w| w.generation().to_string())
    }

    pub async fn status(&self) -> RegistrationStatus {
        let active = self
            .active()
            .await
            .map(|w| (w.generation().to_string(), w.lifecycle().state().to_string()));
        let waiting = self.waiting().await.map(|w| w.generation().to_string());
        RegistrationStatus {
            active,
            waiting,
            clients: self.clients.len(),
        }
    }

    /// Let the active generation finish its background work
    pub async fn shutdown(&self) {
        if let Some(worker) = self.active().await {
            info!(generation = worker.generation(), "Settling background work");
            worker.settle().await;
        }
    }
}
