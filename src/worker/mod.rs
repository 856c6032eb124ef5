//! The caching worker
//!
//! One `Worker` per cache generation. It bundles the fetch interceptor and the
//! lifecycle manager around a shared context (configuration, stores, fetcher).

pub mod clients;
pub mod control;
pub mod interceptor;
pub mod lifecycle;
pub mod policy;
pub mod registration;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::net::{FetchMode, Fetcher};

pub use clients::Clients;
pub use control::{ControlChannel, ControlMessage, LoggingHooks, VersionReply};
pub use interceptor::{FetchInterceptor, FetchOutcome};
pub use lifecycle::{InstallReport, Lifecycle};
pub use registration::Registration;

/// Work spawned past the end of a request (background revalidation)
///
/// `settle` waits for everything spawned so far, so shutdown never cuts a
/// store write in half.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Ok(mut tasks) = self.tasks.lock() {
            // Reap finished tasks so the set does not grow without bound
            while tasks.try_join_next().is_some() {}
            tasks.spawn(task);
        }
    }

    /// Wait for all pending background work
    pub async fn settle(&self) {
        let mut pending = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        let count = pending.len();
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
        }
        debug!(count = count, "Background tasks settled");
    }
}

/// Everything a policy needs to serve a request
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<WorkerConfig>,
    pub storage: Arc<CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub background: BackgroundTasks,
    /// Set once the generation is redundant; its core store takes no more writes
    retired: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn new(config: Arc<WorkerConfig>, storage: Arc<CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            storage,
            fetcher,
            background: BackgroundTasks::default(),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

/// A single cache generation
pub struct Worker {
    ctx: WorkerContext,
    interceptor: FetchInterceptor,
    lifecycle: Lifecycle,
}

impl Worker {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<Clients>,
    ) -> Self {
        let ctx = WorkerContext::new(config, storage, fetcher);
        Self {
            interceptor: FetchInterceptor::new(ctx.clone()),
            lifecycle: Lifecycle::new(ctx.clone(), clients),
            ctx,
        }
    }

    /// This generation's tag
    pub fn generation(&self) -> &str {
        &self.ctx.config.generation_tag
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.ctx.config
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.ctx.storage
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.ctx.fetcher
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Add arbitrary URLs to this generation's core store
    pub async fn seed(&self, urls: &[String]) -> InstallReport {
        lifecycle::precache(&self.ctx, urls, FetchMode::Default).await
    }

    /// Wait for background revalidation to finish
    pub async fn settle(&self) {
        self.ctx.background.settle().await;
    }
}
