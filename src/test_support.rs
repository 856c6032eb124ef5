//! Shared fixtures for unit tests

use std::sync::Arc;

use crate::cache::CacheStorage;
use crate::config::{Settings, WorkerConfig};
use crate::net::fake::FakeFetcher;
use crate::net::Request;
use crate::worker::{Clients, Worker, WorkerContext};

pub fn config(version: &str) -> Arc<WorkerConfig> {
    let settings = Settings {
        origin: "https://blog.example.com/".to_string(),
        version: version.to_string(),
        manifest: vec![
            "/".to_string(),
            "/css/index.css".to_string(),
            "/offline.html".to_string(),
        ],
        persist: false,
        ..Settings::default()
    };
    Arc::new(WorkerConfig::from_settings(settings).unwrap())
}

pub fn context(version: &str) -> (WorkerContext, Arc<FakeFetcher>) {
    let net = Arc::new(FakeFetcher::new());
    let ctx = WorkerContext::new(config(version), Arc::new(CacheStorage::in_memory()), net.clone());
    (ctx, net)
}

pub fn worker(
    version: &str,
    storage: &Arc<CacheStorage>,
    net: &Arc<FakeFetcher>,
    clients: &Arc<Clients>,
) -> Arc<Worker> {
    Arc::new(Worker::new(
        config(version),
        Arc::clone(storage),
        net.clone(),
        Arc::clone(clients),
    ))
}

pub fn get(url: &str) -> Request {
    Request::get(url.parse().unwrap())
}
