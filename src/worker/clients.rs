//! Client Tracking
//!
//! Registry of open clients and the generation controlling each one.
//! A client is registered on connect and released on disconnect; activation
//! claims every open client for the newly active generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

/// One open client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    /// Generation currently serving this client, if any has claimed it
    pub controller: Option<String>,
}

/// All open clients
pub struct Clients {
    /// Map from client ID to the generation controlling it
    clients: Mutex<HashMap<u64, Option<String>>>,
    /// Next client ID to assign
    next_id: AtomicU64,
}

impl Clients {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a newly opened client, optionally already controlled
    pub fn register(&self, controller: Option<&str>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(id, controller.map(str::to_string));
        }
        debug!(client = id, controller = ?controller, "Client registered");
        id
    }

    /// Release a client; returns whether it was known
    pub fn release(&self, id: u64) -> bool {
        let removed = self
            .clients
            .lock()
            .map(|mut clients| clients.remove(&id).is_some())
            .unwrap_or(false);
        debug!(client = id, "Client released");
        removed
    }

    /// Make `generation` the controller of every open client; returns how many were claimed
    pub fn claim(&self, generation: &str) -> usize {
        let Ok(mut clients) = self.clients.lock() else {
            return 0;
        };
        for controller in clients.values_mut() {
            *controller = Some(generation.to_string());
        }
        clients.len()
    }

    pub fn get(&self, id: u64) -> Option<ClientInfo> {
        let clients = self.clients.lock().ok()?;
        clients.get(&id).map(|controller| ClientInfo {
            id,
            controller: controller.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Clients {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let clients = Clients::new();
        let a = clients.register(None);
        let b = clients.register(Some("v1"));
        assert_ne!(a, b);
        assert_eq!(clients.len(), 2);

        assert!(clients.release(a));
        assert!(!clients.release(a));
        assert_eq!(clients.get(b).unwrap().controller.as_deref(), Some("v1"));
    }

    #[test]
    fn test_claim_takes_over_all_clients() {
        let clients = Clients::new();
        let a = clients.register(None);
        let b = clients.register(Some("v1"));

        assert_eq!(clients.claim("v2"), 2);
        assert_eq!(clients.get(a).unwrap().controller.as_deref(), Some("v2"));
        assert_eq!(clients.get(b).unwrap().controller.as_deref(), Some("v2"));
    }
}
