//! On-disk Store Persistence
//!
//! Write-through copy of the named stores so cached responses survive restarts.
//! Layout: `<root>/<urlencoded store name>/<sha1 of request key>.json`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::StoreError;
use crate::net::{Response, ResponseSource};

/// One persisted request/response pair
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64-encoded body
    body: String,
}

/// A store name together with its persisted entries
pub type LoadedStore = (String, Vec<(String, Response)>);

/// Disk mirror of the named stores
#[derive(Debug, Clone)]
pub struct DiskStore {
    /// Root directory holding one subdirectory per store
    root: PathBuf,
}

impl DiskStore {
    /// Persist under the platform cache directory
    pub fn new() -> Result<Self, StoreError> {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("swcache");
        Self::with_root(root)
    }

    /// Persist under a custom root directory
    pub fn with_root(root: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&root)?;

        let store = Self { root };

        // Clean up any stale temp files from previous runs
        store.cleanup();

        info!(root = %store.root.display(), "Disk store initialized");
        Ok(store)
    }

    /// Write (or overwrite) one entry atomically
    pub fn write(&self, store: &str, key: &str, response: &Response) -> Result<(), StoreError> {
        let dir = self.store_dir(store);
        fs::create_dir_all(&dir)?;

        let entry = PersistedEntry {
            key: key.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: base64::engine::general_purpose::STANDARD.encode(&response.body),
        };
        let json = serde_json::to_vec(&entry).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tmp.write_all(&json)?;

        let path = self.entry_path(store, key);
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        debug!(store = store, key = key, path = %path.display(), "Persisted cache entry");
        Ok(())
    }

    /// Remove a whole store from disk
    pub fn remove_store(&self, store: &str) -> Result<(), StoreError> {
        let dir = self.store_dir(store);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(store = store, "Removed persisted store");
        }
        Ok(())
    }

    /// Read back every persisted store
    ///
    /// Unreadable entries are skipped with a warning rather than failing the load.
    pub fn load_all(&self) -> Result<Vec<LoadedStore>, StoreError> {
        let mut stores = Vec::new();

        for dir_entry in fs::read_dir(&self.root)?.flatten() {
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(encoded) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let name = match urlencoding::decode(encoded) {
                Ok(name) => name.into_owned(),
                Err(e) => {
                    warn!(dir = %path.display(), error = %e, "Skipping store with undecodable name");
                    continue;
                }
            };

            let mut entries = Vec::new();
            for file in fs::read_dir(&path)?.flatten() {
                let file_path = file.path();
                if file_path.extension().map(|ext| ext == "json") != Some(true) {
                    continue;
                }
                match Self::read_entry(&file_path) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!(path = %file_path.display(), error = %e, "Skipping corrupt cache entry")
                    }
                }
            }

            debug!(store = %name, entries = entries.len(), "Loaded persisted store");
            stores.push((name, entries));
        }

        Ok(stores)
    }

    fn read_entry(path: &Path) -> Result<(String, Response), StoreError> {
        let data = fs::read(path)?;
        let entry: PersistedEntry =
            serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let body = base64::engine::general_purpose::STANDARD
            .decode(entry.body)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let response = Response {
            status: entry.status,
            headers: entry.headers,
            body: body.into(),
            source: ResponseSource::Cache,
        };
        Ok((entry.key, response))
    }

    /// Clean up stale temp files on startup
    pub fn cleanup(&self) {
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return;
        };
        for store_dir in read_dir.flatten() {
            let Ok(files) = fs::read_dir(store_dir.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().map(|ext| ext == "tmp") == Some(true) {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(urlencoding::encode(store).as_ref())
    }

    fn entry_path(&self, store: &str, key: &str) -> PathBuf {
        let digest = Sha1::digest(key.as_bytes());
        self.store_dir(store).join(format!("{:x}.json", digest))
    }

    /// Get the root directory path
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();

        let response = Response::new(200, "<html>home</html>").with_header("content-type", "text/html");
        disk.write("fullstack-ai-v2", "GET https://blog.example.com/", &response)
            .unwrap();

        let stores = disk.load_all().unwrap();
        assert_eq!(stores.len(), 1);
        let (name, entries) = &stores[0];
        assert_eq!(name, "fullstack-ai-v2");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "GET https://blog.example.com/");
        assert_eq!(entries[0].1.body.as_ref(), b"<html>home</html>");
        assert_eq!(entries[0].1.header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_overwrite_keeps_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();

        disk.write("api-cache", "GET https://blog.example.com/api/x", &Response::new(200, "old"))
            .unwrap();
        disk.write("api-cache", "GET https://blog.example.com/api/x", &Response::new(200, "new"))
            .unwrap();

        let stores = disk.load_all().unwrap();
        assert_eq!(stores[0].1.len(), 1);
        assert_eq!(stores[0].1[0].1.body.as_ref(), b"new");
    }

    #[test]
    fn test_remove_store_and_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let disk = DiskStore::with_root(tmp.path().to_path_buf()).unwrap();

        disk.write("cdn-cache", "GET https://cdn.jsdelivr.net/x.js", &Response::new(200, "x"))
            .unwrap();
        let stray = disk.store_dir("cdn-cache").join("leftover.tmp");
        fs::write(&stray, b"partial").unwrap();

        disk.cleanup();
        assert!(!stray.exists());

        disk.remove_store("cdn-cache").unwrap();
        assert!(disk.load_all().unwrap().is_empty());
    }
}
