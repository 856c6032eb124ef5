//! Cache store layer
//!
//! Named request→response stores held in memory with Moka, optionally written
//! through to disk so they survive daemon restarts.

pub mod disk;
pub mod storage;

pub use disk::DiskStore;
pub use storage::CacheStorage;

/// Failure of the underlying store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),

    #[error("Store task failed: {0}")]
    Task(String),
}
