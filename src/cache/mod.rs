//! Disposable local cache of usage and alert state.
//!
//! Never authoritative: the backend wins on the next status sync. Cache
//! failures are reported to the caller but must not block quota operations.

mod file;
mod record;

pub use file::FileCache;
pub use record::{CacheRecord, CachedUsage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache record is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
