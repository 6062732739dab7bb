//! Failure caching.
//!
//! Payloads that could not be delivered are handed to a [`FailCache`], and replayed later by reading them back one at a
//! time. [`DiskCache`] is the on-disk implementation.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use datakit_error::GenericError;
use futures::future::BoxFuture;
use snafu::Snafu;

mod disk;
pub use self::disk::{DiskCache, DiskCacheBuilder};

/// Callback invoked with a cached entry.
///
/// Returning an error leaves the entry at the head of the cache.
pub type GetCallback<'a> = Box<dyn FnOnce(Bytes) -> BoxFuture<'a, Result<(), GenericError>> + Send + 'a>;

/// Error type for fail cache operations.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum FailCacheError {
    /// There is nothing to read.
    #[snafu(display("no data in cache"))]
    NoData,

    /// The entry can never fit in the cache.
    #[snafu(display("entry of {} bytes exceeds cache capacity of {} bytes", len, capacity))]
    TooLarge { len: u64, capacity: u64 },

    /// The cache is full and nothing can be evicted to make room.
    #[snafu(display("cache is full ({} bytes)", capacity))]
    Full { capacity: u64 },

    /// An I/O error on one of the cache files.
    #[snafu(display("I/O error on '{}': {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    /// The callback failed to handle an entry.
    #[snafu(display("callback failed: {}", source))]
    Callback { source: GenericError },
}

impl FailCacheError {
    /// Returns `true` if this error only indicates that the cache is empty.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// A cache of payloads that failed to be delivered.
#[async_trait]
pub trait FailCache: Send + Sync {
    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// If the entry cannot be stored, an error is returned.
    async fn put(&self, data: Bytes) -> Result<(), FailCacheError>;

    /// Reads the oldest entry and passes it to `callback`.
    ///
    /// The entry is removed only if the callback succeeds.
    ///
    /// # Errors
    ///
    /// If the cache is empty, [`FailCacheError::NoData`] is returned. If the callback fails, its error is returned
    /// wrapped in [`FailCacheError::Callback`].
    async fn get(&self, callback: GetCallback<'_>) -> Result<(), FailCacheError>;

    /// Makes everything written so far readable.
    ///
    /// # Errors
    ///
    /// If the active segment cannot be sealed, an error is returned.
    async fn rotate(&self) -> Result<(), FailCacheError>;
}
