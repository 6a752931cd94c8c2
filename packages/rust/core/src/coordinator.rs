//! Concurrent resolution of pending uploads.
//!
//! Every [`NormalizedEntry::Pending`] is handed to the storage adapter; all of
//! them run concurrently on the calling task and are joined before returning.
//! Results are index-stable: `output[i]` always corresponds to `input[i]`.
//!
//! The join is fail-fast. The first upload error is returned immediately and
//! the remaining in-flight uploads are dropped. Uploads that already finished
//! are not rolled back.

use futures::future::{self, try_join_all};
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, instrument};

use imagefield_adapters::StorageAdapter;
use imagefield_shared::{Result, StoredImageRecord};

use crate::normalizer::NormalizedEntry;

/// Resolve classified entries into stored records, preserving order.
///
/// `Absent` entries come back as `None`. With `concurrency` set, at most that
/// many entries are in flight at once; otherwise everything is dispatched
/// together. Either way the first error is returned as soon as it happens.
#[instrument(skip_all, fields(adapter = storage.name(), entries = entries.len()))]
pub async fn resolve_entries(
    entries: Vec<NormalizedEntry>,
    storage: &dyn StorageAdapter,
    concurrency: Option<usize>,
) -> Result<Vec<Option<StoredImageRecord>>> {
    let pending = entries.iter().filter(|e| e.is_pending()).count();
    debug!(pending, ?concurrency, "dispatching uploads");

    let len = entries.len();
    let tasks = entries
        .into_iter()
        .map(|entry| resolve_entry(entry, storage));

    let Some(limit) = concurrency else {
        return try_join_all(tasks).await;
    };

    // Completion order, so a failure surfaces without waiting on slower
    // siblings; results land back at their submission index.
    let mut resolved = vec![None; len];
    stream::iter(tasks.enumerate())
        .map(|(index, task)| async move { task.await.map(|record| (index, record)) })
        .buffer_unordered(limit.max(1))
        .try_for_each(|(index, record)| {
            resolved[index] = record;
            future::ready(Ok(()))
        })
        .await?;
    Ok(resolved)
}

async fn resolve_entry(
    entry: NormalizedEntry,
    storage: &dyn StorageAdapter,
) -> Result<Option<StoredImageRecord>> {
    match entry {
        NormalizedEntry::Stored(record) => Ok(Some(record)),
        NormalizedEntry::Absent => Ok(None),
        NormalizedEntry::Pending(upload) => storage.upload_file(&upload).await.map(Some),
    }
}
