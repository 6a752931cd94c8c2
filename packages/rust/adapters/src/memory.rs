//! In-memory storage adapter.
//!
//! Keeps stored bytes in a map keyed by generated file name. Useful for tests
//! and for dry runs that shouldn't touch the configured storage directory.
//!
//! Not suitable for production: nothing survives the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use imagefield_shared::{ImageFieldError, PendingUpload, Result, StoredImageRecord};

use crate::source::{SourceReader, resolve_extension, resolve_mimetype};
use crate::{StorageAdapter, StorageSchema, generate_filename, public_url_for};

/// Base URL for files held by a [`MemoryAdapter`].
const MEMORY_URL_BASE: &str = "memory://uploads";

/// Storage adapter holding files in process memory.
pub struct MemoryAdapter {
    files: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
    reader: SourceReader,
    schema: StorageSchema,
}

impl MemoryAdapter {
    /// Create an empty adapter with a full schema.
    pub fn new() -> Result<Self> {
        Ok(Self {
            files: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            reader: SourceReader::new(Duration::from_secs(30))?,
            schema: StorageSchema::full(),
        })
    }

    /// Read sources through `reader` (e.g. one carrying configured limits).
    pub fn with_reader(mut self, reader: SourceReader) -> Self {
        self.reader = reader;
        self
    }

    /// Replace the advertised schema.
    pub fn with_schema(mut self, schema: StorageSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Number of `upload_file` calls made so far, successful or not.
    pub fn upload_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of files currently stored.
    pub fn stored_count(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bytes stored under `filename`.
    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    fn schema(&self) -> &StorageSchema {
        &self.schema
    }

    #[instrument(skip_all, fields(source = %upload.source))]
    async fn upload_file(&self, upload: &PendingUpload) -> Result<StoredImageRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let payload = self
            .reader
            .read(&upload.source)
            .await
            .map_err(|e| ImageFieldError::upload(upload.source.to_string(), e.to_string()))?;

        let mimetype = resolve_mimetype(upload, &payload);
        let extension = resolve_extension(upload, &payload, &mimetype);
        let filename = generate_filename(extension.as_deref());
        let size = payload.bytes.len() as u64;

        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(filename.clone(), payload.bytes);

        debug!(%filename, size, "stored upload in memory");

        Ok(StoredImageRecord {
            url: public_url_for(MEMORY_URL_BASE, &filename),
            filename,
            mimetype,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_counts() {
        let adapter = MemoryAdapter::new().unwrap();
        assert_eq!(adapter.upload_calls(), 0);

        let record = adapter
            .upload_file(&PendingUpload::from_path("data:image/png;base64,aGVsbG8="))
            .await
            .unwrap();

        assert_eq!(adapter.upload_calls(), 1);
        assert_eq!(adapter.stored_count(), 1);
        assert_eq!(adapter.get(&record.filename).as_deref(), Some(&b"hello"[..]));
        assert!(record.url.starts_with("memory://uploads/"));
        assert_eq!(record.size, 5);
    }

    #[tokio::test]
    async fn failed_reads_are_counted_but_not_stored() {
        let adapter = MemoryAdapter::new().unwrap();
        let result = adapter
            .upload_file(&PendingUpload::from_path("data:image/png;base64,%%%"))
            .await;

        assert!(matches!(result, Err(ImageFieldError::Upload { .. })));
        assert_eq!(adapter.upload_calls(), 1);
        assert_eq!(adapter.stored_count(), 0);
    }

    #[tokio::test]
    async fn reader_limits_apply() {
        let reader = SourceReader::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(Some(2));
        let adapter = MemoryAdapter::new().unwrap().with_reader(reader);

        let result = adapter
            .upload_file(&PendingUpload::from_path("data:image/png;base64,aGVsbG8="))
            .await;

        assert!(matches!(result, Err(ImageFieldError::Upload { .. })));
        assert_eq!(adapter.stored_count(), 0);
    }

    #[test]
    fn schema_override() {
        let schema = StorageSchema {
            url: false,
            ..StorageSchema::full()
        };
        let adapter = MemoryAdapter::new().unwrap().with_schema(schema);
        assert!(!adapter.schema().url);
    }
}
