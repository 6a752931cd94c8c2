//! Storage backends for image uploads.
//!
//! This crate provides:
//! - [`StorageAdapter`] — the contract the reconciliation pipeline uploads through
//! - [`LocalAdapter`] — writes files under a directory served from a public URL
//! - [`MemoryAdapter`] — keeps files in memory (tests, dry runs)
//! - [`source`] — reading bytes from local paths, data URIs, and remote URLs

pub mod local;
pub mod memory;
pub mod source;

use async_trait::async_trait;

use imagefield_shared::{PendingUpload, Result, StoredImageRecord};

pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use source::{SourcePayload, SourceReader};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Which record properties a storage backend fills in.
///
/// Image fields refuse a backend that doesn't produce a `url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSchema {
    pub url: bool,
    pub mimetype: bool,
    pub size: bool,
    pub original_name: bool,
}

impl StorageSchema {
    /// A schema with every property enabled.
    pub const fn full() -> Self {
        Self {
            url: true,
            mimetype: true,
            size: true,
            original_name: true,
        }
    }
}

impl Default for StorageSchema {
    fn default() -> Self {
        Self::full()
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A backend that durably stores uploaded bytes.
///
/// Implementations must tolerate concurrent `upload_file` calls. Uploads are
/// not assumed idempotent: every call may create a new stored file.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;

    /// Properties this backend produces.
    fn schema(&self) -> &StorageSchema;

    /// Store the bytes behind `upload` and describe the stored file.
    ///
    /// Fails with [`ImageFieldError::Upload`](imagefield_shared::ImageFieldError::Upload).
    async fn upload_file(&self, upload: &PendingUpload) -> Result<StoredImageRecord>;
}

/// Join a public base URL and a stored file name.
pub(crate) fn public_url_for(base: &str, filename: &str) -> String {
    format!("{}/{filename}", base.trim_end_matches('/'))
}

/// Generate a stored file name with an optional extension.
pub(crate) fn generate_filename(extension: Option<&str>) -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_joins_cleanly() {
        assert_eq!(public_url_for("/uploads", "a.png"), "/uploads/a.png");
        assert_eq!(
            public_url_for("https://cdn.example.com/img/", "a.png"),
            "https://cdn.example.com/img/a.png"
        );
    }

    #[test]
    fn generated_filenames_are_unique() {
        let a = generate_filename(Some("png"));
        let b = generate_filename(Some("png"));
        assert_ne!(a, b);
        assert!(a.ends_with(".png"));
        assert!(!generate_filename(None).contains('.'));
    }
}
