//! Filesystem storage: files land under a root directory and are addressed
//! through a public base URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use imagefield_shared::{
    ImageFieldError, PendingUpload, Result, StorageConfig, StoredImageRecord, expand_home,
};

use crate::source::{SourceReader, resolve_extension, resolve_mimetype};
use crate::{StorageAdapter, StorageSchema, generate_filename, public_url_for};

/// Stores uploads as files in a local directory.
pub struct LocalAdapter {
    root_dir: PathBuf,
    public_url: String,
    reader: SourceReader,
    schema: StorageSchema,
}

impl LocalAdapter {
    /// Create an adapter writing to `root_dir`, with files served from `public_url`.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        public_url: impl Into<String>,
        remote_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            root_dir: root_dir.into(),
            public_url: public_url.into(),
            reader: SourceReader::new(remote_timeout)?,
            schema: StorageSchema::full(),
        })
    }

    /// Build from the `[storage]` config section, including its source limits.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            root_dir: expand_home(&config.root_dir)?,
            public_url: config.public_url.clone(),
            reader: SourceReader::from_config(config)?,
            schema: StorageSchema::full(),
        })
    }

    /// Directory stored files are written to.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    async fn store(&self, upload: &PendingUpload) -> Result<StoredImageRecord> {
        let payload = self.reader.read(&upload.source).await?;
        let mimetype = resolve_mimetype(upload, &payload);
        let extension = resolve_extension(upload, &payload, &mimetype);
        let filename = generate_filename(extension.as_deref());

        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| ImageFieldError::io(&self.root_dir, e))?;

        let target = self.root_dir.join(&filename);
        tokio::fs::write(&target, &payload.bytes)
            .await
            .map_err(|e| ImageFieldError::io(&target, e))?;

        debug!(path = %target.display(), bytes = payload.bytes.len(), "wrote stored file");

        Ok(StoredImageRecord {
            url: public_url_for(&self.public_url, &filename),
            filename,
            mimetype,
            size: payload.bytes.len() as u64,
        })
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn schema(&self) -> &StorageSchema {
        &self.schema
    }

    #[instrument(skip_all, fields(source = %upload.source))]
    async fn upload_file(&self, upload: &PendingUpload) -> Result<StoredImageRecord> {
        let record = self
            .store(upload)
            .await
            .map_err(|e| ImageFieldError::upload(upload.source.to_string(), e.to_string()))?;

        info!(
            filename = %record.filename,
            mimetype = %record.mimetype,
            size = record.size,
            "stored upload"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagefield_shared::UploadSource;
    use uuid::Uuid;

    fn temp_dir(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn stores_local_file_with_original_extension() {
        let incoming = temp_dir("if-incoming");
        std::fs::create_dir_all(&incoming).unwrap();
        let received = incoming.join("upload_8f2c");
        std::fs::write(&received, b"\x89PNG fake").unwrap();

        let root = temp_dir("if-local");
        let adapter = LocalAdapter::new(&root, "/uploads/", Duration::from_secs(5)).unwrap();

        let upload = PendingUpload {
            source: UploadSource::File(received),
            original_name: Some("holiday.png".into()),
            mimetype: None,
            size: None,
        };
        let record = adapter.upload_file(&upload).await.unwrap();

        assert!(record.filename.ends_with(".png"));
        assert_eq!(record.url, format!("/uploads/{}", record.filename));
        assert_eq!(record.mimetype, "image/png");
        assert_eq!(record.size, 9);
        assert_eq!(std::fs::read(root.join(&record.filename)).unwrap(), b"\x89PNG fake");

        let _ = std::fs::remove_dir_all(&incoming);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stores_data_uri() {
        let root = temp_dir("if-local");
        let adapter = LocalAdapter::new(&root, "https://cdn.example.com", Duration::from_secs(5))
            .unwrap();

        let upload = PendingUpload::from_path("data:image/gif;base64,R0lGODlh");
        let record = adapter.upload_file(&upload).await.unwrap();

        assert!(record.filename.ends_with(".gif"));
        assert!(record.url.starts_with("https://cdn.example.com/"));
        assert_eq!(record.mimetype, "image/gif");
        assert_eq!(record.size, 6);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stores_remote_source() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/a.jpg"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(b"JPEG".to_vec()),
            )
            .mount(&server)
            .await;

        let root = temp_dir("if-local");
        let adapter = LocalAdapter::new(&root, "/uploads", Duration::from_secs(5)).unwrap();
        let upload = PendingUpload::from_path(&format!("{}/a.jpg", server.uri()));
        let record = adapter.upload_file(&upload).await.unwrap();

        assert!(record.filename.ends_with(".jpg"));
        assert_eq!(record.mimetype, "image/jpeg");
        assert_eq!(record.size, 4);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failures_surface_as_upload_errors() {
        let root = temp_dir("if-local");
        let adapter = LocalAdapter::new(&root, "/uploads", Duration::from_secs(5)).unwrap();

        let upload = PendingUpload::from_path("/nonexistent/imagefield/missing.png");
        let err = adapter.upload_file(&upload).await.unwrap_err();

        match err {
            ImageFieldError::Upload { source_desc, .. } => {
                assert_eq!(source_desc, "/nonexistent/imagefield/missing.png");
            }
            other => panic!("expected upload error, got {other:?}"),
        }
    }

    #[test]
    fn from_config_expands_home() {
        let config = StorageConfig {
            root_dir: "/srv/imagefield".into(),
            public_url: "/media".into(),
            remote_timeout_secs: 10,
            ..StorageConfig::default()
        };
        let adapter = LocalAdapter::from_config(&config).unwrap();
        assert_eq!(adapter.root_dir(), Path::new("/srv/imagefield"));
        assert!(adapter.schema().url);
    }

    #[tokio::test]
    async fn configured_source_dirs_keep_other_files_private() {
        let incoming = temp_dir("if-incoming");
        let private = temp_dir("if-private");
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::create_dir_all(&private).unwrap();
        std::fs::write(incoming.join("photo.png"), b"png").unwrap();
        std::fs::write(private.join("passwd"), b"root:x:0:0").unwrap();

        let root = temp_dir("if-local");
        let config = StorageConfig {
            root_dir: root.display().to_string(),
            allowed_source_dirs: vec![incoming.display().to_string()],
            ..StorageConfig::default()
        };
        let adapter = LocalAdapter::from_config(&config).unwrap();

        let stored = adapter
            .upload_file(&PendingUpload::from_path(
                &incoming.join("photo.png").display().to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(stored.size, 3);

        let err = adapter
            .upload_file(&PendingUpload::from_path(
                &private.join("passwd").display().to_string(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageFieldError::Upload { .. }));
        assert!(err.to_string().contains("outside the allowed source directories"));
        // Only the allowed file was published.
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 1);

        let _ = std::fs::remove_dir_all(&incoming);
        let _ = std::fs::remove_dir_all(&private);
        let _ = std::fs::remove_dir_all(&root);
    }
}
