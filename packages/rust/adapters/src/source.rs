//! Reading the bytes behind an [`UploadSource`].

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use tracing::debug;

use imagefield_shared::{
    ImageFieldError, PendingUpload, Result, StorageConfig, UploadSource, expand_home,
};

/// User-Agent string for remote source requests.
const USER_AGENT: &str = concat!("imagefield/", env!("CARGO_PKG_VERSION"));

/// Fallback MIME type when nothing better is known.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Bytes read from a source plus whatever metadata came with them.
#[derive(Debug, Clone)]
pub struct SourcePayload {
    pub bytes: Vec<u8>,
    /// MIME type reported by the source itself (data URI header, Content-Type).
    pub mimetype: Option<String>,
    /// A file name derived from the source (path file name, URL last segment).
    pub name_hint: Option<String>,
}

/// Reads local files, data URIs, and remote URLs.
///
/// Local files can be confined to a set of directories, and every source can
/// be capped in size. A fresh reader has neither restriction.
#[derive(Debug, Clone)]
pub struct SourceReader {
    client: Client,
    allowed_dirs: Vec<PathBuf>,
    max_bytes: Option<u64>,
}

impl SourceReader {
    /// Create a reader whose remote fetches time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| ImageFieldError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            allowed_dirs: Vec::new(),
            max_bytes: None,
        })
    }

    /// Build from the `[storage]` config section.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let allowed = config
            .allowed_source_dirs
            .iter()
            .map(|dir| expand_home(dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(Duration::from_secs(config.remote_timeout_secs))?
            .with_allowed_dirs(allowed)
            .with_max_bytes((config.max_upload_bytes > 0).then_some(config.max_upload_bytes)))
    }

    /// Only read local files that resolve inside one of `dirs`.
    pub fn with_allowed_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.allowed_dirs = dirs.into_iter().collect();
        self
    }

    /// Reject sources larger than `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Read all bytes for `source`.
    pub async fn read(&self, source: &UploadSource) -> Result<SourcePayload> {
        match source {
            UploadSource::File(path) => self.read_file(path).await,
            UploadSource::DataUri(uri) => {
                let payload = decode_data_uri(uri)?;
                self.check_size(payload.bytes.len() as u64, &"data URI")?;
                Ok(payload)
            }
            UploadSource::Remote(url) => self.fetch(url).await,
        }
    }

    async fn read_file(&self, path: &Path) -> Result<SourcePayload> {
        self.check_allowed(path).await?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImageFieldError::io(path, e))?;
        self.check_size(metadata.len(), &path.display())?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ImageFieldError::io(path, e))?;
        Ok(SourcePayload {
            bytes,
            mimetype: None,
            name_hint: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        })
    }

    async fn check_allowed(&self, path: &Path) -> Result<()> {
        if self.allowed_dirs.is_empty() {
            return Ok(());
        }

        // Resolve symlinks and `..` before comparing.
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| ImageFieldError::io(path, e))?;
        for dir in &self.allowed_dirs {
            let dir = tokio::fs::canonicalize(dir)
                .await
                .unwrap_or_else(|_| dir.clone());
            if resolved.starts_with(&dir) {
                return Ok(());
            }
        }

        Err(ImageFieldError::validation(format!(
            "{} is outside the allowed source directories",
            path.display()
        )))
    }

    fn check_size(&self, len: u64, source: &dyn Display) -> Result<()> {
        match self.max_bytes {
            Some(max) if len > max => Err(ImageFieldError::validation(format!(
                "{source} exceeds the {max} byte upload limit"
            ))),
            _ => Ok(()),
        }
    }

    async fn fetch(&self, url: &url::Url) -> Result<SourcePayload> {
        debug!(%url, "fetching remote source");

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ImageFieldError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageFieldError::Network(format!("{url}: HTTP {status}")));
        }
        if let Some(len) = response.content_length() {
            self.check_size(len, url)?;
        }

        let mimetype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        // Content-Length can be absent or wrong; count while streaming.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ImageFieldError::Network(format!("{url}: body read failed: {e}")))?
        {
            bytes.extend_from_slice(&chunk);
            self.check_size(bytes.len() as u64, url)?;
        }

        let name_hint = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .map(String::from);

        Ok(SourcePayload {
            bytes,
            mimetype,
            name_hint,
        })
    }
}

/// Decode a `data:<type>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<SourcePayload> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ImageFieldError::parse("data URI must start with 'data:'"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageFieldError::parse("data URI has no payload"))?;
    let mimetype = header
        .strip_suffix(";base64")
        .ok_or_else(|| ImageFieldError::parse("only base64 data URIs are supported"))?;

    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageFieldError::parse(format!("invalid base64 payload: {e}")))?;

    Ok(SourcePayload {
        bytes,
        mimetype: (!mimetype.is_empty()).then(|| mimetype.to_string()),
        name_hint: None,
    })
}

// ---------------------------------------------------------------------------
// Metadata resolution
// ---------------------------------------------------------------------------

/// Pick the MIME type for a stored file: explicit hint, then what the source
/// reported, then a guess from the file name.
pub fn resolve_mimetype(upload: &PendingUpload, payload: &SourcePayload) -> String {
    upload
        .mimetype
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| payload.mimetype.clone())
        .or_else(|| {
            display_name(upload, payload)
                .and_then(extension_of)
                .and_then(mimetype_for_extension)
                .map(String::from)
        })
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Extension for a stored file name, lowercased, without the dot.
pub fn resolve_extension(upload: &PendingUpload, payload: &SourcePayload, mimetype: &str) -> Option<String> {
    display_name(upload, payload)
        .and_then(extension_of)
        .map(str::to_ascii_lowercase)
        .or_else(|| extension_for_mimetype(mimetype).map(String::from))
}

fn display_name<'a>(upload: &'a PendingUpload, payload: &'a SourcePayload) -> Option<&'a str> {
    upload
        .original_name
        .as_deref()
        .or(payload.name_hint.as_deref())
}

fn extension_of(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty() && ext.len() <= 5).then_some(ext)
}

fn mimetype_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        "ico" => Some("image/x-icon"),
        "tif" | "tiff" => Some("image/tiff"),
        "psd" => Some("image/vnd.adobe.photoshop"),
        "pdf" => Some("application/pdf"),
        "eps" | "ps" => Some("application/postscript"),
        _ => None,
    }
}

fn extension_for_mimetype(mimetype: &str) -> Option<&'static str> {
    match mimetype {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        "image/tiff" => Some("tif"),
        "application/pdf" => Some("pdf"),
        "application/postscript" => Some("eps"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(name_hint: Option<&str>, mimetype: Option<&str>) -> SourcePayload {
        SourcePayload {
            bytes: Vec::new(),
            mimetype: mimetype.map(String::from),
            name_hint: name_hint.map(String::from),
        }
    }

    #[test]
    fn decodes_base64_data_uri() {
        // "hello" in base64
        let decoded = decode_data_uri("data:image/png;base64,aGVsbG8=").expect("decode");
        assert_eq!(decoded.bytes, b"hello");
        assert_eq!(decoded.mimetype.as_deref(), Some("image/png"));
    }

    #[test]
    fn rejects_non_base64_data_uri() {
        assert!(decode_data_uri("data:text/plain,hello").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn mimetype_precedence() {
        let mut upload = PendingUpload::from_path("/tmp/x");
        upload.original_name = Some("photo.JPG".into());

        // Source-reported type wins over the extension guess.
        assert_eq!(
            resolve_mimetype(&upload, &payload(None, Some("image/webp"))),
            "image/webp"
        );
        assert_eq!(resolve_mimetype(&upload, &payload(None, None)), "image/jpeg");

        upload.mimetype = Some("image/gif".into());
        assert_eq!(
            resolve_mimetype(&upload, &payload(None, Some("image/webp"))),
            "image/gif"
        );

        let bare = PendingUpload::from_path("/tmp/x");
        assert_eq!(resolve_mimetype(&bare, &payload(None, None)), OCTET_STREAM);
    }

    #[test]
    fn extension_from_name_then_mimetype() {
        let mut upload = PendingUpload::from_path("/tmp/x");
        upload.original_name = Some("Cover.PNG".into());
        assert_eq!(
            resolve_extension(&upload, &payload(None, None), "image/png").as_deref(),
            Some("png")
        );

        let bare = PendingUpload::from_path("/tmp/x");
        assert_eq!(
            resolve_extension(&bare, &payload(Some("upload_abc"), None), "image/jpeg").as_deref(),
            Some("jpg")
        );
        assert_eq!(resolve_extension(&bare, &payload(None, None), OCTET_STREAM), None);
    }

    #[tokio::test]
    async fn reads_local_file() {
        let dir = std::env::temp_dir().join(format!("if-source-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pixel.gif");
        std::fs::write(&path, b"GIF89a").unwrap();

        let reader = SourceReader::new(Duration::from_secs(5)).unwrap();
        let read = reader.read(&UploadSource::File(path)).await.unwrap();
        assert_eq!(read.bytes, b"GIF89a");
        assert_eq!(read.name_hint.as_deref(), Some("pixel.gif"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_local_file_is_io_error() {
        let reader = SourceReader::new(Duration::from_secs(5)).unwrap();
        let err = reader
            .read(&UploadSource::File("/nonexistent/imagefield/x.png".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageFieldError::Io { .. }));
    }

    #[tokio::test]
    async fn fetches_remote_source() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/img/a.png"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png; charset=binary")
                    .set_body_bytes(b"PNGDATA".to_vec()),
            )
            .mount(&server)
            .await;

        let reader = SourceReader::new(Duration::from_secs(5)).unwrap();
        let url = url::Url::parse(&format!("{}/img/a.png", server.uri())).unwrap();
        let read = reader.read(&UploadSource::Remote(url)).await.unwrap();

        assert_eq!(read.bytes, b"PNGDATA");
        assert_eq!(read.mimetype.as_deref(), Some("image/png"));
        assert_eq!(read.name_hint.as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn local_files_outside_allowed_dirs_are_refused() {
        let incoming = std::env::temp_dir().join(format!("if-incoming-{}", uuid::Uuid::now_v7()));
        let elsewhere = std::env::temp_dir().join(format!("if-elsewhere-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(incoming.join("ok.png"), b"ok").unwrap();
        std::fs::write(elsewhere.join("secret"), b"secret").unwrap();

        let reader = SourceReader::new(Duration::from_secs(5))
            .unwrap()
            .with_allowed_dirs([incoming.clone()]);

        let read = reader
            .read(&UploadSource::File(incoming.join("ok.png")))
            .await
            .unwrap();
        assert_eq!(read.bytes, b"ok");

        let err = reader
            .read(&UploadSource::File(elsewhere.join("secret")))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageFieldError::Validation { .. }));

        // `..` does not escape the allowed directory.
        let sneaky = incoming.join("..").join(elsewhere.file_name().unwrap()).join("secret");
        assert!(reader.read(&UploadSource::File(sneaky)).await.is_err());

        let _ = std::fs::remove_dir_all(&incoming);
        let _ = std::fs::remove_dir_all(&elsewhere);
    }

    #[tokio::test]
    async fn oversized_sources_are_refused() {
        let reader = SourceReader::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(Some(4));

        // "hello" is five bytes.
        let err = reader
            .read(&UploadSource::DataUri("data:text/plain;base64,aGVsbG8=".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upload limit"));

        let dir = std::env::temp_dir().join(format!("if-source-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("big.png");
        std::fs::write(&path, b"too large").unwrap();
        assert!(reader.read(&UploadSource::File(path)).await.is_err());
        let _ = std::fs::remove_dir_all(&dir);

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/big.png"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()),
            )
            .mount(&server)
            .await;
        let url = url::Url::parse(&format!("{}/big.png", server.uri())).unwrap();
        let err = reader.read(&UploadSource::Remote(url)).await.unwrap_err();
        assert!(matches!(err, ImageFieldError::Validation { .. }));
    }

    #[test]
    fn reader_from_config_applies_limits() {
        let config = StorageConfig {
            allowed_source_dirs: vec!["/srv/incoming".into()],
            max_upload_bytes: 0,
            ..StorageConfig::default()
        };
        let reader = SourceReader::from_config(&config).unwrap();
        assert_eq!(reader.allowed_dirs, vec![PathBuf::from("/srv/incoming")]);
        assert_eq!(reader.max_bytes, None);

        let reader = SourceReader::from_config(&StorageConfig::default()).unwrap();
        assert!(reader.allowed_dirs.is_empty());
        assert_eq!(reader.max_bytes, Some(25 * 1024 * 1024));
    }

    #[tokio::test]
    async fn remote_error_status_fails() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/gone.png"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let reader = SourceReader::new(Duration::from_secs(5)).unwrap();
        let url = url::Url::parse(&format!("{}/gone.png", server.uri())).unwrap();
        let err = reader.read(&UploadSource::Remote(url)).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
