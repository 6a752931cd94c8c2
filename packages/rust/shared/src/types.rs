//! Core domain types for image field values and pending uploads.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// StoredImageRecord
// ---------------------------------------------------------------------------

/// A committed, addressable image as returned by the storage backend.
///
/// This is the stored shape of every element of an images field and the shape
/// consumed by anything rendering the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredImageRecord {
    /// Stored file name (never empty inside a committed [`FieldValue`]).
    pub filename: String,
    /// Public locator for the stored file.
    pub url: String,
    /// MIME type reported by the storage backend.
    pub mimetype: String,
    /// Size in bytes.
    pub size: u64,
}

impl StoredImageRecord {
    /// The empty record used as the base when merging partial submissions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read a record from a loosely typed JSON object.
    ///
    /// Returns `None` unless `filename` is a non-empty string or a non-zero
    /// number. Missing or mistyped `url`/`mimetype` read as empty, and `size`
    /// goes through [`coerce_size`]. Unknown keys are dropped.
    pub fn from_object(map: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let filename = map.get("filename").and_then(truthy_string)?;
        let text = |key: &str| {
            map.get(key)
                .and_then(serde_json::Value::as_str)
                .map(String::from)
                .unwrap_or_default()
        };
        Some(Self {
            filename,
            url: text("url"),
            mimetype: text("mimetype"),
            size: map.get("size").and_then(coerce_size).unwrap_or(0),
        })
    }
}

/// A value usable as a non-empty string: non-empty strings and non-zero numbers.
pub fn truthy_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Sizes arrive as numbers or numeric strings; negatives and junk are ignored.
pub fn coerce_size(value: &serde_json::Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then(|| n.trunc() as u64)
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// The ordered sequence of images held by a field.
///
/// Always replaced as a whole; never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValue(pub Vec<StoredImageRecord>);

impl FieldValue {
    /// The empty sequence.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Read a field value from its stored JSON form.
    ///
    /// Anything that isn't an array reads as empty. Elements are read with
    /// [`StoredImageRecord::from_object`]; those without a usable `filename`
    /// are skipped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(items) = value.as_array() else {
            return Self::empty();
        };
        Self(
            items
                .iter()
                .filter_map(serde_json::Value::as_object)
                .filter_map(StoredImageRecord::from_object)
                .collect(),
        )
    }

    /// Serialize to the stored JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StoredImageRecord> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<StoredImageRecord> {
        self.0
    }
}

impl From<Vec<StoredImageRecord>> for FieldValue {
    fn from(records: Vec<StoredImageRecord>) -> Self {
        Self(records)
    }
}

impl<'a> IntoIterator for &'a FieldValue {
    type Item = &'a StoredImageRecord;
    type IntoIter = std::slice::Iter<'a, StoredImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Pending uploads
// ---------------------------------------------------------------------------

/// Where the bytes of a pending upload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// A file already received on local disk (temp upload or explicit path).
    File(PathBuf),
    /// An inline `data:<type>;base64,<payload>` URI.
    DataUri(String),
    /// A remote `http`/`https` resource.
    Remote(Url),
}

impl UploadSource {
    /// Classify a source path string.
    pub fn parse(path: &str) -> Self {
        if path.starts_with("data:") {
            return Self::DataUri(path.to_string());
        }
        if let Ok(url) = Url::parse(path) {
            if matches!(url.scheme(), "http" | "https") {
                return Self::Remote(url);
            }
        }
        Self::File(PathBuf::from(path))
    }
}

impl std::fmt::Display for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::DataUri(uri) => {
                let header = uri.split(',').next().unwrap_or("data:");
                write!(f, "{header},<{} chars>", uri.len())
            }
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Binary content not yet persisted. Consumed exactly once by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub source: UploadSource,
    /// Original client-side file name, if known.
    pub original_name: Option<String>,
    /// MIME type hint supplied with the upload.
    pub mimetype: Option<String>,
    /// Size hint in bytes.
    pub size: Option<u64>,
}

impl PendingUpload {
    /// A pending upload with no metadata hints.
    pub fn from_path(path: &str) -> Self {
        Self {
            source: UploadSource::parse(path),
            original_name: None,
            mimetype: None,
            size: None,
        }
    }
}

/// A file received alongside a submission but not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Location of the received bytes.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl UploadedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            original_name: None,
            mimetype: None,
            size: None,
        }
    }
}

impl From<&UploadedFile> for PendingUpload {
    fn from(file: &UploadedFile) -> Self {
        Self {
            source: UploadSource::File(file.path.clone()),
            original_name: file.original_name.clone(),
            mimetype: file.mimetype.clone(),
            size: file.size,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadTable
// ---------------------------------------------------------------------------

/// Reference name → files received under that name for one submission.
///
/// Supplied fresh per reconciliation and never mutated by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct UploadTable {
    slots: HashMap<String, Vec<UploadedFile>>,
}

impl UploadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file under `name`. Repeated names accumulate in insertion order.
    pub fn insert(&mut self, name: impl Into<String>, file: UploadedFile) {
        self.slots.entry(name.into()).or_default().push(file);
    }

    /// Files received under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[UploadedFile]> {
        self.slots.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
