//! Classification of raw submitted entries.
//!
//! Submissions carry no discriminator: an entry may be a stored record, the
//! JSON text of one, an `upload:` reference, a URL or data URI, or a removal
//! marker. Every entry is classified once into a [`NormalizedEntry`] so later
//! stages never re-sniff string shapes.
//!
//! Precedence, first match wins:
//!
//! 1. `{...}` strings are parsed as JSON and the result is classified.
//!    Invalid JSON falls through as plain text.
//! 2. `upload:<name>` strings resolve through the [`UploadTable`].
//! 3. Data URIs and `http(s)://` URLs become pending uploads.
//! 4. Objects with a non-empty `filename` are already stored.
//! 5. Objects with an empty `filename` are removal markers.
//! 6. Objects with a `path` are pending uploads.
//! 7. Everything else contributes nothing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use imagefield_shared::types::{coerce_size, truthy_string};
use imagefield_shared::{
    ImageFieldError, PendingUpload, Result, StoredImageRecord, UploadSource, UploadTable,
};

/// Prefix marking a reference into the upload table.
pub const UPLOAD_PREFIX: &str = "upload:";

static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:data:[a-z/]+;base64|https?://)").expect("valid regex")
});

/// What a single raw entry turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEntry {
    /// Already uploaded; kept as-is.
    Stored(StoredImageRecord),
    /// Needs to go through the storage adapter.
    Pending(PendingUpload),
    /// Contributes nothing to the committed value.
    Absent,
}

impl NormalizedEntry {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Classifies entries against one submission's upload table.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    uploads: &'a UploadTable,
    strict_upload_refs: bool,
}

impl<'a> Normalizer<'a> {
    pub fn new(uploads: &'a UploadTable) -> Self {
        Self {
            uploads,
            strict_upload_refs: false,
        }
    }

    /// Fail instead of dropping entries that name an unknown upload.
    pub fn strict_upload_refs(mut self, strict: bool) -> Self {
        self.strict_upload_refs = strict;
        self
    }

    /// Classify every submitted entry, flattening nested arrays one level.
    ///
    /// The output keeps submission order. An upload reference naming several
    /// received files expands in place to one entry per file.
    pub fn normalize_all(&self, values: &[Value]) -> Result<Vec<NormalizedEntry>> {
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Array(inner) => {
                    for nested in inner {
                        entries.extend(self.normalize(nested)?);
                    }
                }
                other => entries.extend(self.normalize(other)?),
            }
        }
        Ok(entries)
    }

    /// Classify one entry.
    pub fn normalize(&self, value: &Value) -> Result<Vec<NormalizedEntry>> {
        match value {
            Value::String(s) => self.normalize_str(s),
            Value::Object(map) => Ok(vec![classify_object(map)]),
            _ => Ok(vec![NormalizedEntry::Absent]),
        }
    }

    fn normalize_str(&self, s: &str) -> Result<Vec<NormalizedEntry>> {
        if s.starts_with('{') && s.ends_with('}') {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                return self.normalize(&parsed);
            }
        }

        if let Some(name) = s.strip_prefix(UPLOAD_PREFIX) {
            return self.resolve_reference(name);
        }

        if SOURCE_RE.is_match(s) {
            return Ok(vec![NormalizedEntry::Pending(PendingUpload::from_path(s))]);
        }

        Ok(vec![NormalizedEntry::Absent])
    }

    fn resolve_reference(&self, name: &str) -> Result<Vec<NormalizedEntry>> {
        match self.uploads.get(name) {
            Some(files) => Ok(files
                .iter()
                .map(|file| NormalizedEntry::Pending(PendingUpload::from(file)))
                .collect()),
            None if self.strict_upload_refs => Err(ImageFieldError::validation(format!(
                "submission references upload '{name}' but no such file was received"
            ))),
            None => {
                warn!(reference = name, "upload reference not found, dropping entry");
                Ok(vec![NormalizedEntry::Absent])
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Object classification
// ---------------------------------------------------------------------------

fn classify_object(map: &Map<String, Value>) -> NormalizedEntry {
    if map.contains_key("filename") {
        return StoredImageRecord::from_object(map)
            .map_or(NormalizedEntry::Absent, NormalizedEntry::Stored);
    }

    match map.get("path").and_then(truthy_string) {
        Some(path) => NormalizedEntry::Pending(PendingUpload {
            source: UploadSource::parse(&path),
            original_name: ["originalname", "originalName"]
                .iter()
                .find_map(|key| map.get(*key).and_then(truthy_string)),
            mimetype: map.get("mimetype").and_then(truthy_string),
            size: map.get("size").and_then(coerce_size),
        }),
        None => NormalizedEntry::Absent,
    }
}
