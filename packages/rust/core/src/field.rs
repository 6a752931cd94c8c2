//! The images field: construction checks and the reconciliation pass.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use imagefield_adapters::StorageAdapter;
use imagefield_shared::{FieldConfig, FieldValue, ImageFieldError, Item, Result, UploadTable};

use crate::coordinator::resolve_entries;
use crate::normalizer::Normalizer;

/// Input names derived from the field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPaths {
    /// `<path>_upload`
    pub upload: String,
    /// `<path>_uploads`
    pub uploads: String,
    /// `<path>_action`
    pub action: String,
}

impl FieldPaths {
    fn for_path(path: &str) -> Self {
        Self {
            upload: format!("{path}_upload"),
            uploads: format!("{path}_uploads"),
            action: format!("{path}_action"),
        }
    }
}

/// Options accepted when constructing an [`ImagesField`].
#[derive(Clone, Default)]
pub struct ImagesFieldOptions {
    /// Where new uploads are stored. Required.
    pub storage: Option<Arc<dyn StorageAdapter>>,
    pub config: FieldConfig,
}

/// What a reconciliation pass did to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No value was submitted; the item was not touched.
    Unchanged,
    /// An empty value was submitted; the field now holds no images.
    Cleared,
    /// A new sequence was committed.
    Committed { images: usize, uploaded: usize },
}

/// A multi-valued image field on a list.
pub struct ImagesField {
    list_key: String,
    path: String,
    paths: FieldPaths,
    storage: Arc<dyn StorageAdapter>,
    config: FieldConfig,
}

impl std::fmt::Debug for ImagesField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagesField")
            .field("list_key", &self.list_key)
            .field("path", &self.path)
            .field("storage", &self.storage.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ImagesField {
    /// Display name of the field type.
    pub const PROPER_NAME: &'static str = "Images";

    /// Create the field `path` on list `list_key`.
    ///
    /// Fails if no storage adapter was given or the adapter doesn't produce URLs.
    pub fn new(
        list_key: impl Into<String>,
        path: impl Into<String>,
        options: ImagesFieldOptions,
    ) -> Result<Self> {
        let list_key = list_key.into();
        let path = path.into();

        let Some(storage) = options.storage else {
            return Err(ImageFieldError::config(format!(
                "File fields ({list_key}.{path}) require storage to be provided."
            )));
        };
        if !storage.schema().url {
            return Err(ImageFieldError::config(format!(
                "File fields ({list_key}.{path}) require url to be set true in storage schema."
            )));
        }

        Ok(Self {
            paths: FieldPaths::for_path(&path),
            list_key,
            path,
            storage,
            config: options.config,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    pub fn paths(&self) -> &FieldPaths {
        &self.paths
    }

    /// The field's stored value, always a sequence.
    pub fn get_data(&self, item: &(impl Item + ?Sized)) -> FieldValue {
        item.get(&self.path)
    }

    /// Image URLs joined for display.
    pub fn format(&self, item: &(impl Item + ?Sized)) -> String {
        item.get(&self.path)
            .iter()
            .map(|img| img.url.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Every submission is accepted; filtering happens during reconciliation.
    pub fn input_is_valid(&self, _data: &Value) -> bool {
        true
    }

    /// The raw submitted value for this field, by exact key then dotted path.
    ///
    /// `None` means nothing was submitted; `Some(Value::Null)` was submitted.
    pub fn value_from_data<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        if let Some(value) = data.get(&self.path) {
            return Some(value);
        }
        self.path
            .split('.')
            .try_fold(data, |current, segment| current.get(segment))
    }

    /// Rebuild the field's value from a submission and commit it to `item`.
    ///
    /// The item is written at most once, after every upload has finished. On
    /// any failure the item keeps its previous value.
    #[instrument(skip_all, fields(list = %self.list_key, path = %self.path))]
    pub async fn update_item<I: Item + ?Sized>(
        &self,
        item: &mut I,
        data: &Value,
        uploads: &UploadTable,
    ) -> Result<ReconcileOutcome> {
        let Some(raw) = self.value_from_data(data) else {
            debug!("no value submitted, leaving field unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        };

        if is_falsy(raw) {
            item.set(&self.path, FieldValue::empty());
            info!("empty value submitted, cleared field");
            return Ok(ReconcileOutcome::Cleared);
        }

        let values = match raw {
            Value::Array(values) => values.as_slice(),
            single => std::slice::from_ref(single),
        };

        let entries = Normalizer::new(uploads)
            .strict_upload_refs(self.config.strict_upload_refs)
            .normalize_all(values)?;
        let uploaded = entries.iter().filter(|e| e.is_pending()).count();

        let resolved = resolve_entries(
            entries,
            self.storage.as_ref(),
            self.config.upload_concurrency,
        )
        .await?;

        let images: Vec<_> = resolved
            .into_iter()
            .flatten()
            .filter(|record| !record.filename.is_empty())
            .collect();
        let count = images.len();

        item.set(&self.path, FieldValue::from(images));
        info!(submitted = values.len(), images = count, uploaded, "committed field value");

        Ok(ReconcileOutcome::Committed {
            images: count,
            uploaded,
        })
    }
}

/// Loose submission truthiness: `null`, `false`, `0`, and `""` are empty.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
