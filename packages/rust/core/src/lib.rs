//! Value reconciliation for multi-valued image fields.
//!
//! This crate turns a raw field submission into the committed image sequence:
//! - [`normalizer`] — classifies each submitted entry
//! - [`coordinator`] — resolves pending uploads concurrently, in order
//! - [`field`] — the [`ImagesField`] type and its reconciliation pass

pub mod coordinator;
pub mod field;
pub mod normalizer;

pub use coordinator::resolve_entries;
pub use field::{FieldPaths, ImagesField, ImagesFieldOptions, ReconcileOutcome};
pub use normalizer::{NormalizedEntry, Normalizer, UPLOAD_PREFIX};
