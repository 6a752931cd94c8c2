//! Shared types, error model, and configuration for the images field tooling.
//!
//! This crate is the foundation depended on by all other imagefield crates.
//! It provides:
//! - [`ImageFieldError`] — the unified error type
//! - Domain types ([`StoredImageRecord`], [`FieldValue`], [`PendingUpload`], [`UploadTable`])
//! - The [`Item`] collaborator trait and the [`ItemRecord`] implementation
//! - Configuration ([`AppConfig`], [`FieldConfig`], config loading)

pub mod config;
pub mod error;
pub mod item;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FieldConfig, StorageConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{ImageFieldError, Result};
pub use item::{Item, ItemId, ItemRecord};
pub use types::{
    FieldValue, PendingUpload, StoredImageRecord, UploadSource, UploadTable, UploadedFile,
};
