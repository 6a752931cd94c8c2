//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use imagefield_adapters::{LocalAdapter, MemoryAdapter, SourceReader, StorageAdapter};
use imagefield_core::{ImagesField, ImagesFieldOptions, ReconcileOutcome};
use imagefield_shared::{
    AppConfig, FieldConfig, Item, ItemId, ItemRecord, UploadTable, UploadedFile, expand_home,
    init_config, load_config, load_config_from,
};
use imagefield_storage::Storage;
use serde_json::Value;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// imagefield — reconcile image field values on stored items.
#[derive(Parser)]
#[command(
    name = "imagefield",
    version,
    about = "Reconcile multi-valued image fields: keep stored images, upload new ones, commit once.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.imagefield/imagefield.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Item database path (overrides the config file).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Item management.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// List stored items.
    List {
        /// Only show items from this list.
        #[arg(long)]
        list: Option<String>,
    },

    /// Submit a value for an images field and commit the result.
    Reconcile {
        /// Item ID.
        #[arg(long)]
        item: String,

        /// Field path on the item (e.g. `images`).
        #[arg(long)]
        field: String,

        /// Submitted data as a JSON object.
        #[arg(long, conflicts_with = "data_file")]
        data: Option<String>,

        /// Read the submitted data object from a JSON file.
        #[arg(long)]
        data_file: Option<PathBuf>,

        /// Register a received file under a reference name (`name=path`).
        /// May be repeated; repeating a name adds more files to it.
        #[arg(long = "upload", value_name = "NAME=PATH")]
        uploads: Vec<String>,

        /// Upload a file and append a reference to it to the submitted value.
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Maximum concurrent uploads (overrides the config file; 0 = unbounded).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Reject references to uploads that were not received.
        #[arg(long)]
        strict: bool,

        /// Store uploads in memory and don't save the item.
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Item subcommands.
#[derive(Subcommand)]
pub(crate) enum ItemAction {
    /// Create an empty item.
    Create {
        /// List (collection) the item belongs to.
        #[arg(long)]
        list: String,
    },
    /// Show an item's fields.
    Show {
        /// Item ID.
        id: String,

        /// Only show this images field, formatted as URLs.
        #[arg(long)]
        field: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "imagefield=info",
        1 => "imagefield=debug",
        _ => "imagefield=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => expand_home(&config.defaults.database_path)?,
    };

    match cli.command {
        Command::Item { action } => match action {
            ItemAction::Create { list } => cmd_item_create(&db_path, &list).await,
            ItemAction::Show { id, field } => {
                cmd_item_show(&db_path, &id, field.as_deref()).await
            }
        },
        Command::List { list } => cmd_list(&db_path, list.as_deref()).await,
        Command::Reconcile {
            item,
            field,
            data,
            data_file,
            uploads,
            files,
            concurrency,
            strict,
            dry_run,
        } => {
            let mut field_config = FieldConfig::from(&config);
            if let Some(limit) = concurrency {
                field_config.upload_concurrency = (limit > 0).then_some(limit);
            }
            field_config.strict_upload_refs |= strict;

            let request = ReconcileRequest {
                item: &item,
                field: &field,
                data: read_data(data.as_deref(), data_file.as_deref())?,
                uploads: &uploads,
                files: &files,
                dry_run,
            };
            cmd_reconcile(&db_path, &config, field_config, request).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_item_create(db_path: &Path, list: &str) -> Result<()> {
    let storage = Storage::open(db_path).await?;
    let item = ItemRecord::new(list);
    storage.insert_item(&item).await?;

    info!(id = %item.id, list, "created item");
    println!("{}", item.id);
    Ok(())
}

async fn cmd_item_show(db_path: &Path, id: &str, field: Option<&str>) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let item = find_item(&storage, id).await?;

    match field {
        Some(path) => {
            let value = item.get(path);
            println!();
            println!("  Item:   {}", item.id);
            println!("  Field:  {}.{path}", item.list);
            println!("  Images: {}", value.len());
            for record in &value {
                println!("    {} ({}, {} bytes)", record.url, record.mimetype, record.size);
            }
            println!();
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
    }
    Ok(())
}

async fn cmd_list(db_path: &Path, list: Option<&str>) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let items = storage.list_items(list).await?;

    if items.is_empty() {
        println!("No items found.");
        return Ok(());
    }

    println!("{:<38} {:<16} UPDATED", "ID", "LIST");
    for item in items {
        println!("{:<38} {:<16} {}", item.id, item.list, item.updated_at);
    }
    Ok(())
}

/// Inputs of one `reconcile` invocation.
struct ReconcileRequest<'a> {
    item: &'a str,
    field: &'a str,
    data: Value,
    uploads: &'a [String],
    files: &'a [PathBuf],
    dry_run: bool,
}

async fn cmd_reconcile(
    db_path: &Path,
    config: &AppConfig,
    field_config: FieldConfig,
    request: ReconcileRequest<'_>,
) -> Result<()> {
    let storage = if request.dry_run {
        Storage::open_readonly(db_path).await?
    } else {
        Storage::open(db_path).await?
    };
    let mut item = find_item(&storage, request.item).await?;

    let adapter: Arc<dyn StorageAdapter> = if request.dry_run {
        Arc::new(MemoryAdapter::new()?.with_reader(SourceReader::from_config(&config.storage)?))
    } else {
        Arc::new(LocalAdapter::from_config(&config.storage)?)
    };

    let field = ImagesField::new(
        item.list.clone(),
        request.field,
        ImagesFieldOptions {
            storage: Some(adapter),
            config: field_config,
        },
    )?;

    let mut data = request.data;
    let mut table = UploadTable::new();
    for arg in request.uploads {
        let (name, path) = arg
            .split_once('=')
            .ok_or_else(|| eyre!("invalid --upload '{arg}': expected NAME=PATH"))?;
        table.insert(name, uploaded_file(Path::new(path))?);
    }
    for (i, path) in request.files.iter().enumerate() {
        let name = format!("{}-{i}", field.paths().upload);
        table.insert(name.clone(), uploaded_file(path)?);
        append_reference(&mut data, field.path(), &name)?;
    }

    info!(
        item = %item.id,
        field = field.path(),
        uploads = table.len(),
        dry_run = request.dry_run,
        "reconciling field"
    );

    let outcome = field.update_item(&mut item, &data, &table).await?;

    let saved = !request.dry_run && outcome != ReconcileOutcome::Unchanged;
    if saved {
        storage.save_item(&item).await?;
    }

    println!();
    match outcome {
        ReconcileOutcome::Unchanged => println!("  No value submitted; field unchanged."),
        ReconcileOutcome::Cleared => println!("  Field cleared."),
        ReconcileOutcome::Committed { images, uploaded } => {
            println!("  Field committed!");
            println!("  Images:   {images}");
            println!("  Uploaded: {uploaded}");
        }
    }
    println!("  Value:    {}", field.format(&item));
    if request.dry_run {
        println!("  (dry run: nothing was saved)");
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_item(storage: &Storage, id: &str) -> Result<ItemRecord> {
    let id: ItemId = id
        .parse()
        .map_err(|e| eyre!("invalid item id '{id}': {e}"))?;
    storage
        .get_item(&id)
        .await?
        .ok_or_else(|| eyre!("item {id} not found"))
}

/// Parse the submitted data object; an absent submission is `{}`.
fn read_data(data: Option<&str>, data_file: Option<&Path>) -> Result<Value> {
    let raw = match (data, data_file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };

    let value: Value = serde_json::from_str(&raw).map_err(|e| eyre!("invalid data JSON: {e}"))?;
    if !value.is_object() {
        return Err(eyre!("submitted data must be a JSON object"));
    }
    Ok(value)
}

/// Describe a received file: original name and size from the filesystem.
fn uploaded_file(path: &Path) -> Result<UploadedFile> {
    let metadata =
        std::fs::metadata(path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))?;
    let mut file = UploadedFile::new(path);
    file.original_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    file.size = Some(metadata.len());
    Ok(file)
}

/// Append an `upload:<name>` reference to the field's slot in `data`.
fn append_reference(data: &mut Value, field: &str, name: &str) -> Result<()> {
    let object = data
        .as_object_mut()
        .ok_or_else(|| eyre!("submitted data must be a JSON object"))?;
    let reference = Value::String(format!("{}{name}", imagefield_core::UPLOAD_PREFIX));

    match object.get_mut(field) {
        Some(Value::Array(values)) => values.push(reference),
        Some(Value::Null) | None => {
            object.insert(field.to_string(), Value::Array(vec![reference]));
        }
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, reference]);
        }
    }
    Ok(())
}
