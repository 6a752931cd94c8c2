//! libSQL item store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the records
//! that own image fields. Each record's fields are kept as a single JSON
//! document, so a save replaces every field value at once.
//!
//! **Access rules:**
//! - CLI commands that change items: read-write via [`Storage::open`]
//! - Inspection commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use imagefield_shared::{ImageFieldError, ItemId, ItemRecord, Result};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Summary row returned by [`Storage::list_items`].
#[derive(Debug, Clone)]
pub struct ItemSummary {
    pub id: String,
    pub list: String,
    pub updated_at: String,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ImageFieldError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ImageFieldError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ImageFieldError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Item operations
    // -----------------------------------------------------------------------

    /// Insert a new item record.
    pub async fn insert_item(&self, item: &ItemRecord) -> Result<()> {
        self.check_writable()?;
        let fields_json = fields_to_json(item)?;
        self.conn
            .execute(
                "INSERT INTO items (id, list, fields_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.id.to_string(),
                    item.list.as_str(),
                    fields_json,
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get an item by ID.
    pub async fn get_item(&self, id: &ItemId) -> Result<Option<ItemRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, list, fields_json, created_at, updated_at FROM items WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ImageFieldError::Storage(e.to_string())),
        }
    }

    /// List items, optionally restricted to one list, most recently updated first.
    pub async fn list_items(&self, list: Option<&str>) -> Result<Vec<ItemSummary>> {
        let mut rows = match list {
            Some(list) => {
                self.conn
                    .query(
                        "SELECT id, list, updated_at FROM items WHERE list = ?1
                         ORDER BY updated_at DESC",
                        params![list],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT id, list, updated_at FROM items ORDER BY updated_at DESC",
                        params![],
                    )
                    .await
            }
        }
        .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(ItemSummary {
                id: row
                    .get::<String>(0)
                    .map_err(|e| ImageFieldError::Storage(e.to_string()))?,
                list: row
                    .get::<String>(1)
                    .map_err(|e| ImageFieldError::Storage(e.to_string()))?,
                updated_at: row
                    .get::<String>(2)
                    .map_err(|e| ImageFieldError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }

    /// Write an item's fields back in one statement.
    pub async fn save_item(&self, item: &ItemRecord) -> Result<()> {
        self.check_writable()?;
        let fields_json = fields_to_json(item)?;
        let changed = self
            .conn
            .execute(
                "UPDATE items SET fields_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    fields_json,
                    item.updated_at.to_rfc3339(),
                    item.id.to_string()
                ],
            )
            .await
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(ImageFieldError::validation(format!(
                "item {} does not exist",
                item.id
            )));
        }
        Ok(())
    }
}

fn fields_to_json(item: &ItemRecord) -> Result<String> {
    serde_json::to_string(&item.fields)
        .map_err(|e| ImageFieldError::Storage(format!("failed to encode fields: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ImageFieldError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to an [`ItemRecord`].
fn row_to_item(row: &libsql::Row) -> Result<ItemRecord> {
    let id: String = row
        .get(0)
        .map_err(|e| ImageFieldError::Storage(e.to_string()))?;
    let fields_json: String = row
        .get(2)
        .map_err(|e| ImageFieldError::Storage(e.to_string()))?;
    let created_at: String = row
        .get(3)
        .map_err(|e| ImageFieldError::Storage(e.to_string()))?;
    let updated_at: String = row
        .get(4)
        .map_err(|e| ImageFieldError::Storage(e.to_string()))?;

    Ok(ItemRecord {
        id: id
            .parse()
            .map_err(|e| ImageFieldError::Storage(format!("invalid item id {id}: {e}")))?,
        list: row
            .get::<String>(1)
            .map_err(|e| ImageFieldError::Storage(e.to_string()))?,
        fields: serde_json::from_str(&fields_json)
            .map_err(|e| ImageFieldError::parse(format!("invalid fields for item {id}: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagefield_shared::{FieldValue, Item, StoredImageRecord};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("if_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn image(name: &str) -> StoredImageRecord {
        StoredImageRecord {
            filename: name.into(),
            url: format!("/uploads/{name}"),
            mimetype: "image/png".into(),
            size: 12,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("if_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn item_crud() {
        let storage = test_storage().await;
        let mut item = ItemRecord::new("Post");
        storage.insert_item(&item).await.expect("insert item");

        let found = storage.get_item(&item.id).await.expect("get item");
        let found = found.expect("item exists");
        assert_eq!(found.list, "Post");
        assert!(found.get("images").is_empty());

        item.set("images", FieldValue(vec![image("a.png"), image("b.png")]));
        storage.save_item(&item).await.expect("save item");

        let reloaded = storage.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.get("images"),
            FieldValue(vec![image("a.png"), image("b.png")])
        );
    }

    #[tokio::test]
    async fn list_items_filters_by_list() {
        let storage = test_storage().await;
        storage.insert_item(&ItemRecord::new("Post")).await.unwrap();
        storage.insert_item(&ItemRecord::new("Post")).await.unwrap();
        storage.insert_item(&ItemRecord::new("Gallery")).await.unwrap();

        assert_eq!(storage.list_items(None).await.unwrap().len(), 3);
        let galleries = storage.list_items(Some("Gallery")).await.unwrap();
        assert_eq!(galleries.len(), 1);
        assert_eq!(galleries[0].list, "Gallery");
    }

    #[tokio::test]
    async fn saving_unknown_item_fails() {
        let storage = test_storage().await;
        let err = storage
            .save_item(&ItemRecord::new("Post"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("if_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.unwrap());

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let err = ro.insert_item(&ItemRecord::new("Post")).await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn missing_item_is_none() {
        let storage = test_storage().await;
        assert!(storage.get_item(&ItemId::new()).await.unwrap().is_none());
    }
}
