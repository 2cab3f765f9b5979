use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use super::{Operation, Result, StoreError, UpsertOutcome, VlanStore};
use crate::record::VlanRecord;

/// SQLite-backed VLAN store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file. The table itself is created
    /// lazily by [`VlanStore::ensure_schema`].
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(StoreError::unavailable(Operation::Open))?;

        debug!(path = %db_path.as_ref().display(), "Opened VLAN store");
        Ok(Self { pool })
    }

    fn validate(operation: Operation, record: &VlanRecord) -> Result<()> {
        record
            .validate()
            .map_err(|reason| StoreError::Invalid {
                operation,
                vlan_id: record.vlan_id,
                reason,
            })
    }

    fn row_to_record(operation: Operation, r: &SqliteRow) -> Result<VlanRecord> {
        Ok(VlanRecord {
            vlan_id: r
                .try_get("vlan_id")
                .map_err(StoreError::unavailable(operation))?,
            name: r
                .try_get("name")
                .map_err(StoreError::unavailable(operation))?,
            description: r
                .try_get("description")
                .map_err(StoreError::unavailable(operation))?,
        })
    }
}

#[async_trait]
impl VlanStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<()> {
        let map_err = || StoreError::unavailable(Operation::Schema);
        let mut tx = self.pool.begin().await.map_err(map_err())?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vlans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vlan_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_err())?;

        // Backs upsert; fails on legacy tables that already hold duplicate ids.
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_vlans_vlan_id ON vlans (vlan_id)")
            .execute(&mut *tx)
            .await
            .map_err(map_err())?;

        tx.commit().await.map_err(map_err())?;
        Ok(())
    }

    async fn get(&self, vlan_id: u32) -> Result<Option<VlanRecord>> {
        let row = sqlx::query("SELECT vlan_id, name, description FROM vlans WHERE vlan_id = ?")
            .bind(vlan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable(Operation::Get))?;

        row.map(|r| Self::row_to_record(Operation::Get, &r))
            .transpose()
    }

    async fn list_all(&self) -> Result<Vec<VlanRecord>> {
        let rows = sqlx::query("SELECT vlan_id, name, description FROM vlans ORDER BY vlan_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::unavailable(Operation::List))?;

        rows.iter()
            .map(|r| Self::row_to_record(Operation::List, r))
            .collect()
    }

    async fn insert(&self, record: &VlanRecord) -> Result<()> {
        Self::validate(Operation::Insert, record)?;
        let map_err = || StoreError::record(Operation::Insert, record.vlan_id);

        let mut tx = self.pool.begin().await.map_err(map_err())?;
        sqlx::query("INSERT INTO vlans (vlan_id, name, description) VALUES (?, ?, ?)")
            .bind(record.vlan_id)
            .bind(&record.name)
            .bind(&record.description)
            .execute(&mut *tx)
            .await
            .map_err(map_err())?;
        tx.commit().await.map_err(map_err())?;

        Ok(())
    }

    async fn update(&self, vlan_id: u32, name: &str, description: &str) -> Result<bool> {
        Self::validate(
            Operation::Update,
            &VlanRecord::new(vlan_id, name, description),
        )?;
        let map_err = || StoreError::record(Operation::Update, vlan_id);

        let mut tx = self.pool.begin().await.map_err(map_err())?;
        let result = sqlx::query("UPDATE vlans SET name = ?, description = ? WHERE vlan_id = ?")
            .bind(name)
            .bind(description)
            .bind(vlan_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err())?;
        tx.commit().await.map_err(map_err())?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert(&self, record: &VlanRecord) -> Result<UpsertOutcome> {
        Self::validate(Operation::Upsert, record)?;
        let map_err = || StoreError::record(Operation::Upsert, record.vlan_id);

        // Writing first takes the write lock up front, so the existence
        // check and the insert cannot interleave with another writer.
        let mut tx = self.pool.begin().await.map_err(map_err())?;
        let updated = sqlx::query("UPDATE vlans SET name = ?, description = ? WHERE vlan_id = ?")
            .bind(&record.name)
            .bind(&record.description)
            .bind(record.vlan_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err())?
            .rows_affected()
            > 0;

        if !updated {
            sqlx::query("INSERT INTO vlans (vlan_id, name, description) VALUES (?, ?, ?)")
                .bind(record.vlan_id)
                .bind(&record.name)
                .bind(&record.description)
                .execute(&mut *tx)
                .await
                .map_err(map_err())?;
        }
        tx.commit().await.map_err(map_err())?;

        Ok(if updated {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn delete(&self, vlan_id: u32) -> Result<bool> {
        let map_err = || StoreError::record(Operation::Delete, vlan_id);

        let mut tx = self.pool.begin().await.map_err(map_err())?;
        let result = sqlx::query("DELETE FROM vlans WHERE vlan_id = ?")
            .bind(vlan_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err())?;
        tx.commit().await.map_err(map_err())?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("vlan.db")).await.unwrap();
        store.ensure_schema().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_vlan_crud() {
        let (store, _dir) = setup_store().await;

        // Insert
        store
            .insert(&VlanRecord::new(10, "USERS", "Office users"))
            .await
            .unwrap();

        // Get
        let fetched = store.get(10).await.unwrap().unwrap();
        assert_eq!(fetched.name, "USERS");
        assert_eq!(fetched.description, "Office users");
        assert!(store.get(11).await.unwrap().is_none());

        // Update
        assert!(store.update(10, "STAFF", "").await.unwrap());
        let updated = store.get(10).await.unwrap().unwrap();
        assert_eq!(updated, VlanRecord::new(10, "STAFF", ""));
        assert!(!store.update(99, "NOPE", "").await.unwrap());

        // Delete
        assert!(store.delete(10).await.unwrap());
        assert!(!store.delete(10).await.unwrap());
        assert!(store.get(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (store, _dir) = setup_store().await;
        store.insert(&VlanRecord::new(1, "default", "")).await.unwrap();

        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_ordered_by_vlan_id() {
        let (store, _dir) = setup_store().await;
        for id in [30, 10, 20] {
            store
                .insert(&VlanRecord::new(id, format!("VLAN{id}"), ""))
                .await
                .unwrap();
        }

        let ids: Vec<u32> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.vlan_id)
            .collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_a_record_error() {
        let (store, _dir) = setup_store().await;
        store.insert(&VlanRecord::new(5, "A", "")).await.unwrap();

        let err = store
            .insert(&VlanRecord::new(5, "B", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Record { .. }));
        assert_eq!(err.operation(), Operation::Insert);
        assert_eq!(err.vlan_id(), Some(5));

        // Original row untouched
        assert_eq!(store.get(5).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test]
    async fn test_invalid_records_are_rejected_before_writing() {
        let (store, _dir) = setup_store().await;

        let err = store
            .insert(&VlanRecord::new(7, "BAD", "line\nvlan 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid { vlan_id: 7, .. }));

        let err = store.update(7, "", "").await.unwrap_err();
        assert_eq!(err.operation(), Operation::Update);

        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let (store, _dir) = setup_store().await;

        let outcome = store.upsert(&VlanRecord::new(20, "VOICE", "")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = store
            .upsert(&VlanRecord::new(20, "VOICE", "Phones"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![VlanRecord::new(20, "VOICE", "Phones")]);
    }

    #[tokio::test]
    async fn test_state_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vlan.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.ensure_schema().await.unwrap();
            store.insert(&VlanRecord::new(1, "default", "")).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.get(1).await.unwrap().unwrap().name, "default");
    }

    #[tokio::test]
    async fn test_list_without_schema_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("fresh.db")).await.unwrap();

        let err = store.list_all().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Unavailable {
                operation: Operation::List,
                ..
            }
        ));
    }
}
