//! VLAN state store.
//!
//! The [`VlanStore`] trait is what the reconciler talks to; [`SqliteStore`]
//! is the durable implementation. Every mutating call is its own
//! transaction, so a failure on one record never leaves partial state and
//! never affects the records around it.

mod error;
mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;

use crate::record::VlanRecord;

/// Store operation, used to label errors and report entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Schema,
    Get,
    List,
    Insert,
    Update,
    Upsert,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Schema => "schema",
            Self::Get => "get",
            Self::List => "list",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// What an upsert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait VlanStore: Send + Sync {
    /// Create the table and key index if absent. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<()>;

    /// Look up one record; absence is `Ok(None)`.
    async fn get(&self, vlan_id: u32) -> Result<Option<VlanRecord>>;

    /// All records, ordered by VLAN id.
    async fn list_all(&self) -> Result<Vec<VlanRecord>>;

    async fn insert(&self, record: &VlanRecord) -> Result<()>;

    /// Overwrite name and description. Returns false if the VLAN is absent.
    async fn update(&self, vlan_id: u32, name: &str, description: &str) -> Result<bool>;

    /// Insert or overwrite keyed on `vlan_id` in a single transaction.
    async fn upsert(&self, record: &VlanRecord) -> Result<UpsertOutcome>;

    /// Returns false if the VLAN was already absent.
    async fn delete(&self, vlan_id: u32) -> Result<bool>;
}
