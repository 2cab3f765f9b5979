//! Store error types.

use thiserror::Error;

use super::Operation;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A per-record write or lookup failed (I/O, constraint, transaction).
    #[error("{operation} failed for VLAN {vlan_id}: {source}")]
    Record {
        operation: Operation,
        vlan_id: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The record was rejected before touching the database.
    #[error("{operation} rejected VLAN {vlan_id}: {reason}")]
    Invalid {
        operation: Operation,
        vlan_id: u32,
        reason: String,
    },

    /// Storage could not be reached or the schema could not be set up.
    #[error("storage unavailable during {operation}: {source}")]
    Unavailable {
        operation: Operation,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Record { operation, .. }
            | Self::Invalid { operation, .. }
            | Self::Unavailable { operation, .. } => *operation,
        }
    }

    pub fn vlan_id(&self) -> Option<u32> {
        match self {
            Self::Record { vlan_id, .. } | Self::Invalid { vlan_id, .. } => Some(*vlan_id),
            Self::Unavailable { .. } => None,
        }
    }

    pub(crate) fn record(operation: Operation, vlan_id: u32) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Record {
            operation,
            vlan_id,
            source,
        }
    }

    pub(crate) fn unavailable(operation: Operation) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Unavailable { operation, source }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
