//! Reconciler: make the store match an observed VLAN set.
//!
//! Candidates are applied first (insert or overwrite), then a fresh read
//! of the store drives pruning of every VLAN the candidate set lacks.
//! Each record is handled on its own: a failed write is recorded in the
//! report and the loop moves on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::SyncAuditLogger;
use crate::record::VlanRecord;
use crate::store::{Operation, StoreError, UpsertOutcome, VlanStore};

/// One record that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub vlan_id: u32,
    pub operation: Operation,
    pub cause: String,
}

/// Outcome of one reconciliation call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, vlan_id: u32, err: &StoreError) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            vlan_id,
            operation: err.operation(),
            cause: err.to_string(),
        });
    }
}

/// Key-level difference between a candidate set and the stored set.
///
/// Keys present on both sides always land in `to_update`: matching records
/// are rewritten unconditionally, without comparing fields.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DiffPlan {
    pub to_insert: Vec<u32>,
    pub to_update: Vec<u32>,
    pub to_delete: Vec<u32>,
}

impl DiffPlan {
    pub fn compute(candidates: &[VlanRecord], stored: &[VlanRecord]) -> Self {
        let desired: BTreeSet<u32> = candidates.iter().map(|r| r.vlan_id).collect();
        let existing: BTreeSet<u32> = stored.iter().map(|r| r.vlan_id).collect();

        Self {
            to_insert: desired.difference(&existing).copied().collect(),
            to_update: desired.intersection(&existing).copied().collect(),
            to_delete: existing.difference(&desired).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    audit: Arc<SyncAuditLogger>,
}

impl<S: VlanStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, audit: Arc<SyncAuditLogger>) -> Self {
        Self { store, audit }
    }

    /// Compute what [`Reconciler::reconcile`] would do, without writing records.
    pub async fn plan(&self, candidates: &[VlanRecord]) -> Result<DiffPlan, StoreError> {
        self.store.ensure_schema().await?;
        let stored = self.store.list_all().await?;
        Ok(DiffPlan::compute(candidates, &stored))
    }

    /// Apply `candidates` to the store.
    ///
    /// Fails only when the schema cannot be ensured or the store cannot be
    /// listed; per-record failures are collected in the report. When the
    /// same VLAN id appears more than once, the last occurrence wins.
    pub async fn reconcile(&self, candidates: &[VlanRecord]) -> Result<ReconcileReport, StoreError> {
        self.store.ensure_schema().await?;

        let desired: BTreeMap<u32, &VlanRecord> =
            candidates.iter().map(|r| (r.vlan_id, r)).collect();
        info!(candidates = desired.len(), "Reconciling VLANs");

        let mut report = ReconcileReport::default();

        // 1. Add or refresh every candidate
        for record in desired.values() {
            match self.store.upsert(record).await {
                Ok(UpsertOutcome::Inserted) => {
                    report.inserted += 1;
                    self.audit.vlan_inserted(record);
                }
                Ok(UpsertOutcome::Updated) => {
                    report.updated += 1;
                    self.audit.vlan_updated(record);
                }
                Err(e) => {
                    warn!(vlan_id = record.vlan_id, error = %e, "Failed to apply VLAN");
                    report.record_failure(record.vlan_id, &e);
                }
            }
        }

        // 2. Prune VLANs absent from the candidates, reading the store again
        let stored = self.store.list_all().await?;
        for vlan_id in stored
            .iter()
            .map(|r| r.vlan_id)
            .filter(|id| !desired.contains_key(id))
        {
            match self.store.delete(vlan_id).await {
                Ok(true) => {
                    report.deleted += 1;
                    self.audit.vlan_deleted(vlan_id);
                }
                Ok(false) => debug!(vlan_id, "VLAN already removed"),
                Err(e) => {
                    warn!(vlan_id, error = %e, "Failed to delete VLAN");
                    report.record_failure(vlan_id, &e);
                }
            }
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            "VLAN reconciliation finished"
        );
        self.audit.sync_completed(&report);

        Ok(report)
    }
}
