//! Entry points behind the CLI: parse-and-reconcile, and push to a device.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::audit::{SyncAuditLogger, create_audit_logger};
use crate::device::{Credentials, ProjectError, ProjectionReport, Projector, SessionProvider};
use crate::inventory::{DeviceTarget, InventoryError};
use crate::parser::{ParseError, VlanParser, records_from_rows};
use crate::reconciler::{DiffPlan, ReconcileReport, Reconciler};
use crate::record::VlanRecord;
use crate::store::{SqliteStore, StoreError, VlanStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("device failed: {0}")]
    Project(#[from] ProjectError),

    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),
}

pub struct VlanSyncService {
    store: Arc<dyn VlanStore>,
    parser: VlanParser,
    reconciler: Reconciler<dyn VlanStore>,
    audit: Arc<SyncAuditLogger>,
}

impl VlanSyncService {
    pub fn new(store: Arc<dyn VlanStore>, parser: VlanParser) -> Self {
        let audit = create_audit_logger("vlansync");
        Self {
            reconciler: Reconciler::new(store.clone(), audit.clone()),
            store,
            parser,
            audit,
        }
    }

    /// Open the SQLite store at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>, parser: VlanParser) -> Result<Self, SyncError> {
        let store = SqliteStore::open(db_path).await?;
        Ok(Self::new(Arc::new(store), parser))
    }

    /// Parse `raw_text` and reconcile the store with the result. A parse
    /// failure leaves the store untouched.
    pub async fn sync_text(&self, raw_text: &str) -> Result<ReconcileReport, SyncError> {
        let records = self.parser.parse(raw_text)?;
        info!(records = records.len(), "Parsed VLAN records");
        Ok(self.reconciler.reconcile(&records).await?)
    }

    /// Reconcile from rows that were already split into fields.
    pub async fn sync_rows(&self, rows: &[Vec<String>]) -> Result<ReconcileReport, SyncError> {
        let records = records_from_rows(rows)?;
        Ok(self.reconciler.reconcile(&records).await?)
    }

    /// What [`VlanSyncService::sync_text`] would change, without writing.
    pub async fn plan_text(&self, raw_text: &str) -> Result<DiffPlan, SyncError> {
        let records = self.parser.parse(raw_text)?;
        Ok(self.reconciler.plan(&records).await?)
    }

    pub async fn plan_rows(&self, rows: &[Vec<String>]) -> Result<DiffPlan, SyncError> {
        let records = records_from_rows(rows)?;
        Ok(self.reconciler.plan(&records).await?)
    }

    pub async fn list(&self) -> Result<Vec<VlanRecord>, SyncError> {
        self.store.ensure_schema().await?;
        Ok(self.store.list_all().await?)
    }

    /// Push every stored VLAN to the device at `address`.
    pub async fn push<P: SessionProvider>(
        &self,
        provider: P,
        address: &str,
        credentials: &Credentials,
    ) -> Result<ProjectionReport, SyncError> {
        let records = self.list().await?;
        info!(device = %address, records = records.len(), "Pushing VLANs to device");

        let projector = Projector::new(provider, self.audit.clone());
        Ok(projector.project(address, credentials, &records).await?)
    }

    /// [`VlanSyncService::push`] over TCP to a resolved inventory target.
    /// The report names the device by its inventory name.
    pub async fn push_target(&self, target: &DeviceTarget) -> Result<ProjectionReport, SyncError> {
        info!(device = %target.name, address = %target.address, "Using inventory device");
        let mut report = self
            .push(target.provider(), &target.address, &target.credentials)
            .await?;
        report.device = target.name.clone();
        Ok(report)
    }
}
