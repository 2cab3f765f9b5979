//! VLAN sync audit logging
//!
//! Audit events go to the `vlansync::audit` tracing target, separate from
//! operational logs, so a subscriber can route them on their own.

use std::sync::Arc;

use tracing::Level;

use crate::device::ProjectionReport;
use crate::reconciler::ReconcileReport;
use crate::record::VlanRecord;

/// Audit logger with domain-specific methods
pub struct SyncAuditLogger {
    component: String,
}

impl SyncAuditLogger {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }

    fn log(&self, level: Level, message: String, object_ids: &[String]) {
        match level {
            Level::ERROR => {
                tracing::error!(target: "vlansync::audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            Level::WARN => {
                tracing::warn!(target: "vlansync::audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            _ => {
                tracing::info!(target: "vlansync::audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
        }
    }

    // === Store events ===

    pub fn vlan_inserted(&self, record: &VlanRecord) {
        self.log(
            Level::INFO,
            format!("VLAN {} '{}' created", record.vlan_id, record.name),
            &[record.vlan_id.to_string()],
        );
    }

    pub fn vlan_updated(&self, record: &VlanRecord) {
        self.log(
            Level::INFO,
            format!("VLAN {} '{}' updated", record.vlan_id, record.name),
            &[record.vlan_id.to_string()],
        );
    }

    pub fn vlan_deleted(&self, vlan_id: u32) {
        self.log(
            Level::INFO,
            format!("VLAN {} deleted", vlan_id),
            &[vlan_id.to_string()],
        );
    }

    pub fn sync_completed(&self, report: &ReconcileReport) {
        let ids: Vec<String> = report
            .failures
            .iter()
            .map(|f| f.vlan_id.to_string())
            .collect();
        let level = if report.is_clean() {
            Level::INFO
        } else {
            Level::WARN
        };
        self.log(
            level,
            format!(
                "VLAN sync completed: {} inserted, {} updated, {} deleted, {} failed",
                report.inserted, report.updated, report.deleted, report.failed
            ),
            &ids,
        );
    }

    // === Device events ===

    pub fn device_configured(&self, device: &str, vlan_id: u32) {
        self.log(
            Level::INFO,
            format!("VLAN {} configured on device {}", vlan_id, device),
            &[device.to_string(), vlan_id.to_string()],
        );
    }

    pub fn device_sync_completed(&self, device: &str, report: &ProjectionReport) {
        let level = if report.is_clean() {
            Level::INFO
        } else {
            Level::ERROR
        };
        self.log(
            level,
            format!(
                "VLAN sync with device {} completed: {} succeeded, {} failed",
                device,
                report.succeeded.len(),
                report.failures.len()
            ),
            &[device.to_string()],
        );
    }
}

/// Create a shared audit logger
pub fn create_audit_logger(component: &str) -> Arc<SyncAuditLogger> {
    Arc::new(SyncAuditLogger::new(component))
}
