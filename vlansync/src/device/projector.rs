use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{CommandError, Credentials, DeviceSession, ProjectError, SessionProvider, vlan_commands};
use crate::audit::SyncAuditLogger;
use crate::record::VlanRecord;

/// Lifecycle of one device session within a projection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticated,
    Privileged,
    Sending,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Privileged => "privileged",
            Self::Sending => "sending",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One VLAN the device did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub vlan_id: u32,
    pub cause: String,
}

/// Per-record outcome of one projection call. `succeeded` keeps input order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionReport {
    pub device: String,
    pub succeeded: Vec<u32>,
    pub failures: Vec<DeviceFailure>,
}

impl ProjectionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, vlan_id: u32, err: &CommandError) {
        self.failures.push(DeviceFailure {
            vlan_id,
            cause: err.to_string(),
        });
    }
}

/// Pushes VLAN records to a device through sessions from `P`.
pub struct Projector<P> {
    provider: P,
    audit: Arc<SyncAuditLogger>,
}

impl<P: SessionProvider> Projector<P> {
    pub fn new(provider: P, audit: Arc<SyncAuditLogger>) -> Self {
        Self { provider, audit }
    }

    /// Open a session, elevate, send one batch per record, close.
    ///
    /// Connect and privilege failures abort the call. A rejected record is
    /// added to the report and the next one is still sent. Once a session
    /// has been opened it is closed on every path.
    pub async fn project(
        &self,
        address: &str,
        credentials: &Credentials,
        records: &[VlanRecord],
    ) -> Result<ProjectionReport, ProjectError> {
        let mut state = SessionState::Idle;
        advance(address, &mut state, SessionState::Connecting);

        let mut session = match self.provider.open(address, credentials).await {
            Ok(session) => session,
            Err(e) => {
                error!(device = %address, error = %e, "Failed to open device session");
                return Err(e.into());
            }
        };
        advance(address, &mut state, SessionState::Authenticated);

        let result = self
            .configure(&mut session, address, records, &mut state)
            .await;

        session.close().await;
        advance(address, &mut state, SessionState::Closed);

        if let Ok(report) = &result {
            info!(
                device = %address,
                succeeded = report.succeeded.len(),
                failed = report.failures.len(),
                "Device projection finished"
            );
            self.audit.device_sync_completed(address, report);
        }
        result
    }

    async fn configure(
        &self,
        session: &mut P::Session,
        address: &str,
        records: &[VlanRecord],
        state: &mut SessionState,
    ) -> Result<ProjectionReport, ProjectError> {
        if let Err(e) = session.elevate().await {
            error!(device = %address, error = %e, "Failed to enter privileged mode");
            return Err(e.into());
        }
        advance(address, state, SessionState::Privileged);
        advance(address, state, SessionState::Sending);

        let mut report = ProjectionReport {
            device: address.to_string(),
            ..Default::default()
        };

        for record in records {
            if let Err(reason) = record.validate() {
                let err = CommandError::InvalidRecord(reason);
                warn!(device = %address, vlan_id = record.vlan_id, error = %err, "Skipping VLAN");
                report.record_failure(record.vlan_id, &err);
                continue;
            }

            match session.send(&vlan_commands(record)).await {
                Ok(output) => {
                    debug!(device = %address, vlan_id = record.vlan_id, output = %output.trim(), "VLAN sent");
                    report.succeeded.push(record.vlan_id);
                    self.audit.device_configured(address, record.vlan_id);
                }
                Err(e) => {
                    error!(device = %address, vlan_id = record.vlan_id, error = %e, "Failed to configure VLAN");
                    report.record_failure(record.vlan_id, &e);
                }
            }
        }

        Ok(report)
    }
}

fn advance(address: &str, state: &mut SessionState, next: SessionState) {
    debug!(device = %address, from = %state, to = %next, "Session state change");
    *state = next;
}
