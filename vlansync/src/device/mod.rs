//! Device side: session abstraction, command encoding and projection.
//!
//! A [`SessionProvider`] opens an authenticated [`DeviceSession`] to one
//! device. The [`Projector`] owns that session for a single call and pushes
//! one command batch per VLAN through it.

mod projector;
mod tcp;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use projector::{DeviceFailure, ProjectionReport, Projector, SessionState};
pub use tcp::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, TcpCliProvider, TcpCliSession,
};

use crate::record::VlanRecord;

/// Login material for one device, resolved by the caller.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// Secret for privileged (enable) mode, if the device asks for one.
    pub enable_secret: Option<SecretString>,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("cannot reach {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("authentication to {address} failed")]
    Authentication { address: String },
}

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("privileged mode refused by {address}")]
    Refused { address: String },

    #[error("privileged mode on {address} failed: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("device rejected {command:?}: {output}")]
    Rejected { command: String, output: String },

    #[error("record not sent: {0}")]
    InvalidRecord(String),

    #[error("session I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Fatal errors of a projection call; no records were reported.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: DeviceSession;

    /// Connect and authenticate. Anything half-opened is released on failure.
    async fn open(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Self::Session, ConnectError>;
}

#[async_trait]
pub trait DeviceSession: Send {
    /// Enter privileged mode.
    async fn elevate(&mut self) -> Result<(), PrivilegeError>;

    /// Apply one batch of configuration lines, returning the device output.
    async fn send(&mut self, lines: &[String]) -> Result<String, CommandError>;

    /// Release the session. Idempotent and never fails.
    async fn close(&mut self);
}

/// Configuration lines for one VLAN. An empty description clears the
/// device's one.
pub fn vlan_commands(record: &VlanRecord) -> Vec<String> {
    let description = if record.description.is_empty() {
        "no description".to_string()
    } else {
        format!("description {}", record.description)
    };
    vec![
        format!("vlan {}", record.vlan_id),
        format!("name {}", record.name),
        description,
    ]
}
