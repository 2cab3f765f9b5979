//! Device inventory: where devices live and how to log in to them.
//!
//! ```toml
//! [defaults]
//! username = "netops"
//! password_env = "VLANSYNC_PASSWORD"
//! enable_secret_env = "VLANSYNC_ENABLE"
//!
//! [devices.core-sw1]
//! address = "10.0.0.1"
//! port = 2323
//! ```
//!
//! Every device field falls back to `[defaults]`. A device missing from the
//! inventory is reached at its own name with the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::device::{
    Credentials, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, TcpCliProvider,
};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("cannot read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid inventory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("device {device}: no {field} configured")]
    MissingField {
        device: String,
        field: &'static str,
    },

    #[error("device {device}: environment variable {var} is not set")]
    MissingEnv { device: String, var: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inventory {
    #[serde(default)]
    pub defaults: DeviceSettings,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSettings {
    pub address: Option<String>,
    pub username: Option<String>,
    /// Plaintext password; prefer `password_env`.
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub enable_secret: Option<String>,
    pub enable_secret_env: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
}

/// Everything needed to open a session to one device.
#[derive(Debug)]
pub struct DeviceTarget {
    pub name: String,
    pub address: String,
    pub credentials: Credentials,
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl DeviceTarget {
    pub fn provider(&self) -> TcpCliProvider {
        TcpCliProvider::new(self.port, self.connect_timeout, self.command_timeout)
    }
}

impl FromStr for Inventory {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl Inventory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Resolve `device` against the process environment.
    pub fn resolve(&self, device: &str) -> Result<DeviceTarget, InventoryError> {
        self.resolve_with(device, |var| std::env::var(var).ok())
    }

    /// Resolve `device`, looking up `*_env` variables through `env`.
    pub fn resolve_with(
        &self,
        device: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<DeviceTarget, InventoryError> {
        let empty = DeviceSettings::default();
        let own = self.devices.get(device).unwrap_or(&empty);
        let defaults = &self.defaults;

        let username = own
            .username
            .as_ref()
            .or(defaults.username.as_ref())
            .cloned()
            .ok_or_else(|| InventoryError::MissingField {
                device: device.to_string(),
                field: "username",
            })?;

        let password = resolve_secret(
            device,
            own.password_env.as_ref().or(defaults.password_env.as_ref()),
            own.password.as_ref().or(defaults.password.as_ref()),
            &env,
        )?
        .ok_or_else(|| InventoryError::MissingField {
            device: device.to_string(),
            field: "password",
        })?;

        let enable_secret = resolve_secret(
            device,
            own.enable_secret_env
                .as_ref()
                .or(defaults.enable_secret_env.as_ref()),
            own.enable_secret.as_ref().or(defaults.enable_secret.as_ref()),
            &env,
        )?;

        let secs = |device_value: Option<u64>, default: Option<u64>, fallback: Duration| {
            device_value
                .or(default)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Ok(DeviceTarget {
            name: device.to_string(),
            address: own.address.clone().unwrap_or_else(|| device.to_string()),
            credentials: Credentials {
                username,
                password,
                enable_secret,
            },
            port: own.port.or(defaults.port).unwrap_or(DEFAULT_PORT),
            connect_timeout: secs(
                own.connect_timeout_secs,
                defaults.connect_timeout_secs,
                DEFAULT_CONNECT_TIMEOUT,
            ),
            command_timeout: secs(
                own.command_timeout_secs,
                defaults.command_timeout_secs,
                DEFAULT_COMMAND_TIMEOUT,
            ),
        })
    }
}

/// Env var first, then plaintext. An env var that is named but unset is an
/// error only when there is no plaintext to fall back on.
fn resolve_secret(
    device: &str,
    env_name: Option<&String>,
    plaintext: Option<&String>,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<SecretString>, InventoryError> {
    if let Some(var) = env_name {
        if let Some(value) = env(var) {
            return Ok(Some(SecretString::from(value)));
        }
        if plaintext.is_none() {
            return Err(InventoryError::MissingEnv {
                device: device.to_string(),
                var: var.clone(),
            });
        }
    }
    Ok(plaintext.map(|s| SecretString::from(s.clone())))
}
