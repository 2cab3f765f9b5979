//! VLAN record type shared by the parser, store and projector.

use serde::{Deserialize, Serialize};

/// One VLAN as observed on a device or persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanRecord {
    pub vlan_id: u32,
    pub name: String,
    pub description: String,
}

impl VlanRecord {
    pub fn new(vlan_id: u32, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            vlan_id,
            name: name.into(),
            description: description.into(),
        }
    }

    /// Check the fields before they are persisted or turned into device commands.
    ///
    /// Name and description end up verbatim on a device command line, so
    /// control characters (newlines in particular) are rejected outright.
    pub fn validate(&self) -> Result<(), String> {
        if self.vlan_id == 0 {
            return Err("vlan id must be positive".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        for (field, value) in [("name", &self.name), ("description", &self.description)] {
            if value.chars().any(char::is_control) {
                return Err(format!("{} contains control characters", field));
            }
        }
        Ok(())
    }
}
