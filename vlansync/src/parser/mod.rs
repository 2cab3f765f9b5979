//! Record parser: raw device output -> VLAN records.

pub mod template;

use thiserror::Error;
use tracing::debug;

pub use template::{Row, Template};

use crate::record::VlanRecord;

/// Built-in template for `show vlan`-style tables (VLAN, Name, Description).
pub const SHOW_VLAN_TEMPLATE: &str = include_str!("../../templates/show_vlan.textfsm");

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid vlan id: {raw_value:?}")]
    InvalidVlanId { raw_value: String },

    #[error("template mismatch at line {line} ({message}): {text:?}")]
    TemplateMismatch {
        line: usize,
        text: String,
        message: String,
    },

    #[error("invalid template at line {line}: {reason}")]
    Template { line: usize, reason: String },
}

/// Extracts VLAN records using a template that declares the
/// `VLAN_ID`, `NAME` and `DESCRIPTION` values.
#[derive(Debug)]
pub struct VlanParser {
    template: Template,
    id_slot: usize,
    name_slot: usize,
    description_slot: usize,
}

impl VlanParser {
    pub fn new(template: Template) -> Result<Self, ParseError> {
        let slot = |name: &str| {
            template.value_index(name).ok_or_else(|| ParseError::Template {
                line: 0,
                reason: format!("template does not declare Value {}", name),
            })
        };
        let id_slot = slot("VLAN_ID")?;
        let name_slot = slot("NAME")?;
        let description_slot = slot("DESCRIPTION")?;

        Ok(Self {
            template,
            id_slot,
            name_slot,
            description_slot,
        })
    }

    pub fn from_template_text(text: &str) -> Result<Self, ParseError> {
        Self::new(Template::compile(text)?)
    }

    /// Parser using the built-in `show vlan` template.
    pub fn show_vlan() -> Result<Self, ParseError> {
        Self::from_template_text(SHOW_VLAN_TEMPLATE)
    }

    /// Parse raw text. No matching lines yields an empty list.
    pub fn parse(&self, raw_text: &str) -> Result<Vec<VlanRecord>, ParseError> {
        let rows = self.template.parse_text(raw_text)?;
        let records = rows
            .iter()
            .map(|row| {
                Ok(VlanRecord {
                    vlan_id: parse_vlan_id(&row[self.id_slot])?,
                    name: row[self.name_slot].clone(),
                    description: row[self.description_slot].clone(),
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        debug!(records = records.len(), "Parsed VLAN records");
        Ok(records)
    }
}

/// Convert pre-tabulated `[id, name, description]` rows.
pub fn records_from_rows(rows: &[Vec<String>]) -> Result<Vec<VlanRecord>, ParseError> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| match row.as_slice() {
            [id, name, description] => Ok(VlanRecord {
                vlan_id: parse_vlan_id(id)?,
                name: name.clone(),
                description: description.clone(),
            }),
            _ => Err(ParseError::TemplateMismatch {
                line: idx + 1,
                text: row.join(" | "),
                message: format!("expected 3 fields, got {}", row.len()),
            }),
        })
        .collect()
}

fn parse_vlan_id(raw: &str) -> Result<u32, ParseError> {
    match raw.trim().parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ParseError::InvalidVlanId {
            raw_value: raw.to_string(),
        }),
    }
}
