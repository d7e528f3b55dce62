//! Sandbox records and their line format.
//!
//! One sandbox per line:
//!
//! ```text
//! owner|name|credential|ramLimitGiB|cpuLimit|creator|osLabel|expiry
//! ```
//!
//! The store does no escaping, so [`DELIMITER`] and line breaks are rejected
//! by [`validate_field`] before a value can reach it.

use crate::error::{CoreError, Result};
use serde::Serialize;

/// Field separator.
pub const DELIMITER: char = '|';

/// Number of fields in a complete record.
pub const FIELD_COUNT: usize = 8;

/// Literal stored in the expiry column when there is none.
pub const NO_EXPIRY: &str = "None";

/// One provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxRecord {
    /// User the sandbox belongs to.
    pub owner: String,
    /// Unique sandbox name (also the container name).
    pub name: String,
    /// Last extracted session credential; may be stale.
    pub credential: String,
    /// RAM limit recorded at creation.
    pub ram_limit_gib: Option<u32>,
    /// CPU limit recorded at creation.
    pub cpu_limit: Option<u32>,
    /// Who requested the sandbox.
    pub creator: String,
    /// Display label of the OS.
    pub os_label: String,
    /// Absolute expiry timestamp, advisory only.
    pub expiry: Option<String>,
    /// Parsed from a line with missing or extra fields.
    pub degraded: bool,
}

impl SandboxRecord {
    /// Parse one stored line. Never fails: lines without exactly
    /// [`FIELD_COUNT`] fields yield a degraded record.
    pub fn parse(line: &str) -> Self {
        let fields: Vec<&str> = line.trim().split(DELIMITER).collect();
        let get = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();
        let number = |i: usize| fields.get(i).and_then(|v| v.trim().parse::<u32>().ok());

        let expiry = fields
            .get(7)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty() && *v != NO_EXPIRY)
            .map(String::from);

        Self {
            owner: get(0),
            name: get(1),
            credential: get(2),
            ram_limit_gib: number(3),
            cpu_limit: number(4),
            creator: get(5),
            os_label: get(6),
            expiry,
            degraded: fields.len() != FIELD_COUNT,
        }
    }

    /// Serialize to the stored line format (without trailing newline).
    pub fn to_line(&self) -> String {
        let number = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        let ram = number(self.ram_limit_gib);
        let cpu = number(self.cpu_limit);
        [
            self.owner.as_str(),
            self.name.as_str(),
            self.credential.as_str(),
            ram.as_str(),
            cpu.as_str(),
            self.creator.as_str(),
            self.os_label.as_str(),
            self.expiry.as_deref().unwrap_or(NO_EXPIRY),
        ]
        .join(&DELIMITER.to_string())
    }

    /// Check every text field can be stored losslessly.
    pub fn validate(&self) -> Result<()> {
        validate_field("owner", &self.owner)?;
        validate_field("name", &self.name)?;
        validate_field("credential", &self.credential)?;
        validate_field("creator", &self.creator)?;
        validate_field("os_label", &self.os_label)?;
        if let Some(expiry) = &self.expiry {
            validate_field("expiry", expiry)?;
        }
        Ok(())
    }

    /// True if the stored line did not have exactly [`FIELD_COUNT`] fields.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Copy of this record with a new credential.
    pub fn with_credential(&self, credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            ..self.clone()
        }
    }
}

/// Reject values the line format cannot represent.
pub fn validate_field(field: &'static str, value: &str) -> Result<()> {
    if value.contains(DELIMITER) {
        return Err(CoreError::InvalidField {
            field,
            reason: format!("must not contain {DELIMITER:?}"),
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(CoreError::InvalidField {
            field,
            reason: "must not contain line breaks".into(),
        });
    }
    Ok(())
}
