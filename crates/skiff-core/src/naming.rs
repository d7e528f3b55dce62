//! Sandbox names.

use crate::error::{CoreError, Result};
use crate::record::validate_field;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Prefix of every generated name; also marks containers this service owns.
pub const MANAGED_PREFIX: &str = "VPS_";

const SUFFIX_LEN: usize = 8;

/// Generate `VPS_<label>_<8 alphanumerics>`, spaces in `label` becoming `_`.
pub fn generate(label: &str) -> String {
    let label = sanitize(label);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{MANAGED_PREFIX}{label}_{suffix}")
}

/// Check a caller-chosen name is usable as both a record key and a
/// container name.
pub fn validate(name: &str) -> Result<()> {
    validate_field("name", name)?;
    let mut chars = name.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest {
        return Err(CoreError::InvalidField {
            field: "name",
            reason: "must be alphanumeric and may contain '_', '.' or '-'".into(),
        });
    }
    Ok(())
}

/// Whether `name` belongs to the managed namespace. An empty prefix claims
/// every name.
pub fn is_managed(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

// Docker names allow [a-zA-Z0-9_.-]; anything else becomes '_'.
fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}
