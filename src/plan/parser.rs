//! Plan YAML parser.

use std::path::Path;

use super::types::Plan;
use crate::error::{Error, Result};

/// Parse a plan from a YAML string.
pub fn parse_plan(yaml: &str) -> Result<Plan> {
    if yaml.trim().is_empty() {
        return Err(Error::Parse("Empty plan definition".to_string()));
    }

    let plan: Plan = serde_yaml::from_str(yaml).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid YAML: {}", msg))
        }
    })?;
    Ok(plan)
}

/// Parse a plan from a file path.
pub fn parse_plan_file(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)?;
    parse_plan(&content)
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
