//! Plan and stage validation.
//!
//! Plan-level validation runs once, eagerly, over the whole tree before any
//! execution. Stage-level validation runs lazily, per node, when the
//! executor reaches that node — a malformed stage deep in the tree is only
//! discovered once its ancestors have begun executing.

use std::collections::HashSet;

use super::types::{Payload, Plan, Stage};
use crate::error::{Error, Result};

/// Validate a whole plan eagerly.
///
/// Checks:
/// - plan name present and well-formed
/// - at least one top-level stage
/// - stage names unique across the *entire* tree
pub fn validate_plan(plan: &Plan) -> Result<()> {
    if plan.name.is_empty() {
        return Err(Error::Structural("Plan name is required".into()));
    }

    if !plan
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Structural(
            "Plan name must contain only alphanumeric characters, hyphens, and underscores".into(),
        ));
    }

    if plan.stages.is_empty() {
        return Err(Error::Structural(
            "Plan must have at least one stage".into(),
        ));
    }

    let mut names = HashSet::new();
    for stage in &plan.stages {
        check_unique_names(stage, &mut names)?;
    }

    Ok(())
}

fn check_unique_names<'a>(stage: &'a Stage, names: &mut HashSet<&'a str>) -> Result<()> {
    if stage.name.is_empty() {
        return Err(Error::Structural("Stage name cannot be empty".into()));
    }
    if !names.insert(stage.name.as_str()) {
        return Err(Error::Structural(format!(
            "Duplicate stage name: {}",
            stage.name
        )));
    }
    for child in &stage.children {
        check_unique_names(child, names)?;
    }
    Ok(())
}

/// Validate one stage in isolation.
///
/// A stage must be exactly one of: a leaf carrying a payload, or a container
/// with at least one child.
pub fn validate_stage(stage: &Stage) -> Result<()> {
    match (&stage.payload, stage.children.is_empty()) {
        (Some(payload), true) => validate_payload(&stage.name, payload),
        (None, false) => Ok(()),
        (Some(_), false) => Err(Error::Structural(format!(
            "Stage '{}' has both a payload and children",
            stage.name
        ))),
        (None, true) => Err(Error::Structural(format!(
            "Stage '{}' has neither a payload nor children",
            stage.name
        ))),
    }
}

fn validate_payload(stage: &str, payload: &Payload) -> Result<()> {
    let problem = match payload {
        Payload::Http(http) if http.url.is_empty() => Some("http payload has an empty url"),
        Payload::Kv(kv) if kv.url.is_empty() => Some("kv payload has an empty url"),
        Payload::Kv(kv) if kv.ops.is_empty() => Some("kv payload has no operations"),
        Payload::Sql(sql) if sql.database.is_empty() => Some("sql payload has an empty database"),
        Payload::Sql(sql) if sql.statements.is_empty() => Some("sql payload has no statements"),
        Payload::Broker(broker) if broker.url.is_empty() => Some("broker payload has an empty url"),
        Payload::Broker(broker) if broker.topic.is_empty() => {
            Some("broker payload has an empty topic")
        }
        Payload::Net(net) if net.addr.is_empty() => Some("net payload has an empty addr"),
        _ => None,
    };

    match problem {
        Some(problem) => Err(Error::Structural(format!("Stage '{}': {}", stage, problem))),
        None => Ok(()),
    }
}
