//! Plan validation.
//!
//! The planner collaborator returns raw text that is *expected* to contain a
//! plan, but carries no guarantee of clean structure: markdown fences,
//! leading prose and trailing commentary are all common. `parse_plan`
//! absorbs that risk — it extracts the first well-formed JSON object or
//! array from the text, decodes it against the [`Plan`] shape, and applies
//! the normalization rules (directory markers dropped, duplicate paths
//! de-duplicated keeping the first, traversal-unsafe paths rejected).
//!
//! Validation is pure: a plan that fails here fails the job; there is no
//! partial repair of plans.

use serde_json::Value;

use crate::errors::PlanError;
use crate::models::{FileTask, Plan};

/// Extract the first balanced JSON object or array embedded in `raw`.
///
/// Scans from the first `{` or `[` and tracks nesting depth, skipping
/// string literals (including escaped quotes), until the matching closer.
/// Returns `None` when no opener exists or the structure never closes.
pub(crate) fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let open = raw[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(&raw[start..start + i + c.len_utf8()]);
            }
        }
    }
    None
}

/// Parse and validate raw planner output into an accepted [`Plan`].
pub fn parse_plan(raw: &str) -> Result<Plan, PlanError> {
    let snippet = extract_json(raw).ok_or(PlanError::NoJson)?;
    let value: Value = serde_json::from_str(snippet)?;

    // A bare array is accepted as the file structure itself; an object must
    // carry `file_structure` as an array.
    let mut plan: Plan = if value.is_array() {
        Plan {
            file_structure: serde_json::from_value(value)?,
            api_contract: None,
            database_schema: None,
        }
    } else if value.get("file_structure").is_some_and(Value::is_array) {
        serde_json::from_value(value)?
    } else {
        return Err(PlanError::MissingFileStructure);
    };

    if plan.file_structure.is_empty() {
        return Err(PlanError::EmptyFileStructure);
    }

    plan.file_structure = normalize_tasks(plan.file_structure)?;
    if plan.file_structure.is_empty() {
        // Everything was a directory marker.
        return Err(PlanError::EmptyFileStructure);
    }
    Ok(plan)
}

/// Apply the edge-case policy: empty paths are rejected, directory markers
/// (trailing `/`) are dropped, duplicates keep the first occurrence, and
/// paths that could escape the repository root are rejected outright since
/// plan content is untrusted model output.
fn normalize_tasks(tasks: Vec<FileTask>) -> Result<Vec<FileTask>, PlanError> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        task.path = task.path.trim().to_string();
        if task.path.is_empty() {
            return Err(PlanError::EmptyPath);
        }
        if task.path.ends_with('/') {
            continue;
        }
        if task.path.starts_with('/') || task.path.split('/').any(|seg| seg == "..") {
            return Err(PlanError::UnsafePath(task.path));
        }
        if seen.iter().any(|p| p == &task.path) {
            continue;
        }
        seen.push(task.path.clone());
        out.push(task);
    }
    Ok(out)
}
