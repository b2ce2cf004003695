//! Plan document loading, migration, validation, and persistence.
//!
//! Plans are JSON documents written by the planner. Documents without a
//! `schemaVersion` field use the version 1 layout and are migrated in memory
//! by defaulting the fields version 2 added. Nothing invalid is ever written
//! back to disk.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::types::{Plan, PLAN_SCHEMA_VERSION};

/// Default attempt budget for steps migrated from version 1.
const LEGACY_MAX_ATTEMPTS: u32 = 3;

/// Error type for plan loading and saving.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("plan is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid plan: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("unsupported plan schema version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },
}

pub type Result<T> = std::result::Result<T, PlanError>;

/// Reads and writes a single plan file.
#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
}

impl PlanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, migrate, and validate the plan.
    pub fn load(&self) -> Result<Plan> {
        let content = fs::read_to_string(&self.path)?;
        parse_plan(&content)
    }

    /// Validate and atomically write the plan.
    pub fn save(&self, plan: &Plan) -> Result<()> {
        validate_plan(plan)?;
        let mut buf = serde_json::to_string_pretty(plan)
            .map_err(|e| PlanError::Parse(e.to_string()))?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// Parse plan content, migrating legacy documents.
pub fn parse_plan(content: &str) -> Result<Plan> {
    let value: Value = serde_json::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?;
    let value = migrate(value)?;
    let plan: Plan =
        serde_json::from_value(value).map_err(|e| PlanError::Validation(vec![e.to_string()]))?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Bring a raw document up to the current schema version.
pub fn migrate(mut value: Value) -> Result<Value> {
    let Some(obj) = value.as_object_mut() else {
        return Err(PlanError::Validation(vec![
            "plan must be a JSON object".to_string()
        ]));
    };

    let version = match obj.get("schemaVersion") {
        None => 1,
        Some(v) => v.as_u64().ok_or_else(|| {
            PlanError::Validation(vec!["schemaVersion must be a positive integer".to_string()])
        })?,
    };

    if version == 0 {
        return Err(PlanError::Validation(vec![
            "schemaVersion must be a positive integer".to_string(),
        ]));
    }
    if version > u64::from(PLAN_SCHEMA_VERSION) {
        return Err(PlanError::UnsupportedVersion {
            found: version,
            supported: PLAN_SCHEMA_VERSION,
        });
    }

    if version == 1 {
        migrate_v1(obj);
    }
    obj.insert("schemaVersion".to_string(), json!(PLAN_SCHEMA_VERSION));
    Ok(value)
}

/// Version 1 had no per-step ownership, risk, post-check, or file fields,
/// and metadata was optional.
fn migrate_v1(obj: &mut Map<String, Value>) {
    let metadata = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = metadata.as_object_mut() {
        meta.entry("provider").or_insert_with(|| json!("claude"));
        meta.entry("model").or_insert_with(|| json!(""));
        meta.entry("totalIterations").or_insert_with(|| json!(0));
        meta.entry("completedIterations").or_insert_with(|| json!(0));
    }

    if let Some(Value::Array(steps)) = obj.get_mut("steps") {
        for step in steps.iter_mut() {
            let Some(step) = step.as_object_mut() else {
                continue;
            };
            step.entry("status").or_insert_with(|| json!("pending"));
            step.entry("attempts").or_insert_with(|| json!(0));
            step.entry("maxAttempts")
                .or_insert_with(|| json!(LEGACY_MAX_ATTEMPTS));
            step.entry("description").or_insert_with(|| json!(""));
            step.entry("files").or_insert_with(|| json!([]));
            step.entry("riskLevel").or_insert_with(|| json!("medium"));
            step.entry("owner").or_insert_with(|| json!("agent"));
            step.entry("postChecks").or_insert_with(|| json!([]));
            step.entry("rollbackHint").or_insert_with(|| json!(""));
        }
    }
}

/// Check the structural invariants serde cannot express.
///
/// Collects every problem instead of stopping at the first.
pub fn validate_plan(plan: &Plan) -> Result<()> {
    let mut problems = Vec::new();

    if plan.schema_version != PLAN_SCHEMA_VERSION {
        problems.push(format!(
            "schemaVersion is {} but only {} can be written",
            plan.schema_version, PLAN_SCHEMA_VERSION
        ));
    }
    if plan.steps.is_empty() {
        problems.push("plan has no steps".to_string());
    }

    let mut seen = HashSet::new();
    for (idx, step) in plan.steps.iter().enumerate() {
        let label = if step.id.is_empty() {
            format!("step #{}", idx + 1)
        } else {
            format!("step '{}'", step.id)
        };

        if step.id.trim().is_empty() {
            problems.push(format!("{label}: id is empty"));
        } else if !seen.insert(step.id.as_str()) {
            problems.push(format!("{label}: duplicate id"));
        }
        if step.title.trim().is_empty() {
            problems.push(format!("{label}: title is empty"));
        }
        if step.success_criteria.trim().is_empty() {
            problems.push(format!("{label}: successCriteria is empty"));
        }
        if step.max_attempts == 0 {
            problems.push(format!("{label}: maxAttempts must be at least 1"));
        }
        if step.attempts > step.max_attempts {
            problems.push(format!(
                "{label}: attempts ({}) exceeds maxAttempts ({})",
                step.attempts, step.max_attempts
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(PlanError::Validation(problems))
    }
}

/// Write via a sibling temp file and rename so a crash never leaves a torn plan.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
