//! Plans, steps and the step status machine

use crate::error::{ForgeError, ForgeResult};
use crate::llm::normalize::parse_json_payload;
use crate::util::normalize_repo_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Target path of the single step produced when the model's plan is unusable.
pub const FALLBACK_PLAN_PATH: &str = "docs/README.md";
pub const FALLBACK_PLAN_TITLE: &str = "Manual Review Required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepOperation {
    Create,
    Update,
    Delete,
}

impl StepOperation {
    /// Lenient parse of the operation string a model emits.
    /// Unknown values are treated as updates.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "CREATE" | "ADD" | "NEW" => StepOperation::Create,
            "DELETE" | "REMOVE" => StepOperation::Delete,
            _ => StepOperation::Update,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOperation::Create => "Create",
            StepOperation::Update => "Update",
            StepOperation::Delete => "Delete",
        }
    }
}

impl fmt::Display for StepOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepOperation::Create => "CREATE",
            StepOperation::Update => "UPDATE",
            StepOperation::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// PENDING -> IN_PROGRESS -> COMPLETED | FAILED, and FAILED -> IN_PROGRESS.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::InProgress)
                | (StepStatus::Failed, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Completed)
                | (StepStatus::InProgress, StepStatus::Failed)
        )
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::Failed)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            StepStatus::Pending => "○",
            StepStatus::InProgress => "◐",
            StepStatus::Completed => "●",
            StepStatus::Failed => "✕",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub operation: StepOperation,
    pub status: StepStatus,
}

impl Step {
    /// Apply a status change, enforcing the step status machine.
    pub fn transition(&mut self, next: StepStatus) -> ForgeResult<()> {
        if self.status == StepStatus::InProgress && next == StepStatus::InProgress {
            return Err(ForgeError::StepBusy(self.id.clone()));
        }
        if !self.status.can_transition_to(next) {
            return Err(ForgeError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Single manual-review step used when the model's plan can't be parsed.
    pub fn fallback(prompt: &str) -> Self {
        Self {
            title: FALLBACK_PLAN_TITLE.to_string(),
            steps: vec![Step {
                id: "1".to_string(),
                title: "Review request".to_string(),
                description: prompt.trim().to_string(),
                file_path: FALLBACK_PLAN_PATH.to_string(),
                operation: StepOperation::Update,
                status: StepStatus::Pending,
            }],
        }
    }

    /// (completed, total)
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }
}

// ============================================================================
// Parsing model output
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    title: Option<String>,
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "filePath", alias = "path", alias = "file")]
    file_path: Option<String>,
    #[serde(default)]
    operation: Option<String>,
}

fn raw_id(value: Option<&serde_json::Value>) -> Option<String> {
    let id = match value? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn unique_id(candidate: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(candidate.clone()) {
        return candidate;
    }
    let mut n = 2;
    loop {
        let next = format!("{}-{}", candidate, n);
        if seen.insert(next.clone()) {
            return next;
        }
        n += 1;
    }
}

/// Parse the planner's response into a [`Plan`].
///
/// Every step starts PENDING whatever the model says. Steps without a usable
/// file path are dropped; a plan with no usable step is a parse error.
pub fn parse_plan(raw: &str) -> ForgeResult<Plan> {
    let parsed: RawPlan = parse_json_payload(raw).map_err(ForgeError::PlanParse)?;

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(parsed.steps.len());
    for (index, raw_step) in parsed.steps.into_iter().enumerate() {
        let Some(path) = raw_step.file_path.as_deref() else {
            tracing::warn!(index, "plan step without a file path skipped");
            continue;
        };
        let file_path = match normalize_repo_path(path) {
            Ok(p) if !p.is_empty() => p,
            Ok(_) => {
                tracing::warn!(index, "plan step with an empty file path skipped");
                continue;
            }
            Err(err) => {
                tracing::warn!(index, "plan step skipped: {}", err);
                continue;
            }
        };

        let id = raw_id(raw_step.id.as_ref()).unwrap_or_else(|| (index + 1).to_string());
        let id = unique_id(id, &mut seen);
        let description = raw_step.description.unwrap_or_default().trim().to_string();
        let title = raw_step
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Step {}", index + 1));
        let operation = raw_step
            .operation
            .as_deref()
            .map(StepOperation::from_label)
            .unwrap_or(StepOperation::Update);

        steps.push(Step {
            id,
            title,
            description,
            file_path,
            operation,
            status: StepStatus::Pending,
        });
    }

    if steps.is_empty() {
        return Err(ForgeError::PlanParse("plan contained no usable steps".into()));
    }

    let title = parsed
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Implementation Plan".to_string());

    Ok(Plan { title, steps })
}
