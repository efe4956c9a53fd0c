//! Shared deterministic types for the loop core.
//!
//! These types define stable contracts between the document store, the
//! partitioner and the controller. They carry no I/O and serialize to the
//! exact spellings used in task documents and state snapshots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Authored completion status of a task document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Draft,
    Complete,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Draft => "DRAFT",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Blocked => "BLOCKED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(TaskStatus::Draft),
            "COMPLETE" => Ok(TaskStatus::Complete),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            other => Err(format!(
                "unknown status '{other}' (expected DRAFT, COMPLETE or BLOCKED)"
            )),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller-owned loop state stored in the document frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Failed,
    Completed,
}

impl LoopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopStatus::Idle => "idle",
            LoopStatus::Running => "running",
            LoopStatus::Paused => "paused",
            LoopStatus::Stopped => "stopped",
            LoopStatus::Failed => "failed",
            LoopStatus::Completed => "completed",
        }
    }
}

impl FromStr for LoopStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(LoopStatus::Idle),
            "running" => Ok(LoopStatus::Running),
            "paused" => Ok(LoopStatus::Paused),
            "stopped" => Ok(LoopStatus::Stopped),
            "failed" => Ok(LoopStatus::Failed),
            "completed" => Ok(LoopStatus::Completed),
            other => Err(format!("unknown loop status '{other}'")),
        }
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CriterionKind {
    Criterion,
    AntiCriterion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionStatus {
    Passing,
    Failing,
}

/// One checklist line parsed from the document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    /// Verification method from a trailing `| Verify: ...` suffix, if any.
    pub verify: Option<String>,
    pub kind: CriterionKind,
    pub status: CriterionStatus,
}

impl Criterion {
    pub fn is_passing(&self) -> bool {
        self.status == CriterionStatus::Passing
    }
}

/// Passing/total counts plus failing ids, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaSummary {
    pub total: usize,
    pub passing: usize,
    pub failing_ids: Vec<String>,
}

impl CriteriaSummary {
    pub fn from_criteria(criteria: &[Criterion]) -> Self {
        let failing_ids: Vec<String> = criteria
            .iter()
            .filter(|c| !c.is_passing())
            .map(|c| c.id.clone())
            .collect();
        Self {
            total: criteria.len(),
            passing: criteria.len() - failing_ids.len(),
            failing_ids,
        }
    }

    pub fn failing(&self) -> usize {
        self.failing_ids.len()
    }

    /// `passing/total`, the form stored in `verification_summary`.
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.passing, self.total)
    }
}

/// Terminal result of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Blocked,
    /// Iteration budget exhausted.
    Failed,
    /// Paused externally; resumable.
    Paused,
    Stopped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Blocked => "blocked",
            Outcome::Failed => "failed",
            Outcome::Paused => "paused",
            Outcome::Stopped => "stopped",
        }
    }

    /// Label used in session display names.
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Completed => "COMPLETE",
            Outcome::Blocked => "BLOCKED",
            Outcome::Failed => "FAILED",
            Outcome::Paused => "PAUSED",
            Outcome::Stopped => "STOPPED",
        }
    }

    /// `loop_status` the controller writes when finalizing with this outcome.
    ///
    /// `None` means the externally-set value is left untouched.
    pub fn final_loop_status(self) -> Option<LoopStatus> {
        match self {
            Outcome::Completed | Outcome::Blocked => Some(LoopStatus::Completed),
            Outcome::Failed => Some(LoopStatus::Failed),
            Outcome::Paused | Outcome::Stopped => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed round, appended to the run history and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u32,
    /// Epoch milliseconds.
    pub started_at: i64,
    /// Epoch milliseconds.
    pub completed_at: i64,
    pub criteria_passing: usize,
    pub criteria_total: usize,
}
