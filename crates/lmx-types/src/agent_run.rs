//! Agent run records, as owned by the durable run scheduler (C12).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority class for an agent run. Affects only pre-admission ordering in
/// the run queue — once a run is admitted, there is no preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    /// Lowest precedence; ordered first by the derived `Ord` because the
    /// run queue pops the *highest* priority first — see
    /// `lmx_core::run_scheduler` for the reversal.
    Batch,
    Normal,
    Interactive,
}

impl Priority {
    /// Parse a priority tag, defaulting unknown values to `Normal` per
    /// the specification.
    pub fn parse_or_normal(tag: &str) -> Self {
        match tag {
            "interactive" => Priority::Interactive,
            "batch" => Priority::Batch,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// A run never regresses from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// A single submitted multi-agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub request: serde_json::Value,
    pub status: RunStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Idempotency key this run was submitted with, if any.
    pub idempotency_key: Option<String>,
}

impl AgentRun {
    pub fn new(request: serde_json::Value, priority: Priority, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            status: RunStatus::Queued,
            priority,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            idempotency_key,
        }
    }

    /// Transition to a new status, refusing to regress out of a terminal
    /// state.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_interactive_highest() {
        let mut v = vec![Priority::Batch, Priority::Interactive, Priority::Normal];
        v.sort();
        assert_eq!(v, vec![Priority::Batch, Priority::Normal, Priority::Interactive]);
    }

    #[test]
    fn unknown_priority_tag_defaults_to_normal() {
        assert_eq!(Priority::parse_or_normal("urgent"), Priority::Normal);
    }

    #[test]
    fn terminal_run_never_regresses() {
        let mut run = AgentRun::new(serde_json::json!({}), Priority::Normal, None);
        assert!(run.transition(RunStatus::Running));
        assert!(run.transition(RunStatus::Completed));
        assert!(!run.transition(RunStatus::Failed));
        assert_eq!(run.status, RunStatus::Completed);
    }
}
