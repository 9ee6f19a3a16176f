use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type JobId = Uuid;

/// Lifecycle of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One run of a workflow. Owned exclusively by the execution coordinator;
/// terminal once Completed/Failed/Cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: crate::WorkflowId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cost_summary: CostSummary,
}

impl Execution {
    pub fn new(workflow_id: crate::WorkflowId) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            cost_summary: CostSummary::default(),
        }
    }
}

/// Lifecycle of a single node's work within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// One job per node per execution.
///
/// `prediction_id` is unique once assigned. The record is mutated only
/// through the coordinator and frozen once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub prediction_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cost: f64,
    pub cost_breakdown: Option<CostBreakdown>,
    pub attempt: u32,
}

impl Job {
    pub fn new(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id,
            prediction_id: None,
            status: JobStatus::Pending,
            progress: 0.0,
            output: None,
            error: None,
            cost: 0.0,
            cost_breakdown: None,
            attempt: 0,
        }
    }
}

/// Priced detail for a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub model: String,
    pub base: f64,
    pub duration_seconds: Option<f64>,
    pub resolution: Option<String>,
    pub audio_surcharge: f64,
    pub total: f64,
}

/// Running per-execution cost ledger, folded incrementally as jobs reach a
/// terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total: f64,
    pub per_node: HashMap<NodeId, f64>,
}

impl CostSummary {
    /// Incremental add; never a full rescan.
    pub fn add(&mut self, node_id: &str, cost: f64) {
        self.total += cost;
        *self.per_node.entry(node_id.to_string()).or_insert(0.0) += cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn cost_summary_folds_incrementally() {
        let mut summary = CostSummary::default();
        summary.add("b", 0.25);
        summary.add("c", 0.50);
        summary.add("b", 0.25);

        assert!((summary.total - 1.0).abs() < f64::EPSILON);
        assert!((summary.per_node["b"] - 0.5).abs() < f64::EPSILON);
    }
}
