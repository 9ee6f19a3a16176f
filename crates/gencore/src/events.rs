use crate::{ExecutionId, ExecutionStatus, JobId, JobStatus, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the coordinator on every execution/job transition.
///
/// Consumed by external notification channels (websocket fan-out, audit
/// log); the engine itself never reads them back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        total_cost: f64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    JobUpdated {
        execution_id: ExecutionId,
        job_id: JobId,
        node_id: NodeId,
        status: JobStatus,
        progress: f64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    CostUpdated {
        execution_id: ExecutionId,
        total: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// With no subscribers the event is dropped.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}
