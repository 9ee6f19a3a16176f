use crate::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Cost error: {0}")]
    Cost(#[from] CostError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Graph-level errors abort execution creation entirely; no jobs are
/// allocated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Cycle detected through nodes: {0:?}")]
    CycleDetected(Vec<NodeId>),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid workflow: {0}")]
    Validation(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Duplicate job for node '{node_id}' in execution {execution_id}")]
    DuplicateJob {
        execution_id: crate::ExecutionId,
        node_id: NodeId,
    },

    #[error("Queue closed")]
    Closed,
}

/// Provider failures carry a retry classification: transient errors are
/// retried with bounded exponential backoff, permanent ones fail the job
/// immediately.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Permanent provider error: {0}")]
    Permanent(String),

    #[error("Timed out after {seconds}s waiting for terminal status")]
    Timeout { seconds: u64 },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("No price for node type '{node_type}' with model '{model}'")]
    UnpricedNode { node_type: String, model: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(crate::ExecutionId),

    #[error("Job not found: {0}")]
    JobNotFound(crate::JobId),

    #[error("Prediction id already registered: {0}")]
    DuplicatePrediction(String),
}
