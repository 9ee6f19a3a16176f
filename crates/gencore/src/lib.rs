//! Core abstractions for the generation workflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: workflow definitions, execution and job records,
//! the provider and node-strategy seams, the error taxonomy, and the
//! execution event bus. It has no runtime machinery of its own.

mod error;
pub mod events;
mod execution;
mod provider;
mod strategy;
mod workflow;

pub use error::{
    CostError, EngineError, GraphError, ProviderError, QueueError, StoreError,
};
pub use events::{EventBus, ExecutionEvent};
pub use execution::{
    CostBreakdown, CostSummary, Execution, ExecutionId, ExecutionStatus, Job, JobId, JobStatus,
};
pub use provider::{
    GenerationProvider, PredictionId, PredictionMetrics, PredictionRequest, PredictionState,
    PredictionUpdate,
};
pub use strategy::{DispatchPlan, NodeStrategy, PortDef, PortKind, StrategyPorts};
pub use workflow::{NodeId, WorkflowDefinition, WorkflowEdge, WorkflowId, WorkflowNode};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
