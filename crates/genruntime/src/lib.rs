//! Workflow execution runtime
//!
//! This crate provides the engine that runs generation workflows: graph
//! resolution and ordering, the execution/job state machine, the dispatch
//! queue, provider-status reconciliation, and cost accounting.

pub mod coordinator;
pub mod cost;
pub mod graph;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod store;
mod runtime;

pub use coordinator::{ExecutionCoordinator, FailurePolicy, JobSignal};
pub use cost::{CostAccumulator, PriceRule, PricingParams, PricingTable};
pub use graph::{
    build_dependency_map, compatible_handles, detect_cycles, is_valid_connection,
    topological_sort, validate, ResolvedGraph,
};
pub use poller::{PollerConfig, ProviderPoller};
pub use queue::{DispatchRequest, DurableQueue, JobQueue, MemoryQueue, QueueConfig};
pub use registry::StrategyRegistry;
pub use runtime::{Engine, EngineConfig};
pub use store::{ExecutionStore, JobStore, MemoryStore, Store};
