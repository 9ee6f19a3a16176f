//! Engine assembly: explicit constructor wiring of the coordinator, job
//! queue, poller, cost accumulator, and stores, done once at process
//! start. No ambient registry; every component receives its collaborators
//! as parameters.

use crate::coordinator::{self, ExecutionCoordinator, FailurePolicy};
use crate::cost::{CostAccumulator, PricingTable};
use crate::poller::{PollerConfig, ProviderPoller};
use crate::queue::{self, JobQueue, MemoryQueue, QueueConfig};
use crate::registry::StrategyRegistry;
use crate::store::Store;
use gencore::{
    EngineError, EventBus, Execution, ExecutionEvent, ExecutionId, GenerationProvider, Job,
    PredictionUpdate, StoreError, WorkflowDefinition,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum jobs in Processing at once, across the whole engine.
    pub concurrency: usize,
    pub queue: QueueConfig,
    pub poller: PollerConfig,
    pub failure_policy: FailurePolicy,
    pub event_capacity: usize,
    /// Queued backlog size for the in-memory durable queue.
    pub queue_capacity: usize,
    pub signal_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue: QueueConfig::default(),
            poller: PollerConfig::default(),
            failure_policy: FailurePolicy::FailFast,
            event_capacity: 1024,
            queue_capacity: 256,
            signal_capacity: 256,
        }
    }
}

/// The assembled workflow execution engine.
pub struct Engine {
    coordinator: ExecutionCoordinator,
    poller: Arc<ProviderPoller>,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Engine {
    /// Wire up an engine with the default pricing catalog and an in-memory
    /// durable queue.
    pub fn new(
        registry: Arc<StrategyRegistry>,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Self {
        Self::with_pricing(registry, provider, store, PricingTable::standard(), config)
    }

    pub fn with_pricing(
        registry: Arc<StrategyRegistry>,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn Store>,
        pricing: PricingTable,
        config: EngineConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let events = Arc::new(EventBus::new(config.event_capacity));
        let (signals_tx, signals_rx) = mpsc::channel(config.signal_capacity);

        let poller = Arc::new(ProviderPoller::new(
            provider.clone(),
            signals_tx.clone(),
            config.poller.clone(),
        ));
        tokio::spawn(poller.clone().run(cancel.clone()));

        let durable = Arc::new(MemoryQueue::new(config.queue_capacity));
        let queue = Arc::new(JobQueue::new(durable.clone()));
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        tokio::spawn(queue::run_dispatch_loop(
            durable,
            queue.clone(),
            provider,
            poller.clone(),
            signals_tx,
            semaphore,
            config.queue.clone(),
            cancel.clone(),
        ));

        let (coordinator, _task) = coordinator::spawn_coordinator(
            store.clone(),
            registry,
            queue,
            poller.clone(),
            CostAccumulator::new(pricing),
            events.clone(),
            config.failure_policy,
            signals_rx,
            cancel.clone(),
        );

        Self {
            coordinator,
            poller,
            store,
            events,
            cancel,
        }
    }

    /// Validate and start a workflow run.
    pub async fn start(&self, definition: WorkflowDefinition) -> Result<ExecutionId, EngineError> {
        self.coordinator.start_execution(definition).await
    }

    pub async fn cancel(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        self.coordinator.cancel_execution(execution_id).await
    }

    /// Inbound webhook delivery; repeated deliveries for the same
    /// prediction id are idempotent.
    pub async fn ingest_webhook(&self, update: PredictionUpdate) {
        self.poller.ingest(update).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub async fn execution(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        self.store.get_execution(id).await
    }

    pub async fn jobs(&self, id: ExecutionId) -> Result<Vec<Job>, StoreError> {
        self.store.find_jobs(id, None).await
    }

    /// Executions still resident in the coordinator; terminal executions
    /// are evicted and live on only in the store.
    pub async fn live_executions(&self) -> usize {
        self.coordinator.live_executions().await
    }

    /// Stop the poll loop, dispatch loop, and coordinator.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
