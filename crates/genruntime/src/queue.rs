//! Job admission and provider dispatch.
//!
//! The durable queue is a narrow at-least-once contract (FIFO not
//! required); `MemoryQueue` backs tests and single-process runs, a broker
//! client can back production. `JobQueue` layers dedup on top, and the
//! dispatch loop applies the concurrency cap and retry/backoff before
//! handing accepted predictions to the poller.

use crate::coordinator::JobSignal;
use crate::poller::ProviderPoller;
use async_trait::async_trait;
use gencore::{
    ExecutionId, GenerationProvider, JobId, NodeId, PredictionRequest, QueueError,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Payload handed to the durable queue: everything a dispatch worker needs
/// to submit one node's work to the provider.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    pub node_id: NodeId,
    pub request: PredictionRequest,
}

/// At-least-once delivery queue. Redelivery makes dedup in [`JobQueue`]
/// load-bearing: a redelivered message for a live job is rejected there.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn push(&self, request: DispatchRequest) -> Result<(), QueueError>;
    /// `None` once the queue is closed and drained.
    async fn pop(&self) -> Option<DispatchRequest>;
}

/// In-memory durable-queue implementation over an mpsc channel. The channel
/// buffer is the Queued backlog.
pub struct MemoryQueue {
    tx: mpsc::Sender<DispatchRequest>,
    rx: tokio::sync::Mutex<mpsc::Receiver<DispatchRequest>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn push(&self, request: DispatchRequest) -> Result<(), QueueError> {
        self.tx.send(request).await.map_err(|_| QueueError::Closed)
    }

    async fn pop(&self) -> Option<DispatchRequest> {
        self.rx.lock().await.recv().await
    }
}

/// Retry/backoff tuning for provider dispatch.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Bounded attempt count; the attempt that exhausts this marks the job
    /// Failed.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to the configured maximum.
pub fn next_delay(current: Duration, config: &QueueConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.backoff_multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_backoff)
}

/// Admission front of the dispatch pipeline.
///
/// Tracks live `(execution_id, node_id)` pairs so a retried or redelivered
/// enqueue reuses the existing job instead of racing a second dispatch.
pub struct JobQueue {
    queue: Arc<dyn DurableQueue>,
    inflight: Mutex<HashSet<(ExecutionId, NodeId)>>,
}

impl JobQueue {
    pub fn new(queue: Arc<dyn DurableQueue>) -> Self {
        Self {
            queue,
            inflight: Mutex::new(HashSet::new()),
        }
    }

    /// Admit a job for dispatch. Rejects `DuplicateJob` when a non-terminal
    /// job already exists for the same `(execution_id, node_id)` pair.
    pub async fn enqueue(&self, request: DispatchRequest) -> Result<(), QueueError> {
        let key = (request.execution_id, request.node_id.clone());
        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if !inflight.insert(key.clone()) {
                return Err(QueueError::DuplicateJob {
                    execution_id: request.execution_id,
                    node_id: request.node_id,
                });
            }
        }

        if let Err(e) = self.queue.push(request).await {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            inflight.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    /// Called by the coordinator when the job reaches a terminal state;
    /// frees the dedup slot for any future execution of the same node.
    pub fn settle(&self, execution_id: ExecutionId, node_id: &str) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.remove(&(execution_id, node_id.to_string()));
    }

    /// A dispatch stays live from `enqueue` until the coordinator settles
    /// its job. Workers check this before spending a provider call on a
    /// message whose job was cancelled while it sat in the queue.
    pub fn is_live(&self, execution_id: ExecutionId, node_id: &str) -> bool {
        let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.contains(&(execution_id, node_id.to_string()))
    }
}

/// Dispatch loop: pops admitted work, waits for a concurrency permit, and
/// runs each dispatch on its own task. The permit travels with the
/// prediction into the poller and is released when the job settles, so at
/// most `C` jobs are Processing at any moment.
#[allow(clippy::too_many_arguments)]
pub async fn run_dispatch_loop(
    queue: Arc<dyn DurableQueue>,
    admission: Arc<JobQueue>,
    provider: Arc<dyn GenerationProvider>,
    poller: Arc<ProviderPoller>,
    signals: mpsc::Sender<JobSignal>,
    semaphore: Arc<Semaphore>,
    config: QueueConfig,
    cancel: CancellationToken,
) {
    tracing::info!(max_attempts = config.max_attempts, "Dispatch loop started");
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            popped = queue.pop() => match popped {
                Some(request) => request,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            acquired = semaphore.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let admission = admission.clone();
        let provider = provider.clone();
        let poller = poller.clone();
        let signals = signals.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            dispatch_one(
                request, admission, provider, poller, signals, permit, config, cancel,
            )
            .await;
        });
    }
    tracing::info!("Dispatch loop stopped");
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    request: DispatchRequest,
    admission: Arc<JobQueue>,
    provider: Arc<dyn GenerationProvider>,
    poller: Arc<ProviderPoller>,
    signals: mpsc::Sender<JobSignal>,
    permit: tokio::sync::OwnedSemaphorePermit,
    config: QueueConfig,
    cancel: CancellationToken,
) {
    let mut attempt = 1u32;
    let mut delay = config.initial_backoff;

    loop {
        // The job may have settled (cancelled, fail-fast teardown) while
        // this message sat in the queue or between retries; skip the
        // provider call entirely in that case.
        if !admission.is_live(request.execution_id, &request.node_id) {
            tracing::debug!(
                execution_id = %request.execution_id,
                node_id = %request.node_id,
                "Job settled before dispatch, dropping",
            );
            return;
        }

        match provider.create_prediction(request.request.clone()).await {
            Ok(prediction_id) => {
                tracing::info!(
                    execution_id = %request.execution_id,
                    node_id = %request.node_id,
                    prediction_id = %prediction_id,
                    attempt,
                    "Prediction created",
                );
                poller.register(
                    prediction_id.clone(),
                    request.execution_id,
                    request.job_id,
                    request.node_id.clone(),
                    permit,
                );
                let _ = signals
                    .send(JobSignal::Dispatched {
                        execution_id: request.execution_id,
                        job_id: request.job_id,
                        prediction_id,
                        attempt,
                    })
                    .await;
                return;
            }
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                tracing::warn!(
                    execution_id = %request.execution_id,
                    node_id = %request.node_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient dispatch failure, backing off",
                );
                let _ = signals
                    .send(JobSignal::Retrying {
                        execution_id: request.execution_id,
                        job_id: request.job_id,
                        attempt,
                        error: e.to_string(),
                    })
                    .await;

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, &config);
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    execution_id = %request.execution_id,
                    node_id = %request.node_id,
                    attempt,
                    error = %e,
                    "Dispatch failed",
                );
                let _ = signals
                    .send(JobSignal::DispatchFailed {
                        execution_id: request.execution_id,
                        job_id: request.job_id,
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(execution_id: ExecutionId, node_id: &str) -> DispatchRequest {
        DispatchRequest {
            execution_id,
            job_id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            request: PredictionRequest {
                model: "flux-dev".to_string(),
                input: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected_until_settled() {
        let queue = JobQueue::new(Arc::new(MemoryQueue::new(8)));
        let execution_id = Uuid::new_v4();

        queue.enqueue(request(execution_id, "b")).await.unwrap();
        let err = queue.enqueue(request(execution_id, "b")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateJob { .. }));

        // A different node in the same execution is fine.
        queue.enqueue(request(execution_id, "c")).await.unwrap();

        queue.settle(execution_id, "b");
        queue.enqueue(request(execution_id, "b")).await.unwrap();
    }

    #[tokio::test]
    async fn settled_job_is_not_dispatched() {
        use crate::poller::{PollerConfig, ProviderPoller};
        use genprovider::MockProvider;

        let durable = Arc::new(MemoryQueue::new(8));
        let admission = Arc::new(JobQueue::new(durable.clone()));
        let provider = Arc::new(MockProvider::new());
        let (signals_tx, mut signals_rx) = mpsc::channel(8);
        let poller = Arc::new(ProviderPoller::new(
            provider.clone(),
            signals_tx.clone(),
            PollerConfig::default(),
        ));
        let cancel = CancellationToken::new();

        let execution_id = Uuid::new_v4();
        admission.enqueue(request(execution_id, "b")).await.unwrap();
        // The job settles (cancellation) before any worker picks the
        // message up; no provider call should be spent on it.
        admission.settle(execution_id, "b");

        tokio::spawn(run_dispatch_loop(
            durable,
            admission.clone(),
            provider.clone(),
            poller,
            signals_tx,
            Arc::new(Semaphore::new(1)),
            QueueConfig::default(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(provider.created().is_empty());
        assert!(signals_rx.try_recv().is_err());
        cancel.cancel();
    }

    #[test]
    fn backoff_grows_and_is_clamped() {
        let config = QueueConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        };

        let d1 = next_delay(config.initial_backoff, &config);
        assert_eq!(d1, Duration::from_millis(1000));
        let d2 = next_delay(d1, &config);
        assert_eq!(d2, Duration::from_millis(2000));
        let d3 = next_delay(d2, &config);
        assert_eq!(d3, Duration::from_secs(2));
    }
}
