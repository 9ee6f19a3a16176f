//! Provider-status reconciliation.
//!
//! Keeps the set of open predictions and merges status reports from the
//! jittered poll loop and inbound webhook deliveries through one
//! idempotent path: the first terminal report wins, anything after
//! removal is a no-op.

use crate::coordinator::JobSignal;
use gencore::{
    ExecutionId, GenerationProvider, JobId, JobStatus, NodeId, PredictionId, PredictionState,
    PredictionUpdate, ProviderError,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base interval between poll ticks.
    pub interval: Duration,
    /// Uniform jitter applied to each tick as a fraction of the interval.
    pub jitter: f64,
    /// Budget from registration to terminal status; exceeding it fails the
    /// job with a timeout error and stops polling it.
    pub timeout: Duration,
    /// Concurrent status calls per tick; the batch is joined before the
    /// next tick starts.
    pub fanout: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            jitter: 0.25,
            timeout: Duration::from_secs(600),
            fanout: 8,
        }
    }
}

struct OpenPrediction {
    execution_id: ExecutionId,
    job_id: JobId,
    node_id: NodeId,
    registered_at: Instant,
    // Held for the whole Processing window; dropping it releases one
    // concurrency slot.
    _permit: OwnedSemaphorePermit,
}

pub struct ProviderPoller {
    provider: Arc<dyn GenerationProvider>,
    signals: mpsc::Sender<JobSignal>,
    open: Mutex<HashMap<PredictionId, OpenPrediction>>,
    config: PollerConfig,
}

impl ProviderPoller {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        signals: mpsc::Sender<JobSignal>,
        config: PollerConfig,
    ) -> Self {
        Self {
            provider,
            signals,
            open: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Track a freshly created prediction. The concurrency permit moves in
    /// with it and is released when the entry is removed.
    pub fn register(
        &self,
        prediction_id: PredictionId,
        execution_id: ExecutionId,
        job_id: JobId,
        node_id: NodeId,
        permit: OwnedSemaphorePermit,
    ) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        open.insert(
            prediction_id,
            OpenPrediction {
                execution_id,
                job_id,
                node_id,
                registered_at: Instant::now(),
                _permit: permit,
            },
        );
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Merge one status report into the tracked job, regardless of whether
    /// it arrived by poll or webhook.
    ///
    /// Terminal reports remove the entry first, so a duplicate delivery
    /// finds nothing and falls through silently.
    pub async fn ingest(&self, update: PredictionUpdate) {
        if update.state.is_terminal() {
            let removed = {
                let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
                open.remove(&update.id)
            };
            let Some(entry) = removed else {
                tracing::debug!(prediction_id = %update.id, "Stale terminal delivery ignored");
                return;
            };

            let status = match update.state {
                PredictionState::Succeeded => JobStatus::Succeeded,
                PredictionState::Canceled => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            };
            let _ = self
                .signals
                .send(JobSignal::Finished {
                    execution_id: entry.execution_id,
                    job_id: entry.job_id,
                    status,
                    output: update.output,
                    error: update.error,
                    metrics: update.metrics,
                })
                .await;
            return;
        }

        // Non-terminal: forward progress if we still track the prediction.
        let entry = {
            let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            open.get(&update.id)
                .map(|e| (e.execution_id, e.job_id, e.node_id.clone()))
        };
        if let (Some((execution_id, job_id, _)), Some(progress)) = (entry, update.progress) {
            let _ = self
                .signals
                .send(JobSignal::Progress {
                    execution_id,
                    job_id,
                    progress,
                })
                .await;
        }
    }

    /// Poll loop: sweep timeouts, then fan out one bounded batch of status
    /// calls and join it before sleeping again.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            timeout_s = self.config.timeout.as_secs(),
            "Provider poller started",
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.jittered_interval()) => {}
            }

            self.sweep_timeouts().await;

            let ids: Vec<PredictionId> = {
                let open = self.open.lock().unwrap_or_else(|e| e.into_inner());
                open.keys().cloned().collect()
            };
            if ids.is_empty() {
                continue;
            }

            let updates: Vec<Result<PredictionUpdate, (PredictionId, ProviderError)>> =
                stream::iter(ids)
                    .map(|id| {
                        let provider = self.provider.clone();
                        async move {
                            provider
                                .get_prediction(&id)
                                .await
                                .map_err(|e| (id.clone(), e))
                        }
                    })
                    .buffer_unordered(self.config.fanout)
                    .collect()
                    .await;

            for update in updates {
                match update {
                    Ok(update) => self.ingest(update).await,
                    Err((prediction_id, e)) => {
                        tracing::warn!(
                            prediction_id = %prediction_id,
                            error = %e,
                            "Status poll failed, will retry next tick",
                        );
                    }
                }
            }
        }
        tracing::info!("Provider poller stopped");
    }

    fn jittered_interval(&self) -> Duration {
        let base = self.config.interval.as_millis() as f64;
        let spread = base * self.config.jitter;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
        Duration::from_millis((base + offset).max(1.0) as u64)
    }

    /// Fail every open prediction that has exceeded its timeout budget and
    /// stop polling it.
    async fn sweep_timeouts(&self) {
        let expired: Vec<(PredictionId, OpenPrediction)> = {
            let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<PredictionId> = open
                .iter()
                .filter(|(_, e)| e.registered_at.elapsed() >= self.config.timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| open.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (prediction_id, entry) in expired {
            let seconds = self.config.timeout.as_secs();
            tracing::warn!(
                prediction_id = %prediction_id,
                node_id = %entry.node_id,
                timeout_s = seconds,
                "Prediction timed out",
            );
            let _ = self
                .signals
                .send(JobSignal::Finished {
                    execution_id: entry.execution_id,
                    job_id: entry.job_id,
                    status: JobStatus::Failed,
                    output: None,
                    error: Some(ProviderError::Timeout { seconds }.to_string()),
                    metrics: None,
                })
                .await;
        }
    }

    /// Drop and best-effort cancel every open prediction for an execution.
    /// Any terminal report that still arrives afterwards is stale and
    /// ignored by [`ingest`](Self::ingest).
    pub async fn cancel_execution(&self, execution_id: ExecutionId) {
        let dropped: Vec<PredictionId> = {
            let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<PredictionId> = open
                .iter()
                .filter(|(_, e)| e.execution_id == execution_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                open.remove(id);
            }
            ids
        };

        for prediction_id in dropped {
            if let Err(e) = self.provider.cancel_prediction(&prediction_id).await {
                tracing::warn!(
                    prediction_id = %prediction_id,
                    error = %e,
                    "Provider-side cancel failed",
                );
            }
        }
    }

    /// Forget a single prediction whose job went terminal out of band
    /// (e.g. cancelled while its dispatch was still in flight).
    pub async fn abandon(&self, prediction_id: &str) {
        let removed = {
            let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            open.remove(prediction_id).is_some()
        };
        if removed {
            if let Err(e) = self.provider.cancel_prediction(prediction_id).await {
                tracing::warn!(
                    prediction_id = %prediction_id,
                    error = %e,
                    "Provider-side cancel failed",
                );
            }
        }
    }
}
