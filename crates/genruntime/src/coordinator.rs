//! Execution coordinator: the single writer for all execution and job
//! state.
//!
//! One task owns every live execution. The queue and poller never touch
//! the records directly; they submit [`JobSignal`] proposals over a
//! channel and the coordinator applies them atomically, re-evaluating the
//! readiness set only when a job reaches a terminal state.

use crate::cost::{CostAccumulator, PricingParams};
use crate::graph::{self, ResolvedGraph};
use crate::poller::ProviderPoller;
use crate::queue::{DispatchRequest, JobQueue};
use crate::registry::StrategyRegistry;
use crate::store::Store;
use chrono::Utc;
use gencore::{
    DispatchPlan, EngineError, EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionStatus,
    Job, JobId, JobStatus, NodeId, PredictionId, PredictionMetrics, PredictionRequest, QueueError,
    WorkflowDefinition, WorkflowEdge, WorkflowNode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// When an execution as a whole counts as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Any failed job fails the execution immediately; remaining
    /// non-terminal jobs are cancelled.
    FailFast,
    /// Sibling subgraphs run to completion; the execution fails only if a
    /// sink node's job did not succeed.
    SinkOnly,
}

/// Proposed job-state changes from the dispatch and reconciliation paths.
#[derive(Debug)]
pub enum JobSignal {
    Dispatched {
        execution_id: ExecutionId,
        job_id: JobId,
        prediction_id: PredictionId,
        attempt: u32,
    },
    Retrying {
        execution_id: ExecutionId,
        job_id: JobId,
        attempt: u32,
        error: String,
    },
    DispatchFailed {
        execution_id: ExecutionId,
        job_id: JobId,
        attempt: u32,
        error: String,
    },
    Progress {
        execution_id: ExecutionId,
        job_id: JobId,
        progress: f64,
    },
    Finished {
        execution_id: ExecutionId,
        job_id: JobId,
        status: JobStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
        metrics: Option<PredictionMetrics>,
    },
}

enum Command {
    Start {
        definition: WorkflowDefinition,
        reply: oneshot::Sender<Result<ExecutionId, EngineError>>,
    },
    Cancel {
        execution_id: ExecutionId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    LiveExecutions {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the coordinator task.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    commands: mpsc::Sender<Command>,
}

impl ExecutionCoordinator {
    /// Validate the graph and start a run. Graph errors abort creation
    /// before any job is allocated.
    pub async fn start_execution(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<ExecutionId, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { definition, reply })
            .await
            .map_err(|_| EngineError::Execution("coordinator stopped".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Execution("coordinator stopped".to_string()))?
    }

    /// Cooperative cancel: non-terminal jobs flip to Cancelled, in-flight
    /// predictions are best-effort cancelled provider-side.
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Cancel {
                execution_id,
                reply,
            })
            .await
            .map_err(|_| EngineError::Execution("coordinator stopped".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Execution("coordinator stopped".to_string()))?
    }

    /// Number of executions still resident in the coordinator. Terminal
    /// executions are evicted, so this tracks live work only.
    pub async fn live_executions(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::LiveExecutions { reply })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct ExecutionState {
    execution: Execution,
    graph: ResolvedGraph,
    nodes: HashMap<NodeId, WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    jobs: HashMap<NodeId, Job>,
    by_job: HashMap<JobId, NodeId>,
    started: Instant,
}

pub(crate) fn spawn_coordinator(
    store: Arc<dyn Store>,
    registry: Arc<StrategyRegistry>,
    queue: Arc<JobQueue>,
    poller: Arc<ProviderPoller>,
    costs: CostAccumulator,
    events: Arc<EventBus>,
    policy: FailurePolicy,
    signals: mpsc::Receiver<JobSignal>,
    cancel: CancellationToken,
) -> (ExecutionCoordinator, tokio::task::JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let task = CoordinatorTask {
        store,
        registry,
        queue,
        poller,
        costs,
        events,
        policy,
        executions: HashMap::new(),
    };
    let handle = tokio::spawn(task.run(commands_rx, signals, cancel));
    (
        ExecutionCoordinator {
            commands: commands_tx,
        },
        handle,
    )
}

struct CoordinatorTask {
    store: Arc<dyn Store>,
    registry: Arc<StrategyRegistry>,
    queue: Arc<JobQueue>,
    poller: Arc<ProviderPoller>,
    costs: CostAccumulator,
    events: Arc<EventBus>,
    policy: FailurePolicy,
    executions: HashMap<ExecutionId, ExecutionState>,
}

impl CoordinatorTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::Receiver<JobSignal>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Execution coordinator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
            }
        }
        tracing::info!("Execution coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { definition, reply } => {
                let _ = reply.send(self.begin(definition).await);
            }
            Command::Cancel {
                execution_id,
                reply,
            } => {
                let _ = reply.send(self.cancel(execution_id).await);
            }
            Command::LiveExecutions { reply } => {
                let _ = reply.send(self.executions.len());
            }
        }
    }

    /// `Pending -> Running`: validate, allocate one Pending job per node,
    /// then walk the initial readiness set.
    async fn begin(&mut self, definition: WorkflowDefinition) -> Result<ExecutionId, EngineError> {
        let resolved = graph::validate(&definition, &self.registry)?;

        let mut execution = Execution::new(definition.id);
        self.store.insert_execution(&execution).await?;

        let mut jobs = HashMap::new();
        let mut by_job = HashMap::new();
        for node in &definition.nodes {
            let job = Job::new(execution.id, node.id.clone());
            self.store.insert_job(&job).await?;
            by_job.insert(job.id, node.id.clone());
            jobs.insert(node.id.clone(), job);
        }

        execution.status = ExecutionStatus::Running;
        self.store.update_execution(&execution).await?;
        self.events.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution.id,
            workflow_id: definition.id,
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution.id,
            workflow = %definition.name,
            nodes = definition.nodes.len(),
            "Execution started",
        );

        let execution_id = execution.id;
        let state = ExecutionState {
            execution,
            graph: resolved,
            nodes: definition
                .nodes
                .into_iter()
                .map(|n| (n.id.clone(), n))
                .collect(),
            edges: definition.edges,
            jobs,
            by_job,
            started: Instant::now(),
        };
        self.executions.insert(execution_id, state);

        self.advance(execution_id).await;
        Ok(execution_id)
    }

    async fn cancel(&mut self, execution_id: ExecutionId) -> Result<(), EngineError> {
        let flipped = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                // Already settled and evicted, or never started.
                return match self.store.get_execution(execution_id).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(EngineError::Execution(format!(
                        "unknown execution {execution_id}"
                    ))),
                };
            };
            if state.execution.status.is_terminal() {
                return Ok(());
            }
            let mut flipped = Vec::new();
            for job in state.jobs.values_mut() {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Cancelled;
                    flipped.push(job.clone());
                }
            }
            flipped
        };

        for job in &flipped {
            self.persist_and_emit(job).await;
            self.queue.settle(execution_id, &job.node_id);
        }
        self.finish(execution_id, ExecutionStatus::Cancelled).await;
        self.poller.cancel_execution(execution_id).await;
        Ok(())
    }

    async fn handle_signal(&mut self, signal: JobSignal) {
        match signal {
            JobSignal::Dispatched {
                execution_id,
                job_id,
                prediction_id,
                attempt,
            } => {
                self.apply_dispatched(execution_id, job_id, prediction_id, attempt)
                    .await;
            }
            JobSignal::Retrying {
                execution_id,
                job_id,
                attempt,
                error,
            } => {
                let updated = self.with_job(execution_id, job_id, |job| {
                    if job.status.is_terminal() {
                        return false;
                    }
                    job.attempt = attempt;
                    job.error = Some(error.clone());
                    true
                });
                if let Some(job) = updated {
                    self.persist_and_emit(&job).await;
                }
            }
            JobSignal::DispatchFailed {
                execution_id,
                job_id,
                attempt,
                error,
            } => {
                let updated = self.with_job(execution_id, job_id, |job| {
                    if job.status.is_terminal() {
                        return false;
                    }
                    job.attempt = attempt;
                    true
                });
                if let Some(job) = updated {
                    self.fail_job(execution_id, &job.node_id, error).await;
                }
            }
            JobSignal::Progress {
                execution_id,
                job_id,
                progress,
            } => {
                let updated = self.with_job(execution_id, job_id, |job| {
                    if job.status != JobStatus::Processing {
                        return false;
                    }
                    job.progress = progress;
                    true
                });
                if let Some(job) = updated {
                    self.persist_and_emit(&job).await;
                }
            }
            JobSignal::Finished {
                execution_id,
                job_id,
                status,
                output,
                error,
                metrics: _,
            } => match status {
                JobStatus::Succeeded => self.complete_job(execution_id, job_id, output).await,
                JobStatus::Cancelled => {
                    let updated = self.with_job(execution_id, job_id, |job| {
                        if job.status.is_terminal() {
                            return false;
                        }
                        job.status = JobStatus::Cancelled;
                        true
                    });
                    if let Some(job) = updated {
                        self.persist_and_emit(&job).await;
                        self.queue.settle(execution_id, &job.node_id);
                        self.try_finalize(execution_id).await;
                    }
                }
                _ => {
                    let node = self.node_of(execution_id, job_id);
                    if let Some(node_id) = node {
                        self.fail_job(
                            execution_id,
                            &node_id,
                            error.unwrap_or_else(|| "provider reported failure".to_string()),
                        )
                        .await;
                    }
                }
            },
        }
    }

    /// Walk the readiness set until no Pending node has all upstream jobs
    /// Succeeded, then check for completion. Immediate (local) nodes
    /// resolve inside the loop, unlocking their dependents in the same
    /// pass.
    async fn advance(&mut self, execution_id: ExecutionId) {
        loop {
            let ready = {
                let Some(state) = self.executions.get(&execution_id) else {
                    return;
                };
                if state.execution.status.is_terminal() {
                    return;
                }
                next_ready(state).map(|node_id| {
                    let node = state.nodes[&node_id].clone();
                    let inputs = resolve_inputs(state, &node_id);
                    (node, inputs)
                })
            };
            let Some((node, inputs)) = ready else { break };

            let plan = self
                .registry
                .get(&node.node_type)
                .and_then(|strategy| strategy.plan(&node, &inputs));
            match plan {
                Ok(DispatchPlan::Immediate(output)) => {
                    self.succeed_local(execution_id, &node.id, output).await;
                }
                Ok(DispatchPlan::Predict(request)) => {
                    self.dispatch(execution_id, &node.id, request).await;
                }
                Err(e) => {
                    self.fail_job(execution_id, &node.id, e.to_string()).await;
                }
            }
        }
        self.try_finalize(execution_id).await;
    }

    /// Local node: no provider round-trip, terminal at zero cost.
    async fn succeed_local(
        &mut self,
        execution_id: ExecutionId,
        node_id: &str,
        output: serde_json::Value,
    ) {
        let updated = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            let Some(job) = state.jobs.get_mut(node_id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Succeeded;
            job.progress = 1.0;
            job.output = Some(output);
            job.clone()
        };
        tracing::debug!(execution_id = %execution_id, node_id, "Local node succeeded");
        self.persist_and_emit(&updated).await;
    }

    /// `Pending -> Queued` and hand off to the job queue. A duplicate
    /// rejection means a live dispatch already exists for this node; it is
    /// logged and otherwise ignored.
    async fn dispatch(
        &mut self,
        execution_id: ExecutionId,
        node_id: &str,
        request: PredictionRequest,
    ) {
        let queued = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            let Some(job) = state.jobs.get_mut(node_id) else {
                return;
            };
            if job.status != JobStatus::Pending {
                return;
            }
            job.status = JobStatus::Queued;
            job.clone()
        };
        self.persist_and_emit(&queued).await;

        let dispatch = DispatchRequest {
            execution_id,
            job_id: queued.id,
            node_id: node_id.to_string(),
            request,
        };
        match self.queue.enqueue(dispatch).await {
            Ok(()) => {}
            Err(QueueError::DuplicateJob { .. }) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    node_id,
                    "Duplicate enqueue rejected; keeping existing dispatch",
                );
            }
            Err(e) => {
                self.fail_job(execution_id, node_id, e.to_string()).await;
            }
        }
    }

    async fn apply_dispatched(
        &mut self,
        execution_id: ExecutionId,
        job_id: JobId,
        prediction_id: PredictionId,
        attempt: u32,
    ) {
        let updated = self.with_job(execution_id, job_id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.prediction_id = Some(prediction_id.clone());
            job.status = JobStatus::Processing;
            job.attempt = attempt;
            true
        });
        match updated {
            Some(job) => self.persist_and_emit(&job).await,
            // The job settled while the dispatch was in flight (cancel or
            // fail-fast); forget the prediction and cancel it upstream.
            None => self.poller.abandon(&prediction_id).await,
        }
    }

    /// Terminal success: price (provider-backed jobs only), fold the cost
    /// into the execution summary, then re-evaluate readiness.
    async fn complete_job(
        &mut self,
        execution_id: ExecutionId,
        job_id: JobId,
        output: Option<serde_json::Value>,
    ) {
        let prepared = {
            let Some(state) = self.executions.get(&execution_id) else {
                return;
            };
            let Some(node_id) = state.by_job.get(&job_id).cloned() else {
                return;
            };
            let Some(job) = state.jobs.get(&node_id) else {
                return;
            };
            if job.status.is_terminal() {
                tracing::debug!(
                    execution_id = %execution_id,
                    node_id = %node_id,
                    "Stale success report for terminal job ignored",
                );
                return;
            }
            let node = state.nodes[&node_id].clone();
            (node_id, node, job.prediction_id.is_some())
        };
        let (node_id, node, provider_backed) = prepared;

        let breakdown = if provider_backed {
            match self.costs.price_job(&PricingParams::from_node(&node)) {
                Ok(breakdown) => Some(breakdown),
                Err(e) => {
                    // Configuration error: fatal to this node, not retried.
                    self.fail_job(execution_id, &node_id, e.to_string()).await;
                    return;
                }
            }
        } else {
            None
        };

        let (job, execution) = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            let Some(job) = state.jobs.get_mut(&node_id) else {
                return;
            };
            job.status = JobStatus::Succeeded;
            job.progress = 1.0;
            job.output = output;
            if let Some(breakdown) = &breakdown {
                job.cost = breakdown.total;
                job.cost_breakdown = Some(breakdown.clone());
            }
            let job = job.clone();
            if let Some(breakdown) = &breakdown {
                self.costs
                    .apply(&mut state.execution.cost_summary, &node_id, breakdown);
            }
            (job, state.execution.clone())
        };

        tracing::info!(
            execution_id = %execution_id,
            node_id = %node_id,
            cost = job.cost,
            "Job succeeded",
        );
        self.persist_and_emit(&job).await;
        if breakdown.is_some() {
            if let Err(e) = self.store.update_execution(&execution).await {
                tracing::error!(execution_id = %execution_id, error = %e, "Failed to persist cost summary");
            }
            self.events.emit(ExecutionEvent::CostUpdated {
                execution_id,
                total: execution.cost_summary.total,
                timestamp: Utc::now(),
            });
        }
        self.queue.settle(execution_id, &node_id);
        self.advance(execution_id).await;
    }

    /// Terminal failure: cascade Skipped to every transitive dependent
    /// that was still Pending, then apply the failure policy.
    async fn fail_job(&mut self, execution_id: ExecutionId, node_id: &str, error: String) {
        let outcome = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            let Some(job) = state.jobs.get_mut(node_id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Failed;
            job.error = Some(error.clone());
            let failed = job.clone();

            let mut skipped = Vec::new();
            for dependent in state.graph.transitive_dependents(node_id) {
                if let Some(job) = state.jobs.get_mut(&dependent) {
                    if job.status == JobStatus::Pending {
                        job.status = JobStatus::Skipped;
                        skipped.push(job.clone());
                    }
                }
            }
            (failed, skipped)
        };
        let (failed, skipped) = outcome;

        tracing::error!(
            execution_id = %execution_id,
            node_id,
            attempt = failed.attempt,
            error = %error,
            "Job failed",
        );
        self.persist_and_emit(&failed).await;
        self.queue.settle(execution_id, node_id);
        for job in &skipped {
            self.persist_and_emit(job).await;
        }

        match self.policy {
            FailurePolicy::FailFast => {
                self.abort_remaining(execution_id).await;
                self.finish(execution_id, ExecutionStatus::Failed).await;
                self.poller.cancel_execution(execution_id).await;
            }
            FailurePolicy::SinkOnly => {
                self.try_finalize(execution_id).await;
            }
        }
    }

    /// Cancel every still-live job of an execution (fail-fast teardown).
    async fn abort_remaining(&mut self, execution_id: ExecutionId) {
        let flipped = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            let mut flipped = Vec::new();
            for job in state.jobs.values_mut() {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Cancelled;
                    flipped.push(job.clone());
                }
            }
            flipped
        };
        for job in &flipped {
            self.persist_and_emit(job).await;
            self.queue.settle(execution_id, &job.node_id);
        }
    }

    /// Completion check: once every job is terminal the execution settles
    /// per the failure policy. Completed iff every job Succeeded or was
    /// Skipped without reaching a sink.
    async fn try_finalize(&mut self, execution_id: ExecutionId) {
        let verdict = {
            let Some(state) = self.executions.get(&execution_id) else {
                return;
            };
            if state.execution.status.is_terminal() {
                return;
            }
            if !state.jobs.values().all(|j| j.status.is_terminal()) {
                return;
            }
            let failed = match self.policy {
                FailurePolicy::FailFast => {
                    state.jobs.values().any(|j| j.status == JobStatus::Failed)
                }
                FailurePolicy::SinkOnly => state.graph.sinks().iter().any(|sink| {
                    state
                        .jobs
                        .get(sink)
                        .is_some_and(|j| j.status != JobStatus::Succeeded)
                }),
            };
            if failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            }
        };
        self.finish(execution_id, verdict).await;
    }

    async fn finish(&mut self, execution_id: ExecutionId, status: ExecutionStatus) {
        let finished = {
            let Some(state) = self.executions.get_mut(&execution_id) else {
                return;
            };
            if state.execution.status.is_terminal() {
                return;
            }
            state.execution.status = status;
            state.execution.finished_at = Some(Utc::now());
            (
                state.execution.clone(),
                state.started.elapsed().as_millis() as u64,
            )
        };
        let (execution, duration_ms) = finished;

        // Terminal executions leave the live set; the store keeps the
        // record, and late signals for them fall through the lookup guards.
        self.executions.remove(&execution_id);

        if let Err(e) = self.store.update_execution(&execution).await {
            tracing::error!(execution_id = %execution_id, error = %e, "Failed to persist execution");
        }
        tracing::info!(
            execution_id = %execution_id,
            status = ?status,
            total_cost = execution.cost_summary.total,
            duration_ms,
            "Execution finished",
        );
        self.events.emit(ExecutionEvent::ExecutionFinished {
            execution_id,
            status,
            total_cost: execution.cost_summary.total,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn node_of(&self, execution_id: ExecutionId, job_id: JobId) -> Option<NodeId> {
        self.executions
            .get(&execution_id)
            .and_then(|state| state.by_job.get(&job_id).cloned())
    }

    /// Apply a mutation to a job; returns the updated clone when the
    /// mutation reported a change.
    fn with_job(
        &mut self,
        execution_id: ExecutionId,
        job_id: JobId,
        mutate: impl FnOnce(&mut Job) -> bool,
    ) -> Option<Job> {
        let state = self.executions.get_mut(&execution_id)?;
        let node_id = state.by_job.get(&job_id)?.clone();
        let job = state.jobs.get_mut(&node_id)?;
        if mutate(job) {
            Some(job.clone())
        } else {
            None
        }
    }

    async fn persist_and_emit(&self, job: &Job) {
        if let Err(e) = self.store.update_job(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job");
        }
        self.events.emit(ExecutionEvent::JobUpdated {
            execution_id: job.execution_id,
            job_id: job.id,
            node_id: job.node_id.clone(),
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// First node in deterministic order whose job is Pending and whose direct
/// upstream jobs are all Succeeded.
fn next_ready(state: &ExecutionState) -> Option<NodeId> {
    state
        .graph
        .order
        .iter()
        .find(|id| {
            let pending = state
                .jobs
                .get(id.as_str())
                .is_some_and(|j| j.status == JobStatus::Pending);
            pending
                && state.graph.dependencies_of(id).map_or(true, |deps| {
                    deps.iter().all(|dep| {
                        state
                            .jobs
                            .get(dep)
                            .is_some_and(|j| j.status == JobStatus::Succeeded)
                    })
                })
        })
        .cloned()
}

/// Project upstream outputs along the node's incoming edges, keyed by
/// target handle, selecting the source-handle field when present.
fn resolve_inputs(state: &ExecutionState, node_id: &str) -> HashMap<String, serde_json::Value> {
    let mut inputs = HashMap::new();
    for edge in &state.edges {
        if edge.target != node_id {
            continue;
        }
        let Some(output) = state.jobs.get(&edge.source).and_then(|j| j.output.as_ref()) else {
            continue;
        };
        let value = match &edge.source_handle {
            Some(handle) => output.get(handle).cloned().unwrap_or_else(|| output.clone()),
            None => output.clone(),
        };
        let key = edge
            .target_handle
            .clone()
            .unwrap_or_else(|| "input".to_string());
        inputs.insert(key, value);
    }
    inputs
}
