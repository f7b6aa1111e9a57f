//! In-process workflow engine on tokio.
//!
//! Top-level workflows run as spawned tasks. Activities run on a bounded
//! worker pool with schedule-to-start, start-to-close and schedule-to-close
//! timeouts and a retry policy; panics inside an activity are caught and
//! reported as a non-retryable error.
//!
//! A cancelled run stops at its next suspension point. Cancellation returns
//! only after every activity the run already dispatched has finished.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedRwLockReadGuard, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::activity::{Activity, ActivityRegistry, ErasedActivity};
use super::retry::ActivityOptions;
use super::workflow::{SignalMailbox, Workflow, WorkflowContext, WorkflowRegistry};
use super::{StartWorkflowOptions, WorkflowClient, WorkflowRun};
use crate::error::{AppError, Result};

/// Finished runs kept for `get_result` before the oldest are evicted
pub const DEFAULT_FINISHED_RUN_RETENTION: usize = 1024;

/// Final state of a top-level run
#[derive(Debug, Clone)]
enum RunOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

/// Held for reading by every dispatched activity attempt of a run
pub(crate) type ActivityGate = Arc<RwLock<()>>;

struct WorkflowRunState {
    workflow: String,
    run_id: String,
    mailbox: Arc<SignalMailbox>,
    outcome: watch::Sender<Option<RunOutcome>>,
    task: Mutex<Option<JoinHandle<()>>>,
    activities: ActivityGate,
}

impl WorkflowRunState {
    fn is_running(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    /// Record the outcome unless one was recorded already
    fn finish(&self, outcome: RunOutcome) -> bool {
        self.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        })
    }
}

pub(crate) struct EngineShared {
    activities: ActivityRegistry,
    pub(crate) workflows: WorkflowRegistry,
    workers: Arc<Semaphore>,
    default_options: ActivityOptions,
    runs: RwLock<HashMap<String, Arc<WorkflowRunState>>>,
    finished: Mutex<VecDeque<(String, String)>>,
    retention: usize,
}

impl EngineShared {
    /// Remember a finished run and evict the oldest beyond the retention
    async fn retire(&self, workflow_id: &str, run_id: &str) {
        let evicted: Vec<(String, String)> = {
            let mut finished = self.finished.lock().await;
            finished.push_back((workflow_id.to_string(), run_id.to_string()));
            let excess = finished.len().saturating_sub(self.retention);
            finished.drain(..excess).collect()
        };
        if evicted.is_empty() {
            return;
        }

        let mut runs = self.runs.write().await;
        for (workflow_id, run_id) in evicted {
            // The id may have been reused by a newer run
            if runs.get(&workflow_id).map(|run| run.run_id == run_id).unwrap_or(false) {
                runs.remove(&workflow_id);
                debug!(workflow_id = %workflow_id, "Evicted finished workflow run");
            }
        }
    }

    pub(crate) async fn run_activity(
        &self,
        workflow_id: &str,
        gate: &ActivityGate,
        name: &str,
        input: serde_json::Value,
        options: Option<&ActivityOptions>,
    ) -> Result<serde_json::Value> {
        let registered = self.activities.get(name).ok_or_else(|| {
            AppError::InternalServerError(format!("activity {} is not registered", name))
        })?;
        let options = options
            .or(registered.options.as_ref())
            .unwrap_or(&self.default_options);

        let deadline = Instant::now() + options.schedule_to_close;
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout_at(
                deadline,
                self.run_attempt(name, gate, registered.handler.clone(), input.clone(), options),
            )
            .await;

            let err = match result {
                Ok(Ok(output)) => {
                    if attempt > 1 {
                        info!(
                            workflow_id = %workflow_id,
                            activity = name,
                            attempt = attempt,
                            "Activity succeeded after retry"
                        );
                    }
                    return Ok(output);
                }
                Ok(Err(err)) => err,
                Err(_) => {
                    return Err(AppError::ActivityFailed {
                        activity: name.to_string(),
                        source: Box::new(AppError::Timeout(format!(
                            "schedule-to-close timeout of {:?} exceeded",
                            options.schedule_to_close
                        ))),
                    });
                }
            };

            let delay = options.retry_policy.delay_for_attempt(attempt);
            if !options.retry_policy.should_retry(attempt, &err) || Instant::now() + delay >= deadline {
                warn!(
                    workflow_id = %workflow_id,
                    activity = name,
                    attempt = attempt,
                    error = %err,
                    "Activity failed"
                );
                return Err(AppError::ActivityFailed {
                    activity: name.to_string(),
                    source: Box::new(err),
                });
            }

            warn!(
                workflow_id = %workflow_id,
                activity = name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Activity attempt failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run_attempt(
        &self,
        name: &str,
        gate: &ActivityGate,
        handler: Arc<dyn ErasedActivity>,
        input: serde_json::Value,
        options: &ActivityOptions,
    ) -> Result<serde_json::Value> {
        let permit = tokio::time::timeout(options.schedule_to_start, self.workers.clone().acquire_owned())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "no activity worker became free within {:?}",
                    options.schedule_to_start
                ))
            })?
            .map_err(|_| AppError::InternalServerError("activity worker pool is closed".to_string()))?;

        let dispatched: OwnedRwLockReadGuard<()> = gate.clone().read_owned().await;
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            let _dispatched = dispatched;
            handler.execute_json(input).await
        });

        match tokio::time::timeout(options.start_to_close, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                let panic = join_error.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(activity = name, message = %message, "Activity panicked");
                Err(AppError::ActivityPanic {
                    activity: name.to_string(),
                    message,
                })
            }
            Ok(Err(join_error)) => Err(AppError::InternalServerError(format!(
                "activity task was cancelled: {}",
                join_error
            ))),
            Err(_) => {
                handle.abort();
                Err(AppError::Timeout(format!(
                    "start-to-close timeout of {:?} exceeded",
                    options.start_to_close
                )))
            }
        }
    }
}

/// Builder registering the activities and workflows of a local engine
pub struct LocalWorkflowEngineBuilder {
    activities: ActivityRegistry,
    workflows: WorkflowRegistry,
    workers: usize,
    default_options: ActivityOptions,
    retention: usize,
}

impl LocalWorkflowEngineBuilder {
    pub fn activity<A: Activity>(mut self, activity: A) -> Self {
        self.activities.register(activity);
        self
    }

    pub fn workflow<W: Workflow>(mut self, workflow: W) -> Self {
        self.workflows.register(workflow);
        self
    }

    /// Size of the activity worker pool
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn default_activity_options(mut self, options: ActivityOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Number of finished runs whose result stays available
    pub fn finished_run_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn build(self) -> LocalWorkflowEngine {
        LocalWorkflowEngine {
            shared: Arc::new(EngineShared {
                activities: self.activities,
                workflows: self.workflows,
                workers: Arc::new(Semaphore::new(self.workers.max(1))),
                default_options: self.default_options,
                runs: RwLock::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
                retention: self.retention.max(1),
            }),
        }
    }
}

#[derive(Clone)]
pub struct LocalWorkflowEngine {
    shared: Arc<EngineShared>,
}

impl LocalWorkflowEngine {
    pub fn builder() -> LocalWorkflowEngineBuilder {
        LocalWorkflowEngineBuilder {
            activities: ActivityRegistry::new(),
            workflows: WorkflowRegistry::new(),
            workers: 32,
            default_options: ActivityOptions::default(),
            retention: DEFAULT_FINISHED_RUN_RETENTION,
        }
    }

    pub fn has_activity(&self, name: &str) -> bool {
        self.shared.activities.contains(name)
    }

    pub fn has_workflow(&self, name: &str) -> bool {
        self.shared.workflows.contains(name)
    }

    /// Whether a top-level run with this id is still in flight
    pub async fn is_running(&self, workflow_id: &str) -> bool {
        let runs = self.shared.runs.read().await;
        runs.get(workflow_id).map(|run| run.is_running()).unwrap_or(false)
    }

    async fn run_state(&self, workflow_id: &str) -> Result<Arc<WorkflowRunState>> {
        let runs = self.shared.runs.read().await;
        runs.get(workflow_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("workflow", workflow_id))
    }
}

#[async_trait]
impl WorkflowClient for LocalWorkflowEngine {
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowRun> {
        let handler = self.shared.workflows.get(workflow).ok_or_else(|| {
            AppError::InternalServerError(format!("workflow {} is not registered", workflow))
        })?;
        let (outcome_tx, _) = watch::channel(None);
        let state = Arc::new(WorkflowRunState {
            workflow: workflow.to_string(),
            run_id: Uuid::new_v4().to_string(),
            mailbox: Arc::new(SignalMailbox::default()),
            outcome: outcome_tx,
            task: Mutex::new(None),
            activities: Arc::new(RwLock::new(())),
        });

        {
            let mut runs = self.shared.runs.write().await;
            if let Some(existing) = runs.get(&options.workflow_id) {
                if existing.is_running() {
                    return Err(AppError::Conflict(format!(
                        "workflow {} is already running",
                        options.workflow_id
                    )));
                }
            }
            runs.insert(options.workflow_id.clone(), state.clone());
        }

        let run = WorkflowRun {
            workflow_id: options.workflow_id.clone(),
            run_id: state.run_id.clone(),
        };
        let ctx = WorkflowContext::new(
            self.shared.clone(),
            options.workflow_id.clone(),
            state.mailbox.clone(),
            state.activities.clone(),
        );
        let execution_timeout = options.execution_timeout;
        let workflow_id = options.workflow_id;

        info!(workflow_id = %workflow_id, workflow = workflow, "Starting workflow");

        let shared = self.shared.clone();
        let mut task = state.task.lock().await;
        let run_state = state.clone();
        *task = Some(tokio::spawn(async move {
            let state = run_state;
            let outcome = match tokio::time::timeout(execution_timeout, handler.run_json(ctx, input)).await {
                Ok(Ok(output)) => {
                    info!(workflow_id = %workflow_id, workflow = %state.workflow, "Workflow completed");
                    RunOutcome::Completed(output)
                }
                Ok(Err(err)) => {
                    warn!(workflow_id = %workflow_id, workflow = %state.workflow, error = %err, "Workflow failed");
                    RunOutcome::Failed(err.root_message())
                }
                Err(_) => {
                    warn!(workflow_id = %workflow_id, workflow = %state.workflow, "Workflow execution timed out");
                    RunOutcome::Failed(format!("execution timeout of {:?} exceeded", execution_timeout))
                }
            };
            // Retired first so waiters woken by the outcome see the eviction
            shared.retire(&workflow_id, &state.run_id).await;
            state.finish(outcome);
        }));

        Ok(run)
    }

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let state = self.run_state(workflow_id).await?;
        if !state.is_running() {
            return Err(AppError::Conflict(format!(
                "workflow {} is no longer running",
                workflow_id
            )));
        }

        debug!(workflow_id = %workflow_id, signal = signal, "Delivering signal");
        state.mailbox.deliver(signal, payload);
        Ok(())
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        let state = self.run_state(workflow_id).await?;
        if !state.is_running() {
            return Ok(());
        }

        if let Some(task) = state.task.lock().await.take() {
            task.abort();
            // Cancelled or already finished, both leave the run stopped
            let _ = task.await;
        }
        // Wait for activity attempts that were already dispatched
        let _drained = state.activities.write().await;

        if state.is_running() {
            self.shared.retire(workflow_id, &state.run_id).await;
            state.finish(RunOutcome::Failed("workflow was cancelled".to_string()));
            warn!(workflow_id = %workflow_id, workflow = %state.workflow, "Workflow cancelled");
        }
        Ok(())
    }

    async fn get_result(&self, workflow_id: &str) -> Result<serde_json::Value> {
        let state = self.run_state(workflow_id).await?;
        let mut outcome_rx = state.outcome.subscribe();
        let outcome = outcome_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AppError::InternalServerError("workflow run was dropped".to_string()))?
            .clone();

        match outcome {
            Some(RunOutcome::Completed(output)) => Ok(output),
            Some(RunOutcome::Failed(message)) => Err(AppError::WorkflowFailed {
                workflow: state.workflow.clone(),
                message,
            }),
            None => Err(AppError::InternalServerError("workflow has no outcome".to_string())),
        }
    }
}

impl Default for StartWorkflowOptions {
    fn default() -> Self {
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            execution_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{join_activities, RetryPolicy};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Serialize, Deserialize)]
    struct FlakyInput {
        fail_times: u32,
    }

    struct FlakyActivity {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Activity for FlakyActivity {
        type Input = FlakyInput;
        type Output = u32;

        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, input: FlakyInput) -> Result<u32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= input.fail_times {
                Err(AppError::VirtualizationError(format!("attempt {} failed", call)))
            } else {
                Ok(call)
            }
        }
    }

    struct PanickingActivity {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Activity for PanickingActivity {
        type Input = ();
        type Output = ();

        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(&self, _input: ()) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("unexpected nil reference");
        }
    }

    struct FailingActivity;

    #[async_trait]
    impl Activity for FailingActivity {
        type Input = String;
        type Output = ();

        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self, input: String) -> Result<()> {
            if input.starts_with("bad") {
                Err(AppError::validation(format!("{} rejected", input)))
            } else {
                Ok(())
            }
        }
    }

    /// Calls `flaky`, then waits for a `go` signal and returns its payload
    struct SignalWorkflow;

    #[async_trait]
    impl Workflow for SignalWorkflow {
        type Input = u64;
        type Output = String;

        fn name(&self) -> &'static str {
            "signal-workflow"
        }

        async fn run(&self, ctx: WorkflowContext, timeout_ms: u64) -> Result<String> {
            let _: u32 = ctx
                .execute_activity("flaky", &FlakyInput { fail_times: 0 })
                .await?;
            match ctx
                .receive_signal::<String>("go", Duration::from_millis(timeout_ms))
                .await?
            {
                Some(payload) => Ok(payload),
                None => Err(AppError::Timeout("no go signal".to_string())),
            }
        }
    }

    struct SlowActivity {
        completed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Activity for SlowActivity {
        type Input = u64;
        type Output = ();

        fn name(&self) -> &'static str {
            "slow"
        }

        async fn execute(&self, millis: u64) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Runs `slow`, then `flaky`
    struct SlowWorkflow;

    #[async_trait]
    impl Workflow for SlowWorkflow {
        type Input = u64;
        type Output = u32;

        fn name(&self) -> &'static str {
            "slow-workflow"
        }

        async fn run(&self, ctx: WorkflowContext, millis: u64) -> Result<u32> {
            ctx.execute_activity::<_, ()>("slow", &millis).await?;
            ctx.execute_activity("flaky", &FlakyInput { fail_times: 0 }).await
        }
    }

    struct FanOutWorkflow;

    #[async_trait]
    impl Workflow for FanOutWorkflow {
        type Input = Vec<String>;
        type Output = usize;

        fn name(&self) -> &'static str {
            "fan-out"
        }

        async fn run(&self, ctx: WorkflowContext, inputs: Vec<String>) -> Result<usize> {
            let futures = inputs
                .iter()
                .map(|input| ctx.execute_activity::<_, ()>("failing", input));
            Ok(join_activities(futures).await?.len())
        }
    }

    fn fast_options() -> ActivityOptions {
        ActivityOptions {
            schedule_to_start: Duration::from_secs(1),
            start_to_close: Duration::from_secs(1),
            schedule_to_close: Duration::from_secs(5),
            retry_policy: RetryPolicy {
                max_attempts: 3,
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                backoff_coefficient: 2.0,
                use_jitter: false,
            },
        }
    }

    fn builder(calls: Arc<AtomicU32>, completed: Arc<AtomicU32>) -> LocalWorkflowEngineBuilder {
        LocalWorkflowEngine::builder()
            .activity(FlakyActivity { calls: calls.clone() })
            .activity(PanickingActivity { calls })
            .activity(FailingActivity)
            .activity(SlowActivity { completed })
            .workflow(SignalWorkflow)
            .workflow(SlowWorkflow)
            .workflow(FanOutWorkflow)
            .workers(4)
            .default_activity_options(fast_options())
    }

    fn engine(calls: Arc<AtomicU32>) -> LocalWorkflowEngine {
        builder(calls, Arc::new(AtomicU32::new(0))).build()
    }

    fn gate() -> ActivityGate {
        Arc::new(RwLock::new(()))
    }

    fn options(id: &str) -> StartWorkflowOptions {
        StartWorkflowOptions {
            workflow_id: id.to_string(),
            execution_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_activity_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(calls.clone());

        let output = engine
            .shared
            .run_activity("wf", &gate(), "flaky", serde_json::json!({"fail_times": 2}), None)
            .await
            .unwrap();

        assert_eq!(output, serde_json::json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_activity_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(calls.clone());

        let err = engine
            .shared
            .run_activity("wf", &gate(), "flaky", serde_json::json!({"fail_times": 10}), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ActivityFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_activity_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(calls.clone());

        let err = engine
            .shared
            .run_activity("wf", &gate(), "panicking", serde_json::json!(null), None)
            .await
            .unwrap_err();

        match err {
            AppError::ActivityFailed { source, .. } => {
                assert!(matches!(*source, AppError::ActivityPanic { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_signal_sent_before_wait_is_buffered() {
        let engine = engine(Arc::new(AtomicU32::new(0)));

        engine
            .start_workflow(options("wf-1"), "signal-workflow", serde_json::json!(2000))
            .await
            .unwrap();
        engine
            .signal_workflow("wf-1", "go", serde_json::json!("ready"))
            .await
            .unwrap();

        let result = engine.get_result("wf-1").await.unwrap();
        assert_eq!(result, serde_json::json!("ready"));
        assert!(!engine.is_running("wf-1").await);
    }

    #[tokio::test]
    async fn test_signal_timeout_fails_the_workflow() {
        let engine = engine(Arc::new(AtomicU32::new(0)));

        engine
            .start_workflow(options("wf-2"), "signal-workflow", serde_json::json!(10))
            .await
            .unwrap();

        let err = engine.get_result("wf-2").await.unwrap_err();
        assert!(err.to_string().contains("no go signal"));
    }

    #[tokio::test]
    async fn test_duplicate_running_workflow_id_is_rejected() {
        let engine = engine(Arc::new(AtomicU32::new(0)));

        engine
            .start_workflow(options("wf-3"), "signal-workflow", serde_json::json!(2000))
            .await
            .unwrap();
        let err = engine
            .start_workflow(options("wf-3"), "signal-workflow", serde_json::json!(2000))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        engine
            .signal_workflow("wf-3", "go", serde_json::json!("done"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fan_out_reports_every_failure() {
        let engine = engine(Arc::new(AtomicU32::new(0)));

        engine
            .start_workflow(
                options("wf-4"),
                "fan-out",
                serde_json::json!(["good-1", "bad-1", "good-2", "bad-2"]),
            )
            .await
            .unwrap();

        let message = engine.get_result("wf-4").await.unwrap_err().to_string();
        assert!(message.contains("bad-1 rejected"));
        assert!(message.contains("bad-2 rejected"));
    }

    #[tokio::test]
    async fn test_cancel_waits_for_dispatched_activity_and_stops_the_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));
        let engine = builder(calls.clone(), completed.clone()).build();

        engine
            .start_workflow(options("wf-5"), "slow-workflow", serde_json::json!(200))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.cancel_workflow("wf-5").await.unwrap();

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running("wf-5").await);
        let err = engine.get_result("wf-5").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_of_finished_run_keeps_its_result() {
        let engine = engine(Arc::new(AtomicU32::new(0)));

        engine
            .start_workflow(options("wf-6"), "fan-out", serde_json::json!(["good-1"]))
            .await
            .unwrap();
        engine.get_result("wf-6").await.unwrap();
        engine.cancel_workflow("wf-6").await.unwrap();

        assert_eq!(engine.get_result("wf-6").await.unwrap(), serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_oldest_finished_runs_are_evicted() {
        let engine = builder(Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)))
            .finished_run_retention(2)
            .build();

        for id in ["run-1", "run-2", "run-3"] {
            engine
                .start_workflow(options(id), "fan-out", serde_json::json!(["good-1"]))
                .await
                .unwrap();
            engine.get_result(id).await.unwrap();
        }

        assert!(engine.get_result("run-1").await.unwrap_err().is_not_found());
        assert!(engine.get_result("run-2").await.is_ok());
        assert!(engine.get_result("run-3").await.is_ok());
        assert_eq!(engine.shared.runs.read().await.len(), 2);
    }
}
