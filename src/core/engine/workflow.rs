//! Workflows and the context they run in.
//!
//! Workflow code never touches the outside world directly: clocks, random
//! numbers and I/O are delegated to activities. The only suspension points
//! are activities, child workflows, timers and signals, all reached through
//! [`WorkflowContext`].

use async_trait::async_trait;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use super::local::{ActivityGate, EngineShared};
use super::retry::ActivityOptions;
use crate::error::{AppError, Result};

#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    fn name(&self) -> &'static str;

    async fn run(&self, ctx: WorkflowContext, input: Self::Input) -> Result<Self::Output>;
}

#[async_trait]
pub(crate) trait ErasedWorkflow: Send + Sync {
    async fn run_json(&self, ctx: WorkflowContext, input: serde_json::Value) -> Result<serde_json::Value>;
}

struct WorkflowAdapter<W>(W);

#[async_trait]
impl<W: Workflow> ErasedWorkflow for WorkflowAdapter<W> {
    async fn run_json(&self, ctx: WorkflowContext, input: serde_json::Value) -> Result<serde_json::Value> {
        let input: W::Input = serde_json::from_value(input)?;
        let output = self.0.run(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<&'static str, Arc<dyn ErasedWorkflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: Workflow>(&mut self, workflow: W) {
        self.workflows
            .insert(workflow.name(), Arc::new(WorkflowAdapter(workflow)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn ErasedWorkflow>> {
        self.workflows.get(name).cloned()
    }
}

/// Buffered, named signals delivered to one workflow run.
#[derive(Default)]
pub(crate) struct SignalMailbox {
    pending: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    notify: Notify,
}

impl SignalMailbox {
    pub(crate) fn deliver(&self, name: &str, payload: serde_json::Value) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.entry(name.to_string()).or_default().push_back(payload);
        }
        self.notify.notify_waiters();
    }

    fn take(&self, name: &str) -> Option<serde_json::Value> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get_mut(name).and_then(VecDeque::pop_front)
    }

    async fn receive(&self, name: &str) -> serde_json::Value {
        loop {
            // Registered before checking the queue so a concurrent delivery
            // cannot slip between the check and the wait.
            let notified = self.notify.notified();
            if let Some(payload) = self.take(name) {
                return payload;
            }
            notified.await;
        }
    }
}

/// Handle a running workflow uses to reach activities, children, timers
/// and signals.
#[derive(Clone)]
pub struct WorkflowContext {
    shared: Arc<EngineShared>,
    workflow_id: String,
    options: Option<ActivityOptions>,
    mailbox: Arc<SignalMailbox>,
    /// Shared with child workflows so cancelling the run drains theirs too
    activities: ActivityGate,
}

impl WorkflowContext {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        workflow_id: String,
        mailbox: Arc<SignalMailbox>,
        activities: ActivityGate,
    ) -> Self {
        Self {
            shared,
            workflow_id,
            options: None,
            mailbox,
            activities,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// A context whose activities run with `options` instead of the defaults
    pub fn with_options(&self, options: ActivityOptions) -> Self {
        Self {
            options: Some(options),
            ..self.clone()
        }
    }

    /// Invoke a registered activity and wait for its result, retrying per
    /// its policy.
    pub async fn execute_activity<I, O>(&self, name: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = serde_json::to_value(input)?;
        let output = self
            .shared
            .run_activity(&self.workflow_id, &self.activities, name, input, self.options.as_ref())
            .await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Run a registered workflow as a child of this one and wait for it
    pub async fn execute_child_workflow<I, O>(&self, name: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let workflow = self.shared.workflows.get(name).ok_or_else(|| {
            AppError::InternalServerError(format!("workflow {} is not registered", name))
        })?;
        let child_id = format!("{}/{}-{}", self.workflow_id, name, uuid::Uuid::new_v4());
        debug!(
            workflow_id = %self.workflow_id,
            child_workflow_id = %child_id,
            "Starting child workflow"
        );

        let child = WorkflowContext::new(
            self.shared.clone(),
            child_id,
            Arc::new(SignalMailbox::default()),
            self.activities.clone(),
        );
        let output = workflow.run_json(child, serde_json::to_value(input)?).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Wait for the named signal. Returns `None` when the timer fires first.
    pub async fn receive_signal<T: DeserializeOwned>(&self, name: &str, timeout: Duration) -> Result<Option<T>> {
        match tokio::time::timeout(timeout, self.mailbox.receive(name)).await {
            Ok(payload) => Ok(Some(serde_json::from_value(payload)?)),
            Err(_) => Ok(None),
        }
    }

    /// Durable timer
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Await every future of a fan-out and combine all errors into one.
///
/// Unlike `try_join_all` nothing is short-circuited, so a partial failure
/// reports each failing item.
pub async fn join_activities<T, F>(futures: impl IntoIterator<Item = F>) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    let mut values = Vec::new();
    let mut errors = Vec::new();

    for result in join_all(futures).await {
        match result {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }

    match AppError::combine(errors) {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
