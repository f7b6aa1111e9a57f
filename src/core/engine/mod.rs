//! Durable-workflow style orchestration engine.
//!
//! Drivers talk to the engine through [`WorkflowClient`]; workflows and
//! activities are registered with a [`LocalWorkflowEngineBuilder`].

pub mod activity;
pub mod local;
pub mod retry;
pub mod workflow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

pub use activity::{Activity, ActivityRegistry};
pub use local::{LocalWorkflowEngine, LocalWorkflowEngineBuilder, DEFAULT_FINISHED_RUN_RETENTION};
pub use retry::{ActivityOptions, RetryPolicy};
pub use workflow::{join_activities, Workflow, WorkflowContext, WorkflowRegistry};

#[derive(Debug, Clone)]
pub struct StartWorkflowOptions {
    /// Caller-chosen id; at most one run per id may be in flight
    pub workflow_id: String,
    pub execution_timeout: Duration,
}

/// Handle of a started workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub run_id: String,
}

/// Client side of the workflow engine
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowRun>;

    /// Deliver a named signal to a running workflow. Signals are buffered
    /// until the workflow waits for them.
    async fn signal_workflow(
        &self,
        workflow_id: &str,
        signal: &str,
        payload: serde_json::Value,
    ) -> Result<()>;

    /// Stop a running workflow. Returns once the run and every activity it
    /// already dispatched have stopped; a finished run is left as is.
    async fn cancel_workflow(&self, workflow_id: &str) -> Result<()>;

    /// Wait for the run to finish and return its output
    async fn get_result(&self, workflow_id: &str) -> Result<serde_json::Value>;
}
