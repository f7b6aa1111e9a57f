//! Activities: minimal, independently retryable units of external work.
//!
//! Activities are registered by name and invoked from workflows with a JSON
//! payload, so workflows depend on the input/output types only, never on the
//! concrete activity and its collaborators.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::retry::ActivityOptions;
use crate::error::Result;

#[async_trait]
pub trait Activity: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    /// Name under which workflows invoke the activity
    fn name(&self) -> &'static str;

    async fn execute(&self, input: Self::Input) -> Result<Self::Output>;

    /// Options overriding the engine defaults for this activity
    fn options(&self) -> Option<ActivityOptions> {
        None
    }
}

#[async_trait]
pub(crate) trait ErasedActivity: Send + Sync {
    async fn execute_json(&self, input: serde_json::Value) -> Result<serde_json::Value>;
}

struct ActivityAdapter<A>(A);

#[async_trait]
impl<A: Activity> ErasedActivity for ActivityAdapter<A> {
    async fn execute_json(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        let input: A::Input = serde_json::from_value(input)?;
        let output = self.0.execute(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

pub(crate) struct RegisteredActivity {
    pub(crate) handler: Arc<dyn ErasedActivity>,
    pub(crate) options: Option<ActivityOptions>,
}

#[derive(Default)]
pub struct ActivityRegistry {
    activities: HashMap<&'static str, RegisteredActivity>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Activity>(&mut self, activity: A) {
        let name = activity.name();
        let options = activity.options();
        self.activities.insert(
            name,
            RegisteredActivity {
                handler: Arc::new(ActivityAdapter(activity)),
                options,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegisteredActivity> {
        self.activities.get(name)
    }
}
