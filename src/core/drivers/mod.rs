//! Synchronous entry points of the cluster lifecycle.
//!
//! A driver validates the request, persists the initial state, takes the
//! cluster's workflow lock and starts the workflow. It never waits for the
//! workflow to finish.

pub mod creator;
pub mod deleter;
pub mod signaler;
pub mod updater;

use std::time::Duration;

pub use creator::ClusterCreator;
pub use deleter::ClusterDeleter;
pub use signaler::ClusterSignaler;
pub use updater::ClusterUpdater;

use crate::domain::entities::Placement;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Placement of clusters that do not name their own
    pub default_placement: Placement,
    pub master_ready_timeout: Duration,
    pub workflow_execution_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            default_placement: Placement::default(),
            master_ready_timeout: Duration::from_secs(60 * 60),
            workflow_execution_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}
