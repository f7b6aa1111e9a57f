//! In-memory backends for local runs and tests.
//!
//! Each backend keeps its state behind a tokio lock and exposes a
//! [`FailureInjector`] so callers can make individual operations fail for
//! a given target a fixed number of times.

pub mod charts;
pub mod kubernetes;
pub mod secrets;
pub mod virtualization;

use std::collections::HashMap;
use tokio::sync::Mutex;

pub use charts::{SandboxChartDeployer, SandboxOidcClientManager};
pub use kubernetes::SandboxKubernetes;
pub use secrets::SandboxSecretStore;
pub use virtualization::{SandboxVirtualization, SandboxVm};

/// Matches every target of an operation
pub const ANY_TARGET: &str = "*";

#[derive(Debug, Default)]
pub struct FailureInjector {
    rules: Mutex<HashMap<(String, String), u32>>,
}

impl FailureInjector {
    /// Fail the next `times` calls of `operation` on `target`
    pub async fn fail(&self, operation: &str, target: &str, times: u32) {
        self.rules
            .lock()
            .await
            .insert((operation.to_string(), target.to_string()), times);
    }

    pub async fn fail_always(&self, operation: &str, target: &str) {
        self.fail(operation, target, u32::MAX).await;
    }

    pub async fn clear(&self) {
        self.rules.lock().await.clear();
    }

    /// Consume one failure for the call, if a rule matches
    pub(crate) async fn should_fail(&self, operation: &str, target: &str) -> bool {
        let mut rules = self.rules.lock().await;
        for key in [
            (operation.to_string(), target.to_string()),
            (operation.to_string(), ANY_TARGET.to_string()),
        ] {
            if let Some(remaining) = rules.get_mut(&key) {
                if *remaining == 0 {
                    continue;
                }
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failures_are_consumed() {
        let failures = FailureInjector::default();
        failures.fail("clone_vm", "node-1", 2).await;

        assert!(failures.should_fail("clone_vm", "node-1").await);
        assert!(failures.should_fail("clone_vm", "node-1").await);
        assert!(!failures.should_fail("clone_vm", "node-1").await);
        assert!(!failures.should_fail("clone_vm", "node-2").await);
    }

    #[tokio::test]
    async fn test_wildcard_target_matches_everything() {
        let failures = FailureInjector::default();
        failures.fail_always("destroy_vm", ANY_TARGET).await;

        for _ in 0..5 {
            assert!(failures.should_fail("destroy_vm", "anything").await);
        }
        failures.clear().await;
        assert!(!failures.should_fail("destroy_vm", "anything").await);
    }
}
