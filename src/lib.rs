//! vmkube - provisioning control plane for Kubernetes clusters on VMs
//!
//! This library provides the cluster lifecycle engine: request preparation,
//! durable create/update/delete workflows driving a virtualization backend
//! and the Kubernetes API, persistence and the HTTP surface.

use std::sync::Arc;

pub mod application;
pub mod config;
pub mod control_plane;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

// Re-export commonly used types
pub use control_plane::ControlPlane;
pub use error::{AppError, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub env: Arc<config::Config>,
    /// Absent when running on the in-memory store
    pub db: Option<Arc<infrastructure::database::DatabaseManager>>,
    pub control_plane: Arc<ControlPlane>,
}
