//! Core domain logic of the control plane
//!
//! Request preparation, node templating and pool diffing feed the drivers,
//! which start durable workflows built from idempotent activities on the
//! workflow engine.

// Workflow engine
pub mod engine;

// Activities and the workflows composed from them
pub mod activities;
pub mod workflows;

// Synchronous lifecycle entry points
pub mod drivers;

pub mod diff;
pub mod events;
pub mod logging;
pub mod node_template;
pub mod preparer;
pub mod traits;

pub use drivers::{ClusterCreator, ClusterDeleter, ClusterSignaler, ClusterUpdater};
pub use engine::{LocalWorkflowEngine, WorkflowClient};
pub use events::{ClusterEvent, ClusterEventBus};
