//! Wiring of the workflow engine, activities and drivers.

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::core::activities::{register_activities, ActivityDependencies};
use crate::core::drivers::{ClusterCreator, ClusterDeleter, ClusterSignaler, ClusterUpdater, DriverSettings};
use crate::core::engine::{LocalWorkflowEngine, WorkflowClient};
use crate::core::events::ClusterEventBus;
use crate::core::node_template::NodeTemplateFactory;
use crate::core::preparer::ClusterPreparer;
use crate::core::workflows::register_workflows;
use crate::domain::repositories::ClusterStore;

/// The cluster lifecycle control plane
pub struct ControlPlane {
    pub store: Arc<dyn ClusterStore>,
    pub engine: LocalWorkflowEngine,
    pub events: ClusterEventBus,
    pub creator: ClusterCreator,
    pub updater: ClusterUpdater,
    pub deleter: ClusterDeleter,
    pub signaler: ClusterSignaler,
}

impl ControlPlane {
    pub fn new(config: &Config, deps: ActivityDependencies) -> Self {
        let settings = DriverSettings {
            default_placement: config.default_placement(),
            master_ready_timeout: config.master_ready_timeout(),
            ..DriverSettings::default()
        };
        Self::with_settings(config, deps, settings)
    }

    pub fn with_settings(config: &Config, deps: ActivityDependencies, settings: DriverSettings) -> Self {
        let builder = LocalWorkflowEngine::builder()
            .workers(config.activity_workers)
            .default_activity_options(config.activity_options());
        let engine = register_workflows(register_activities(builder, &deps)).build();
        let client: Arc<dyn WorkflowClient> = Arc::new(engine.clone());
        let events = ClusterEventBus::default();

        let preparer = || ClusterPreparer::new(deps.secrets.clone(), config.platform_max_ram_mib);
        let templates = || NodeTemplateFactory::new(config.pipeline_url.clone(), deps.secrets.clone());

        let creator = ClusterCreator::new(
            deps.store.clone(),
            deps.secrets.clone(),
            client.clone(),
            preparer(),
            templates(),
            settings.clone(),
        );
        let updater = ClusterUpdater::new(
            deps.store.clone(),
            client.clone(),
            preparer(),
            templates(),
            settings.clone(),
        );
        let deleter = ClusterDeleter::new(deps.store.clone(), client.clone(), events.clone(), settings);
        let signaler = ClusterSignaler::new(deps.store.clone(), deps.secrets.clone(), client);

        info!(workers = config.activity_workers, "Control plane initialized");

        Self {
            store: deps.store,
            engine,
            events,
            creator,
            updater,
            deleter,
            signaler,
        }
    }
}
