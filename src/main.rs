use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use vmkube::config::Config;
use vmkube::core::activities::ActivityDependencies;
use vmkube::core::logging::init_logging_with_format;
use vmkube::core::traits::{KubernetesApi, SecretStore};
use vmkube::domain::repositories::ClusterStore;
use vmkube::infrastructure::database::DatabaseManager;
use vmkube::infrastructure::repositories::{InMemoryClusterStore, MongoClusterStore};
use vmkube::infrastructure::sandbox::{
    SandboxChartDeployer, SandboxKubernetes, SandboxOidcClientManager, SandboxSecretStore,
    SandboxVirtualization,
};
use vmkube::infrastructure::KubeClusterApi;
use vmkube::presentation::app_router;
use vmkube::{AppState, ControlPlane};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init().context("failed to load configuration")?;
    init_logging_with_format(&config.log_format).context("failed to initialize logging")?;

    let secrets: Arc<dyn SecretStore> = Arc::new(SandboxSecretStore::new());

    let (db, store, kubernetes): (Option<Arc<DatabaseManager>>, Arc<dyn ClusterStore>, Arc<dyn KubernetesApi>) =
        if config.sandbox {
            info!("Running with the in-memory store and sandbox backends");
            (
                None,
                Arc::new(InMemoryClusterStore::new()),
                Arc::new(SandboxKubernetes::new()),
            )
        } else {
            let db = DatabaseManager::new(&config.mongodb_uri, &config.mongodb_database)
                .await
                .context("failed to connect to MongoDB")?;
            let store = MongoClusterStore::new(&db.database)
                .await
                .context("failed to initialize the cluster store")?;
            (
                Some(Arc::new(db)),
                Arc::new(store),
                Arc::new(KubeClusterApi::new(secrets.clone())),
            )
        };

    let deps = ActivityDependencies {
        store,
        virtualization: Arc::new(SandboxVirtualization::new()),
        kubernetes,
        secrets,
        charts: Arc::new(SandboxChartDeployer::new()),
        oidc: Arc::new(SandboxOidcClientManager::new()),
    };

    let state = AppState {
        env: Arc::new(config.clone()),
        db,
        control_plane: Arc::new(ControlPlane::new(&config, deps)),
    };
    let app = app_router(state);

    info!(port = config.port, database = %config.mongodb_database, "Server started");
    println!("🚀 vmkube control plane listening on port {}", config.port);
    println!("📊 Health check: http://localhost:{}/api/healthchecker", config.port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
