use assetindex::chain::{ContractReader, RpcContractReader};
use assetindex::db::EntityStore;
use assetindex::domain::TemplateKind;
use assetindex::indexer::{EventRouter, SubscriptionRegistry};
use assetindex::orchestration::Ingestor;
use assetindex::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    if let Err(e) = repo
        .seed_subscription(config.deployment_registry, TemplateKind::DeploymentRegistry)
        .await
    {
        eprintln!("Failed to register deployment registry: {}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn EntityStore> = repo.clone();
    let subscriptions = match SubscriptionRegistry::load(store.as_ref()).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to load subscriptions: {}", e);
            std::process::exit(1);
        }
    };

    let reader: Arc<dyn ContractReader> = match RpcContractReader::new(
        config.rpc_url.clone(),
        Duration::from_millis(config.fetch_timeout_ms),
    ) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Failed to create RPC client: {}", e);
            std::process::exit(1);
        }
    };

    let router = Arc::new(EventRouter::new(store, reader, subscriptions));
    let ingestor = Arc::new(Ingestor::new(router, config.ingest_queue_depth));

    // Create router
    let app = api::create_router(api::AppState::new(repo, ingestor, config));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "server listening");

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
