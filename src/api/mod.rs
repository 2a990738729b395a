pub mod entities;
pub mod events;
pub mod health;
pub mod stats;

use crate::config::Config;
use crate::db::Repository;
use crate::orchestration::Ingestor;
use crate::stats::{DistributionService, SeriesAggregator};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub ingestor: Arc<Ingestor>,
    pub series: Arc<SeriesAggregator>,
    pub distributions: Arc<DistributionService>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, ingestor: Arc<Ingestor>, config: Config) -> Self {
        let policy = config.retry_policy();
        Self {
            series: Arc::new(SeriesAggregator::new(
                repo.clone(),
                config.page_size,
                policy.clone(),
            )),
            distributions: Arc::new(DistributionService::new(
                repo.clone(),
                config.page_size,
                policy,
            )),
            repo,
            ingestor,
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/entities", get(entities::list_entities))
        .route("/v1/entities/:id", get(entities::get_entity))
        .route("/v1/stats/:id/series", get(stats::get_series))
        .route("/v1/stats/:id/distribution", get(stats::get_distribution))
        .route("/v1/events/:stream", post(events::post_events))
        .layer(cors)
        .with_state(state)
}
