use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::db::EntityPager;
use crate::domain::{Entity, EntityId, EntityKind};
use crate::error::AppError;
use crate::pagination::fetch_all_many;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesQuery {
    /// One kind or a comma-separated list.
    pub kind: String,
    pub page_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesResponse {
    pub count: usize,
    pub entities: Vec<Entity>,
}

pub(super) fn parse_entity_id(raw: &str) -> Result<EntityId, AppError> {
    EntityId::from_str(raw).map_err(|e| AppError::BadRequest(format!("invalid entity id: {}", e)))
}

fn parse_kinds(raw: &str) -> Result<Vec<EntityKind>, AppError> {
    let kinds = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| EntityKind::from_str(s).map_err(AppError::BadRequest))
        .collect::<Result<Vec<_>, _>>()?;
    if kinds.is_empty() {
        return Err(AppError::BadRequest("kind is required".to_string()));
    }
    Ok(kinds)
}

/// Every entity of the requested kinds, fetched through the kind index.
/// Several kinds are fetched concurrently and returned in request order.
pub async fn list_entities(
    Query(params): Query<EntitiesQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntitiesResponse>, AppError> {
    let kinds = parse_kinds(&params.kind)?;
    let page_size = params.page_size.unwrap_or(state.config.page_size);

    let pagers: Vec<EntityPager> = kinds
        .iter()
        .map(|kind| EntityPager::new(state.repo.clone(), *kind))
        .collect();
    let batches = fetch_all_many(
        pagers,
        page_size,
        &state.config.retry_policy(),
        state.config.query_concurrency,
    )
    .await?;

    let entities: Vec<Entity> = batches.into_iter().flatten().collect();
    Ok(Json(EntitiesResponse {
        count: entities.len(),
        entities,
    }))
}

pub async fn get_entity(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Entity>, AppError> {
    let id = parse_entity_id(&id)?;
    state
        .repo
        .get_entity(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("entity {}", id)))
}
