use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;

use super::entities::parse_entity_id;
use super::AppState;
use crate::domain::{BlockTime, Interval, TimeSeries};
use crate::error::AppError;
use crate::stats::{Distribution, SeriesQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesParams {
    pub from: i64,
    pub to: i64,
    pub interval: String,
    #[serde(default)]
    pub dense: bool,
}

pub async fn get_series(
    Path(id): Path<String>,
    Query(params): Query<SeriesParams>,
    State(state): State<AppState>,
) -> Result<Json<TimeSeries>, AppError> {
    let entity = parse_entity_id(&id)?;
    let interval = Interval::from_str(&params.interval).map_err(AppError::BadRequest)?;

    if state.repo.get_entity(&entity).await?.is_none() {
        return Err(AppError::NotFound(format!("entity {}", entity)));
    }

    let series = state
        .series
        .query_series(&SeriesQuery {
            entity,
            from: BlockTime::new(params.from),
            to: BlockTime::new(params.to),
            interval,
            dense: params.dense,
        })
        .await?;
    Ok(Json(series))
}

pub async fn get_distribution(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Distribution>, AppError> {
    let entity = parse_entity_id(&id)?;
    Ok(Json(state.distributions.query(&entity).await?))
}
