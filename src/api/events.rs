use axum::extract::{Path, State};
use axum::Json;

use super::AppState;
use crate::domain::EventEnvelope;
use crate::error::AppError;
use crate::orchestration::BatchResult;

/// Apply an ordered batch of envelopes to `stream`.
pub async fn post_events(
    Path(stream): Path<String>,
    State(state): State<AppState>,
    Json(events): Json<Vec<EventEnvelope>>,
) -> Result<Json<BatchResult>, AppError> {
    if stream.trim().is_empty() {
        return Err(AppError::BadRequest("stream is required".to_string()));
    }
    let result = state.ingestor.submit_batch(&stream, events).await?;
    Ok(Json(result))
}
