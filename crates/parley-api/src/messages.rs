use axum::{Extension, Json, extract::State, http::StatusCode};
use tracing::info;

use parley_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiResult;

/// Bulk delete by id. Body is a JSON array of message ids.
pub async fn delete_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(ids): Json<Vec<String>>,
) -> ApiResult<StatusCode> {
    let removed = state.hub.delete_messages(ids, &claims.sub).await?;
    info!("{} deleted {} message(s)", claims.sub, removed);
    Ok(StatusCode::NO_CONTENT)
}
