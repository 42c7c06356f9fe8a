use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::StatusRow;
use parley_gateway::store::decode_attachment;
use parley_gateway::{ChatError, blocking};
use parley_types::api::{Claims, CreateStatusRequest, StatusResponse, UserStatusesResponse};
use parley_types::models::escape_html;
use parley_types::now_millis;

use crate::auth::AppState;
use crate::error::ApiResult;

/// Statuses disappear a day after posting.
pub const STATUS_TTL_MS: i64 = 24 * 60 * 60 * 1000;

fn status_response(row: StatusRow, viewers: Vec<String>, caller: &str) -> StatusResponse {
    let is_owner = row.user_id == caller;
    StatusResponse {
        viewed: is_owner || viewers.iter().any(|v| v == caller),
        view_count: viewers.len(),
        viewed_by: if is_owner { viewers } else { Vec::new() },
        id: row.id,
        user_mobile: row.user_id,
        user_name: row.user_name,
        content: row.content,
        image_base64: row.image_base64,
        image_type: row.image_type,
        created_at: row.created_at,
        expires_at: row.expires_at,
    }
}

async fn with_viewers(state: &AppState, rows: Vec<StatusRow>, caller: &str) -> ApiResult<Vec<StatusResponse>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut viewers = blocking(state.db(), move |db| db.status_viewers(&ids)).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let seen_by = viewers.remove(&row.id).unwrap_or_default();
            status_response(row, seen_by, caller)
        })
        .collect())
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = req.content.as_deref().map(str::trim).filter(|c| !c.is_empty()).map(escape_html);
    let image = req.image_base64.filter(|i| !i.trim().is_empty());
    if content.is_none() && image.is_none() {
        return Err(ChatError::bad_request("a status needs content or an image").into());
    }
    if let Some(image) = &image {
        decode_attachment(image, state.max_attachment_bytes())?;
    }

    let user = claims.sub.clone();
    let user_name = blocking(state.db(), move |db| db.get_user(&user))
        .await?
        .map(|u| u.display_name)
        .unwrap_or_else(|| claims.name.clone());

    let now = now_millis();
    let row = StatusRow {
        id: Uuid::new_v4().to_string(),
        user_id: claims.sub.clone(),
        user_name,
        content,
        image_type: image.as_ref().and(req.image_type),
        image_base64: image,
        created_at: now,
        expires_at: now + STATUS_TTL_MS,
    };

    let stored = row.clone();
    blocking(state.db(), move |db| db.insert_status(&stored)).await?;
    Ok((StatusCode::CREATED, Json(status_response(row, Vec::new(), &claims.sub))))
}

/// Active statuses grouped by owner: the caller's first, then others by
/// their newest status.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<UserStatusesResponse>>> {
    let rows = blocking(state.db(), |db| db.active_statuses(now_millis())).await?;
    let statuses = with_viewers(&state, rows, &claims.sub).await?;

    // Rows arrive newest first, so first-seen order is recency order.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, UserStatusesResponse> = HashMap::new();
    for status in statuses {
        let entry = grouped.entry(status.user_mobile.clone()).or_insert_with(|| {
            order.push(status.user_mobile.clone());
            UserStatusesResponse {
                user_mobile: status.user_mobile.clone(),
                user_name: status.user_name.clone(),
                is_own: status.user_mobile == claims.sub,
                statuses: Vec::new(),
            }
        });
        entry.statuses.push(status);
    }

    order.sort_by_key(|user| *user != claims.sub);
    Ok(Json(order.into_iter().filter_map(|user| grouped.remove(&user)).collect()))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<StatusResponse>>> {
    let user = claims.sub.clone();
    let rows = blocking(state.db(), move |db| db.active_statuses_for_user(&user, now_millis())).await?;
    Ok(Json(with_viewers(&state, rows, &claims.sub).await?))
}

pub async fn view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let viewer = claims.sub;
    let found = blocking(state.db(), move |db| {
        let now = now_millis();
        match db.get_status(&id)? {
            Some(status) if status.expires_at > now => {
                if status.user_id != viewer {
                    db.add_status_viewer(&id, &viewer, now)?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    })
    .await?;

    if !found {
        return Err(ChatError::not_found("status").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let lookup = id.clone();
    let status = blocking(state.db(), move |db| db.get_status(&lookup))
        .await?
        .ok_or_else(|| ChatError::not_found("status"))?;
    if status.user_id != claims.sub {
        return Err(ChatError::forbidden("only the owner can delete a status").into());
    }

    blocking(state.db(), move |db| db.delete_status(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::{request, signup_user, test_app};

    #[tokio::test]
    async fn statuses_are_grouped_with_own_first() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;

        let (status, _) =
            request(&app, Method::POST, "/api/status", Some(&alice), Some(json!({"content": "morning"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, bobs) =
            request(&app, Method::POST, "/api/status", Some(&bob), Some(json!({"content": "evening"}))).await;

        let (_, feed) = request(&app, Method::GET, "/api/status", Some(&bob), None).await;
        assert_eq!(feed[0]["userMobile"], "222222");
        assert_eq!(feed[0]["isOwn"], true);
        assert_eq!(feed[1]["statuses"][0]["content"], "morning");
        assert_eq!(feed[1]["statuses"][0]["viewed"], false);

        let view_uri = format!("/api/status/{}/view", bobs["id"].as_str().unwrap());
        let (status, _) = request(&app, Method::POST, &view_uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        request(&app, Method::POST, &view_uri, Some(&alice), None).await;

        let (_, mine) = request(&app, Method::GET, "/api/status/my", Some(&bob), None).await;
        assert_eq!(mine[0]["viewCount"], 1);
        assert_eq!(mine[0]["viewedBy"], json!(["111111"]));
    }

    #[tokio::test]
    async fn empty_status_is_rejected() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let (status, _) = request(&app, Method::POST, "/api/status", Some(&alice), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn only_owner_can_delete() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;
        let (_, created) =
            request(&app, Method::POST, "/api/status", Some(&alice), Some(json!({"content": "hi"}))).await;
        let uri = format!("/api/status/{}", created["id"].as_str().unwrap());

        let (status, _) = request(&app, Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = request(&app, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = request(&app, Method::POST, &format!("{}/view", uri), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
