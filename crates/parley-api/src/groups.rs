use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::models::GroupRow;
use parley_gateway::{ChatError, blocking};
use parley_types::api::{AddMemberRequest, Claims, CreateGroupRequest, GroupResponse};
use parley_types::models::{Group, escape_html};
use parley_types::now_millis;

use crate::auth::{AppState, parse_user_id};
use crate::error::ApiResult;

const MAX_GROUP_NAME_CHARS: usize = 100;

fn group_response(group: Group) -> GroupResponse {
    GroupResponse {
        id: group.id,
        name: group.name,
        description: group.description,
        admin_mobile: group.creator,
        members: group.members,
        created_at: group.created_at,
        last_message_at: group.last_message_at,
        last_message_preview: group.last_message_preview,
        last_message_sender_name: group.last_message_sender,
    }
}

fn group_from_row(row: GroupRow, members: Vec<String>) -> Group {
    Group {
        id: row.id,
        name: row.name,
        description: row.description,
        creator: row.creator,
        members,
        created_at: row.created_at,
        last_message_at: row.last_message_at,
        last_message_preview: row.last_message_preview,
        last_message_sender: row.last_message_sender,
    }
}

async fn load_group(state: &AppState, id: &str) -> ApiResult<Group> {
    let id = id.to_string();
    let group = blocking(state.db(), move |db| {
        let Some(row) = db.get_group(&id)? else {
            return Ok(None);
        };
        let members = db.group_members(&id)?;
        Ok(Some(group_from_row(row, members)))
    })
    .await?;
    group.ok_or_else(|| ChatError::not_found("group").into())
}

/// Load a group the caller belongs to.
async fn member_group(state: &AppState, id: &str, caller: &str) -> ApiResult<Group> {
    let group = load_group(state, id).await?;
    if !group.is_member(caller) {
        return Err(ChatError::forbidden("not a member of this group").into());
    }
    Ok(group)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_CHARS {
        return Err(ChatError::bad_request("group name must be 1 to 100 characters").into());
    }

    let mut members = Vec::with_capacity(req.members.len());
    for raw in &req.members {
        let id = parse_user_id(raw)?;
        if id != claims.sub && !members.contains(&id) {
            members.push(id);
        }
    }

    let now = now_millis();
    let row = GroupRow {
        id: Uuid::new_v4().to_string(),
        name: escape_html(name),
        description: req
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(escape_html),
        creator: claims.sub.clone(),
        created_at: now,
        last_message_at: now,
        last_message_preview: None,
        last_message_sender: None,
    };

    let (stored, wanted) = (row.clone(), members.clone());
    let missing = blocking(state.db(), move |db| {
        for id in &wanted {
            if !db.user_exists(id)? {
                return Ok(Some(id.clone()));
            }
        }
        db.create_group(&stored, &wanted)?;
        Ok(None)
    })
    .await?;
    if let Some(id) = missing {
        return Err(ChatError::NotFound(format!("user {} not found", id)).into());
    }

    info!("{} created group {} with {} member(s)", claims.sub, row.id, members.len() + 1);
    let group = load_group(&state, &row.id).await?;
    Ok((StatusCode::CREATED, Json(group_response(group))))
}

/// Groups the caller belongs to, most recent activity first.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<GroupResponse>>> {
    let user = claims.sub.clone();
    let groups = blocking(state.db(), move |db| {
        let mut groups = Vec::new();
        for row in db.groups_for_user(&user)? {
            let members = db.group_members(&row.id)?;
            groups.push(group_from_row(row, members));
        }
        Ok(groups)
    })
    .await?;

    Ok(Json(groups.into_iter().map(group_response).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<GroupResponse>> {
    Ok(Json(group_response(member_group(&state, &id, &claims.sub).await?)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<Json<GroupResponse>> {
    member_group(&state, &id, &claims.sub).await?;
    let new_member = parse_user_id(&req.mobile)?;

    let (group_id, user) = (id.clone(), new_member.clone());
    let added = blocking(state.db(), move |db| {
        if !db.user_exists(&user)? {
            return Ok(None);
        }
        db.add_group_member(&group_id, &user, now_millis()).map(Some)
    })
    .await?;

    match added {
        None => return Err(ChatError::not_found("user").into()),
        Some(false) => return Err(ChatError::Conflict("already a member".into()).into()),
        Some(true) => info!("{} added {} to group {}", claims.sub, new_member, id),
    }

    Ok(Json(group_response(load_group(&state, &id).await?)))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    member_group(&state, &id, &claims.sub).await?;

    let (group_id, user) = (id.clone(), claims.sub.clone());
    blocking(state.db(), move |db| db.remove_group_member(&group_id, &user)).await?;
    info!("{} left group {}", claims.sub, id);
    Ok(StatusCode::NO_CONTENT)
}
