use axum::{
    Extension, Json,
    extract::{Path, State},
};

use parley_gateway::store::decode_attachment;
use parley_gateway::{ChatError, blocking};
use parley_types::api::{
    BioResponse, Claims, OnlineUsersResponse, ProfilePictureResponse, UpdateBioRequest,
    UpdateDisplayNameRequest, UpdateProfilePictureRequest, UserCountResponse, UserProfileResponse,
};
use parley_types::models::{escape_html, normalize_user_id};

use crate::auth::AppState;
use crate::error::ApiResult;

const MAX_DISPLAY_NAME_CHARS: usize = 50;
const MAX_BIO_CHARS: usize = 500;

async fn load_profile(state: &AppState, user_id: &str) -> ApiResult<UserProfileResponse> {
    let id = user_id.to_string();
    let user = blocking(state.db(), move |db| db.get_user(&id))
        .await?
        .ok_or_else(|| ChatError::not_found("user"))?;
    let online = state.hub.is_online(&user.id).await;

    Ok(UserProfileResponse {
        mobile: user.id,
        display_name: user.display_name,
        bio: user.bio,
        profile_picture: user.profile_picture,
        online,
    })
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserProfileResponse>> {
    Ok(Json(load_profile(&state, &claims.sub).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<UserProfileResponse>> {
    let id = normalize_user_id(&id).ok_or_else(|| ChatError::not_found("user"))?;
    Ok(Json(load_profile(&state, &id).await?))
}

pub async fn online(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        online_users: state.hub.online_users().await,
    })
}

pub async fn count(State(state): State<AppState>) -> ApiResult<Json<UserCountResponse>> {
    let count = blocking(state.db(), |db| db.count_users()).await?;
    Ok(Json(UserCountResponse { count }))
}

pub async fn update_display_name(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateDisplayNameRequest>,
) -> ApiResult<Json<UserProfileResponse>> {
    let name = req.display_name.trim();
    if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ChatError::bad_request("display name must be 1 to 50 characters").into());
    }

    let (id, name) = (claims.sub.clone(), escape_html(name));
    blocking(state.db(), move |db| db.update_display_name(&id, &name)).await?;
    Ok(Json(load_profile(&state, &claims.sub).await?))
}

pub async fn get_bio(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<BioResponse>> {
    let profile = load_profile(&state, &claims.sub).await?;
    Ok(Json(BioResponse { bio: profile.bio }))
}

pub async fn update_bio(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateBioRequest>,
) -> ApiResult<Json<BioResponse>> {
    if req.bio.chars().count() > MAX_BIO_CHARS {
        return Err(ChatError::bad_request("bio must be at most 500 characters").into());
    }

    let bio = escape_html(req.bio.trim());
    let (id, stored) = (claims.sub, bio.clone());
    blocking(state.db(), move |db| db.update_bio(&id, &stored)).await?;
    Ok(Json(BioResponse { bio: Some(bio) }))
}

pub async fn get_picture(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ProfilePictureResponse>> {
    let profile = load_profile(&state, &claims.sub).await?;
    Ok(Json(ProfilePictureResponse {
        profile_picture: profile.profile_picture,
    }))
}

pub async fn update_picture(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfilePictureRequest>,
) -> ApiResult<Json<ProfilePictureResponse>> {
    let picture = req.profile_picture.filter(|p| !p.trim().is_empty());
    if let Some(picture) = &picture {
        decode_attachment(picture, state.max_attachment_bytes())?;
    }

    let (id, stored) = (claims.sub, picture.clone());
    blocking(state.db(), move |db| db.update_profile_picture(&id, stored.as_deref())).await?;
    Ok(Json(ProfilePictureResponse { profile_picture: picture }))
}
