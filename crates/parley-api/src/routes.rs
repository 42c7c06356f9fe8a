use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{community, conversations, groups, messages, status, users};

/// JSON envelope allowance on top of a base64-encoded attachment.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Every REST route. Everything except signup and login sits behind
/// [`require_auth`].
pub fn api_router(state: AppState) -> Router {
    let body_limit = state.max_attachment_bytes().div_ceil(3) * 4 + BODY_OVERHEAD_BYTES;

    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        // Users
        .route("/api/users/me", get(users::me))
        .route("/api/users/online", get(users::online))
        .route("/api/users/count", get(users::count))
        .route("/api/users/profile", put(users::update_display_name))
        .route("/api/users/profile/picture", get(users::get_picture).put(users::update_picture))
        .route("/api/users/profile/bio", get(users::get_bio).put(users::update_bio))
        .route("/api/users/profile/{id}", get(users::profile))
        // Conversations
        .route("/api/conversations", get(conversations::list).post(conversations::create))
        .route("/api/conversations/{id}", get(conversations::get).delete(conversations::remove))
        .route(
            "/api/conversations/{id}/messages",
            get(conversations::history).post(conversations::send),
        )
        .route("/api/conversations/{id}/read", post(conversations::mark_read))
        .route("/api/messages", delete(messages::delete_messages))
        // Groups
        .route("/api/groups", get(groups::list).post(groups::create))
        .route("/api/groups/{id}", get(groups::get))
        .route("/api/groups/{id}/members", post(groups::add_member))
        .route("/api/groups/{id}/members/me", delete(groups::leave))
        // Status
        .route("/api/status", get(status::list).post(status::create))
        .route("/api/status/my", get(status::mine))
        .route("/api/status/{id}/view", post(status::view))
        .route("/api/status/{id}", delete(status::remove))
        // Community
        .route("/api/community", get(community::list).post(community::create))
        .route("/api/community/{id}/like", post(community::like))
        .route("/api/community/{id}/comment", post(community::comment))
        .route("/api/community/{id}", delete(community::remove))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
}
