use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::models::{CommentRow, PostRow};
use parley_gateway::store::decode_attachment;
use parley_gateway::{ChatError, blocking};
use parley_types::api::{
    AddCommentRequest, Claims, CommentResponse, CommunityPostResponse, CreatePostRequest, LikeResponse,
};
use parley_types::models::escape_html;
use parley_types::now_millis;

use crate::auth::AppState;
use crate::error::ApiResult;

const MAX_POST_CHARS: usize = 2000;
const MAX_COMMENT_CHARS: usize = 500;

fn comment_response(row: CommentRow) -> CommentResponse {
    CommentResponse {
        author_mobile: row.author_id,
        author_name: row.author_name,
        content: row.content,
        created_at: row.created_at,
    }
}

fn post_response(row: PostRow, likes: Vec<String>, comments: Vec<CommentRow>) -> CommunityPostResponse {
    CommunityPostResponse {
        id: row.id,
        author_mobile: row.author_id,
        author_name: row.author_name,
        content: row.content,
        image_base64: row.image_base64,
        image_type: row.image_type,
        created_at: row.created_at,
        likes,
        comments: comments.into_iter().map(comment_response).collect(),
    }
}

async fn author_name(state: &AppState, claims: &Claims) -> ApiResult<String> {
    let id = claims.sub.clone();
    let name = blocking(state.db(), move |db| db.get_user(&id)).await?.map(|u| u.display_name);
    Ok(name.unwrap_or_else(|| claims.name.clone()))
}

async fn ensure_post(state: &AppState, id: &str) -> ApiResult<PostRow> {
    let id = id.to_string();
    let post = blocking(state.db(), move |db| db.get_post(&id)).await?;
    post.ok_or_else(|| ChatError::not_found("post").into())
}

/// The whole feed, newest first, with likes and comments attached.
pub async fn list(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<Vec<CommunityPostResponse>>> {
    let posts = blocking(state.db(), |db| {
        let posts = db.list_posts()?;
        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let mut likes = db.likes_for_posts(&ids)?;
        let mut comments = db.comments_for_posts(&ids)?;
        Ok(posts
            .into_iter()
            .map(|post| {
                let liked_by = likes.remove(&post.id).unwrap_or_default();
                let thread = comments.remove(&post.id).unwrap_or_default();
                post_response(post, liked_by, thread)
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(posts))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = req.content.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if content.is_some_and(|c| c.chars().count() > MAX_POST_CHARS) {
        return Err(ChatError::bad_request("post must be at most 2000 characters").into());
    }
    let image = req.image_base64.filter(|i| !i.trim().is_empty());
    if content.is_none() && image.is_none() {
        return Err(ChatError::bad_request("a post needs content or an image").into());
    }
    if let Some(image) = &image {
        decode_attachment(image, state.max_attachment_bytes())?;
    }

    let row = PostRow {
        id: Uuid::new_v4().to_string(),
        author_id: claims.sub.clone(),
        author_name: author_name(&state, &claims).await?,
        content: content.map(escape_html),
        image_type: image.as_ref().and(req.image_type),
        image_base64: image,
        created_at: now_millis(),
    };

    let stored = row.clone();
    blocking(state.db(), move |db| db.insert_post(&stored)).await?;
    info!("{} posted {}", claims.sub, row.id);
    Ok((StatusCode::CREATED, Json(post_response(row, Vec::new(), Vec::new()))))
}

pub async fn like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<LikeResponse>> {
    ensure_post(&state, &id).await?;

    let (liked, like_count) =
        blocking(state.db(), move |db| db.toggle_post_like(&id, &claims.sub, now_millis())).await?;
    Ok(Json(LikeResponse { liked, like_count }))
}

pub async fn comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = req.content.trim();
    if content.is_empty() || content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ChatError::bad_request("comment must be 1 to 500 characters").into());
    }
    ensure_post(&state, &id).await?;

    let row = CommentRow {
        id: Uuid::new_v4().to_string(),
        post_id: id,
        author_id: claims.sub.clone(),
        author_name: author_name(&state, &claims).await?,
        content: escape_html(content),
        created_at: now_millis(),
    };

    let stored = row.clone();
    blocking(state.db(), move |db| db.insert_comment(&stored)).await?;
    Ok((StatusCode::CREATED, Json(comment_response(row))))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let post = ensure_post(&state, &id).await?;
    if post.author_id != claims.sub {
        return Err(ChatError::forbidden("only the author can delete a post").into());
    }

    blocking(state.db(), move |db| db.delete_post(&id)).await?;
    info!("{} deleted post {}", claims.sub, post.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_support::{request, signup_user, test_app};

    #[tokio::test]
    async fn likes_toggle_and_comments_attach() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;

        let (status, post) =
            request(&app, Method::POST, "/api/community", Some(&alice), Some(json!({"content": "a & b"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(post["content"], "a &amp; b");
        let id = post["id"].as_str().unwrap().to_string();

        let like_uri = format!("/api/community/{}/like", id);
        let (_, body) = request(&app, Method::POST, &like_uri, Some(&bob), None).await;
        assert_eq!(body, json!({"liked": true, "likeCount": 1}));
        let (_, body) = request(&app, Method::POST, &like_uri, Some(&alice), None).await;
        assert_eq!(body["likeCount"], 2);
        let (_, body) = request(&app, Method::POST, &like_uri, Some(&bob), None).await;
        assert_eq!(body, json!({"liked": false, "likeCount": 1}));

        let comment_uri = format!("/api/community/{}/comment", id);
        let (status, comment) =
            request(&app, Method::POST, &comment_uri, Some(&bob), Some(json!({"content": "nice"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(comment["authorName"], "user 222222");

        let (_, feed) = request(&app, Method::GET, "/api/community", Some(&bob), None).await;
        assert_eq!(feed[0]["likes"], json!(["111111"]));
        assert_eq!(feed[0]["comments"][0]["content"], "nice");
    }

    #[tokio::test]
    async fn only_author_can_delete() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;
        let (_, post) =
            request(&app, Method::POST, "/api/community", Some(&alice), Some(json!({"content": "hello"}))).await;
        let uri = format!("/api/community/{}", post["id"].as_str().unwrap());

        let (status, _) = request(&app, Method::DELETE, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = request(&app, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = request(&app, Method::POST, &format!("{}/like", uri), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_posts_and_comments_are_rejected() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let (status, _) =
            request(&app, Method::POST, "/api/community", Some(&alice), Some(json!({"content": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, post) =
            request(&app, Method::POST, "/api/community", Some(&alice), Some(json!({"content": "x"}))).await;
        let uri = format!("/api/community/{}/comment", post["id"].as_str().unwrap());
        let (status, _) = request(&app, Method::POST, &uri, Some(&alice), Some(json!({"content": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
