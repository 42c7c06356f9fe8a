use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_gateway::hub::Outgoing;
use parley_gateway::{ChatError, blocking};
use parley_types::api::{
    Claims, ConversationResponse, CreateConversationRequest, MarkReadResponse, SendMessageRequest,
};
use parley_types::events::ChatEvent;
use parley_types::models::{Conversation, Payload};

use crate::auth::{AppState, parse_user_id};
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// 0 or absent means the default page size.
    #[serde(default)]
    pub limit: u32,
}

/// Shape a conversation for `viewer`, resolving the counterpart's name and,
/// when asked, their read watermark.
async fn describe(
    state: &AppState,
    conversations: Vec<Conversation>,
    viewer: &str,
    with_watermark: bool,
) -> ApiResult<Vec<ConversationResponse>> {
    let others: Vec<String> = conversations
        .iter()
        .filter_map(|c| c.other_participant(viewer).map(str::to_string))
        .collect();

    let lookup = others.clone();
    let names = blocking(state.db(), move |db| db.display_names(&lookup)).await?;

    let mut responses = Vec::with_capacity(conversations.len());
    for (conversation, other) in conversations.into_iter().zip(others) {
        let other_last_read_at = if with_watermark {
            let (id, user) = (conversation.id.clone(), other.clone());
            blocking(state.db(), move |db| db.read_marker(&id, &user)).await?
        } else {
            None
        };

        responses.push(ConversationResponse {
            other_participant_name: names.get(&other).cloned().unwrap_or_else(|| other.clone()),
            other_participant_mobile: other,
            id: conversation.id,
            participant1: conversation.participant1,
            participant2: conversation.participant2,
            last_message_at: conversation.last_message_at,
            last_message_preview: conversation.last_message_preview,
            other_last_read_at,
        });
    }
    Ok(responses)
}

async fn describe_one(state: &AppState, conversation: Conversation, viewer: &str) -> ApiResult<ConversationResponse> {
    describe(state, vec![conversation], viewer, true)
        .await?
        .pop()
        .ok_or_else(|| ChatError::not_found("conversation").into())
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationResponse>>> {
    let conversations = state.hub.conversations_for(&claims.sub).await?;
    Ok(Json(describe(&state, conversations, &claims.sub, false).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<ConversationResponse>> {
    let other = parse_user_id(&req.other_user_mobile)?;
    let conversation = state.hub.get_or_create_conversation(&claims.sub, &other).await?;
    Ok(Json(describe_one(&state, conversation, &claims.sub).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ConversationResponse>> {
    let conversation = state.hub.conversation(&id, &claims.sub).await?;
    Ok(Json(describe_one(&state, conversation, &claims.sub).await?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    state.hub.delete_conversation(&id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// History of a direct conversation or group, oldest first.
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ChatEvent>>> {
    let entries = state.hub.history(&id, &claims.sub, query.limit).await?;
    Ok(Json(entries.iter().map(|e| e.to_event()).collect()))
}

pub async fn send(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let payload = match (req.content, req.file_content) {
        (_, Some(file)) if !file.is_empty() => {
            let mime = req.file_type.unwrap_or_default();
            state.hub.store().file_payload(&file, &mime)?
        }
        (Some(text), _) => Payload::Text(text),
        _ => return Err(ChatError::bad_request("either content or fileContent is required").into()),
    };

    let sent = state
        .hub
        .send(Outgoing {
            conversation_id: id,
            sender: claims.sub,
            payload,
            reply_to_id: req.reply_to_id,
            origin: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(sent.ack(None))))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MarkReadResponse>> {
    let last_read_at = state.hub.mark_read(&id, &claims.sub).await?;
    Ok(Json(MarkReadResponse {
        conversation_id: id,
        last_read_at,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use parley_types::events::MessageType;

    use crate::test_support::{request, signup_user, test_app};

    #[tokio::test]
    async fn create_is_idempotent_across_both_sides() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;

        let (status, a) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&alice),
            Some(json!({"otherUserMobile": "222222"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(a["otherParticipantName"], "user 222222");

        let (_, b) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&bob),
            Some(json!({"otherUserMobile": "111111"})),
        )
        .await;
        assert_eq!(a["id"], b["id"]);
    }

    #[tokio::test]
    async fn messages_flow_through_rest() {
        let (app, state) = test_app();
        let alice = signup_user(&app, "111111").await;
        let bob = signup_user(&app, "222222").await;
        let (_, conv) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&alice),
            Some(json!({"otherUserMobile": "222222"})),
        )
        .await;
        let id = conv["id"].as_str().unwrap().to_string();
        let (_bob_session, mut bob_rx) = state.hub.registry().register("222222").await;

        let uri = format!("/api/conversations/{}/messages", id);
        let (status, ack) = request(&app, Method::POST, &uri, Some(&alice), Some(json!({"content": "hi"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ack["seq"], 1);
        assert_eq!(ack["status"], "DELIVERED");
        assert_eq!(bob_rx.recv().await.unwrap().kind, MessageType::Chat);

        let (status, history) = request(&app, Method::GET, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["content"], "hi");
        assert_eq!(history[0]["read"], false);

        let read_uri = format!("/api/conversations/{}/read", id);
        let (status, _) = request(&app, Method::POST, &read_uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, history) = request(&app, Method::GET, &uri, Some(&alice), None).await;
        assert_eq!(history[0]["status"], "READ");

        let (_, detail) = request(&app, Method::GET, &format!("/api/conversations/{}", id), Some(&alice), None).await;
        assert!(detail["otherLastReadAt"].as_i64().is_some());

        let (_, list) = request(&app, Method::GET, "/api/conversations", Some(&bob), None).await;
        assert_eq!(list[0]["lastMessagePreview"], "hi");
    }

    #[tokio::test]
    async fn outsiders_cannot_read_history() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        signup_user(&app, "222222").await;
        let eve = signup_user(&app, "333333").await;
        let (_, conv) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&alice),
            Some(json!({"otherUserMobile": "222222"})),
        )
        .await;

        let uri = format!("/api/conversations/{}/messages", conv["id"].as_str().unwrap());
        let (status, _) = request(&app, Method::GET, &uri, Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = request(&app, Method::POST, &uri, Some(&eve), Some(json!({"content": "psst"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        signup_user(&app, "222222").await;
        let (_, conv) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&alice),
            Some(json!({"otherUserMobile": "222222"})),
        )
        .await;

        let uri = format!("/api/conversations/{}/messages", conv["id"].as_str().unwrap());
        let (status, _) = request(&app, Method::POST, &uri, Some(&alice), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_a_conversation_removes_it() {
        let (app, _state) = test_app();
        let alice = signup_user(&app, "111111").await;
        signup_user(&app, "222222").await;
        let (_, conv) = request(
            &app,
            Method::POST,
            "/api/conversations",
            Some(&alice),
            Some(json!({"otherUserMobile": "222222"})),
        )
        .await;

        let uri = format!("/api/conversations/{}", conv["id"].as_str().unwrap());
        let (status, _) = request(&app, Method::DELETE, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = request(&app, Method::GET, &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
