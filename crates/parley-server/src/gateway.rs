use axum::{
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;
use tracing::info;

use parley_api::auth::{AppState, verify_token};
use parley_api::error::ApiError;
use parley_gateway::ChatError;
use parley_gateway::connection::{self, Heartbeat};

#[derive(Clone)]
pub struct GatewayState {
    pub app: AppState,
    pub heartbeat: Heartbeat,
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /gateway`. Browsers cannot set headers on a WebSocket, so the token
/// may also arrive as `?token=`; the query wins when both are present.
pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(Authorization(b))| b.token().to_string()));
    let Some(token) = token else {
        return ApiError(ChatError::Unauthorized("missing token".into())).into_response();
    };
    let claims = match verify_token(&state.app.jwt_secret, &token) {
        Ok(claims) => claims,
        Err(e) => return ApiError(e).into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!("{} opening gateway session", claims.sub);
    let hub = state.app.hub.clone();
    let heartbeat = state.heartbeat;
    ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, claims.sub, heartbeat))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
        routing::get,
    };
    use tower::ServiceExt;

    use parley_api::auth::{AppStateInner, create_token};
    use parley_db::Database;
    use parley_gateway::{Hub, HubConfig};

    use super::*;

    fn app() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let app: AppState = Arc::new(AppStateInner {
            hub: Hub::new(db, HubConfig::default()),
            jwt_secret: "gw-secret".into(),
        });
        Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
            app,
            heartbeat: Heartbeat::default(),
        })
    }

    async fn status_for(uri: &str, bearer: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap().status()
    }

    #[tokio::test]
    async fn upgrade_requires_a_valid_token() {
        assert_eq!(status_for("/gateway", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("/gateway?token=nope", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("/gateway", Some("nope")).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_reaches_the_upgrade_check() {
        let token = create_token("gw-secret", "111111", "Ada").unwrap();
        // A plain GET carries no upgrade headers, so axum rejects it after auth passes.
        let query = status_for(&format!("/gateway?token={}", token), None).await;
        assert_ne!(query, StatusCode::UNAUTHORIZED);
        assert!(query.is_client_error());
        let header = status_for("/gateway", Some(&token)).await;
        assert_ne!(header, StatusCode::UNAUTHORIZED);
    }
}
