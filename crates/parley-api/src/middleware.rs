use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use parley_gateway::ChatError;

use crate::auth::{AppState, verify_token};
use crate::error::ApiResult;

/// Validate the bearer token and stash its claims for the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| ChatError::Unauthorized("missing bearer token".into()))?;

    let claims = verify_token(&state.jwt_secret, bearer.token())?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::test_support::{request, test_app, token_for};

    #[tokio::test]
    async fn protected_routes_need_a_valid_token() {
        let (app, _state) = test_app();

        let (status, body) = request(&app, Method::GET, "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing bearer token");

        let (status, _) = request(&app, Method::GET, "/api/users/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_for_a_missing_user_is_not_found() {
        let (app, _state) = test_app();
        let token = token_for("555555");
        let (status, _) = request(&app, Method::GET, "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
