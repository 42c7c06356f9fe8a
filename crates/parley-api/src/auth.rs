use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};

use parley_db::Database;
use parley_gateway::{ChatError, Hub, blocking};
use parley_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest};
use parley_types::models::{escape_html, normalize_user_id};
use parley_types::now_millis;

use crate::error::ApiResult;

const MIN_MOBILE_DIGITS: usize = 5;
const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub hub: Hub,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn db(&self) -> &Arc<Database> {
        self.hub.db()
    }

    /// Attachment limit shared by messages, pictures, statuses and posts.
    pub fn max_attachment_bytes(&self) -> usize {
        self.hub.store().max_attachment_bytes()
    }
}

/// Normalize a mobile from a request body, rejecting anything unusable.
pub fn parse_user_id(raw: &str) -> Result<String, ChatError> {
    let id = normalize_user_id(raw).ok_or_else(|| ChatError::bad_request("invalid mobile number"))?;
    if !id.starts_with("google_") && id.len() < MIN_MOBILE_DIGITS {
        return Err(ChatError::bad_request("invalid mobile number"));
    }
    Ok(id)
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_user_id(&req.mobile)?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ChatError::bad_request("password must be at least 6 characters").into());
    }

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(escape_html)
        .unwrap_or_else(|| user_id.clone());

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ChatError::TransientIo(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let (id, name) = (user_id.clone(), display_name.clone());
    let created = blocking(state.db(), move |db| {
        db.create_user(&id, &name, Some(&password_hash), now_millis())
    })
    .await?;
    if !created {
        return Err(ChatError::Conflict("mobile number already registered".into()).into());
    }

    let token = create_token(&state.jwt_secret, &user_id, &display_name)?;
    info!("{} signed up", user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            mobile: user_id,
            display_name,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let invalid = || ChatError::Unauthorized("invalid mobile number or password".into());

    let user_id = normalize_user_id(&req.mobile).ok_or_else(invalid)?;
    let lookup = user_id.clone();
    let user = blocking(state.db(), move |db| db.get_user(&lookup))
        .await?
        .ok_or_else(invalid)?;

    // OAuth accounts have no password to check against.
    let stored = user.password.as_deref().ok_or_else(invalid)?;
    let parsed_hash = PasswordHash::new(stored).map_err(|e| {
        warn!("Corrupt password hash for {}: {}", user.id, e);
        invalid()
    })?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let token = create_token(&state.jwt_secret, &user.id, &user.display_name)?;

    Ok(Json(AuthResponse {
        mobile: user.id,
        display_name: user.display_name,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: &str, display_name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a bearer token and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ChatError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ChatError::Unauthorized("invalid or expired token".into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::test_support::{request, signup_user, test_app};

    #[test]
    fn token_round_trips_through_verification() {
        let token = create_token("secret", "111111", "Ada").unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "111111");
        assert_eq!(claims.name, "Ada");
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn mobiles_need_enough_digits() {
        assert_eq!(parse_user_id("+1 555 0100").unwrap(), "15550100");
        assert!(parse_user_id("12-34").is_err());
        assert_eq!(parse_user_id("google_abc").unwrap(), "google_abc");
    }

    #[tokio::test]
    async fn signup_then_login() {
        let (app, _state) = test_app();
        let (status, body) = request(
            &app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({"mobile": "+44 7700 900123", "displayName": "Ada", "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["mobile"], "447700900123");
        assert_eq!(body["displayName"], "Ada");

        let (status, body) = request(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"mobile": "447700900123", "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let (app, _state) = test_app();
        signup_user(&app, "111111").await;
        let (status, body) = request(
            &app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({"mobile": "111111", "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "mobile number already registered");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (app, _state) = test_app();
        signup_user(&app, "111111").await;
        let (status, _) = request(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"mobile": "111111", "password": "wrong-one"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let (app, _state) = test_app();
        let (status, _) = request(
            &app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({"mobile": "111111", "password": "123"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
