use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use parley_gateway::ChatError;
use parley_types::api::ErrorBody;

/// HTTP face of [`ChatError`]: a status code plus `{"error": msg}`.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

pub type ApiResult<T> = Result<T, ApiError>;

impl<E: Into<ChatError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ChatError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.0.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_its_status() {
        let cases = [
            (ChatError::not_found("user"), StatusCode::NOT_FOUND),
            (ChatError::forbidden("no"), StatusCode::FORBIDDEN),
            (ChatError::Conflict("taken".into()), StatusCode::CONFLICT),
            (ChatError::PayloadTooLarge { size: 2, limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (ChatError::bad_request("bad"), StatusCode::BAD_REQUEST),
            (ChatError::Unauthorized("who".into()), StatusCode::UNAUTHORIZED),
            (ChatError::TransientIo(anyhow::anyhow!("disk")), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let err = ApiError(ChatError::TransientIo(anyhow::anyhow!("/var/db locked")));
        assert_eq!(err.0.to_string(), "storage temporarily unavailable");
    }
}
