use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_sync::SyncError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

impl From<SyncError> for Error {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::InvalidContent | SyncError::NotLive => Error::BadRequest(message),
            SyncError::UnknownConversation(_) => Error::NotFound(message),
            SyncError::StoreUnavailable(_) => Error::Unavailable(message),
            _ => Error::Internal(message),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_sync::ConversationId;

    #[test]
    fn test_sync_error_status_mapping() {
        let cases = [
            (SyncError::InvalidContent, StatusCode::BAD_REQUEST),
            (
                SyncError::UnknownConversation(ConversationId(9)),
                StatusCode::NOT_FOUND,
            ),
            (
                SyncError::StoreUnavailable("locked".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SyncError::Backend("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(Error::from(err).into_response().status(), status);
        }
    }
}
