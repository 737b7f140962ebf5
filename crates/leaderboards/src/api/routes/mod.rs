mod leaderboards;
mod scores;
mod system;

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use hyper::{header::RETRY_AFTER, StatusCode};
use serde_json::json;
use std::borrow::Borrow;

use crate::domain::Error;

/// Seconds clients are asked to wait before retrying a transient failure
const RETRY_AFTER_SECS: u32 = 1;

pub use leaderboards::*;
pub use scores::*;
pub use system::*;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.borrow() {
            Error::ConfigNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Error::BadRequest(_) | Error::InvalidSchedule(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Error::ConfigUnavailable(_) | Error::StoreTimeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal server error"),
            ),
        };
        let body = Json(json!({
            "error": error_message,
        }));
        let mut response = (status, body).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, RETRY_AFTER_SECS.into());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreError;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (Error::ConfigNotFound("race".into()), StatusCode::NOT_FOUND),
            (Error::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
            (Error::InvalidSchedule("bad".into()), StatusCode::BAD_REQUEST),
            (Error::StoreTimeout(1000), StatusCode::SERVICE_UNAVAILABLE),
            (
                Error::ConfigUnavailable("not loaded".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::Store(StoreError::Malformed("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Thread("died".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_transient_errors_ask_for_retry() {
        let response = Error::StoreTimeout(1000).into_response();
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");
        let response = Error::ConfigUnavailable("not loaded".into()).into_response();
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");

        assert!(Error::BadRequest("bad".into())
            .into_response()
            .headers()
            .get(RETRY_AFTER)
            .is_none());
        assert!(Error::Store(StoreError::Malformed("x".into()))
            .into_response()
            .headers()
            .get(RETRY_AFTER)
            .is_none());
    }
}
