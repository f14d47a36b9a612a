//! HTTP error mapping.
//!
//! Core errors become a JSON body `{"error": {"code": ..., "message": ...}}` with a status
//! derived from [`ErrorKind`]. Storage and fatal errors get a generic message so no
//! internal detail leaks to clients; the full error is logged instead.

use crate::errors::{Error, ErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// No caller identity on the request
    Unauthenticated,
    /// A core operation failed
    Core(Error),
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        Self::Core(value)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Missing caller identity".to_string(),
            ),
            Self::Core(err) => {
                let kind = err.kind();
                let message = match kind {
                    ErrorKind::Storage => {
                        warn!(error = %err, "storage failure while handling request");
                        "Service temporarily unavailable, please retry".to_string()
                    }
                    ErrorKind::Fatal => {
                        error!(error = %err, "unexpected failure while handling request");
                        "Internal error".to_string()
                    }
                    _ => err.to_string(),
                };
                (status_for(kind), err.code(), message)
            }
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;

    #[test]
    fn test_status_mapping() {
        let resp = ApiError::from(Error::SelfReferral {
            user_id: "u".to_string(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(Error::ReferralNotFound { referral_id: 1 }).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::from(Error::InsufficientBalance {
            account_id: "a".to_string(),
            balance: 0,
            required: 1,
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiError::from(Error::from(DbErr::Custom("disk".to_string()))).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(
            ApiError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
