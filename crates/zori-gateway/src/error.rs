//! Ingest error types and response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use zori_core::metrics::record_outcome;

use crate::project::LookupError;

/// Reasons an ingest request is refused.
///
/// Responses carry a short plain-text body; the tracking script only looks at
/// the status code.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Malformed payload, visitor mismatch or local-host policy violation.
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// Missing or unknown project token.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// Path other than the ingest path.
    #[error("not found")]
    NotFound,

    /// Method other than POST or OPTIONS on the ingest path.
    #[error("invalid method")]
    InvalidMethod,

    /// The project store could not be queried.
    #[error("project lookup failed: {0}")]
    Lookup(#[from] LookupError),
}

impl IngestError {
    /// Metric label for this refusal.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound => "not_found",
            Self::InvalidMethod => "invalid_method",
            Self::Lookup(_) => "lookup_error",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        record_outcome("gateway_requests_total", self.outcome());

        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, *msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, *msg),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not Found"),
            Self::InvalidMethod => (StatusCode::BAD_REQUEST, "Bad Request"),
            Self::Lookup(err) => {
                tracing::error!(error = %err, "project lookup failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (IngestError::BadRequest("x"), StatusCode::BAD_REQUEST),
            (IngestError::Unauthorized("x"), StatusCode::UNAUTHORIZED),
            (IngestError::NotFound, StatusCode::NOT_FOUND),
            (IngestError::InvalidMethod, StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_lookup_failure_is_internal() {
        let error = IngestError::from(LookupError::Store(rusqlite::Error::InvalidQuery));
        assert_eq!(error.outcome(), "lookup_error");
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
