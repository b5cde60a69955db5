//! Route definitions.

mod health;
mod ingest;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};

use crate::error::IngestError;
use crate::state::AppState;

pub use self::ingest::{INGEST_PATH, PROJECT_TOKEN_HEADER, VISITOR_COOKIE};

/// Build the gateway router.
///
/// # Route Structure
///
/// - `POST /ingest` - Accept one event
/// - `OPTIONS /ingest` - CORS preflight
/// - `GET /health` - Health check
///
/// Any other method on `/ingest` is a 400, any other path a 404. Every
/// response carries the configured CORS headers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            INGEST_PATH,
            post(ingest::ingest)
                .options(ingest::preflight)
                .fallback(invalid_method),
        )
        .route("/health", get(health::health_check))
        .fallback(not_found)
        .layer(middleware::map_response_with_state(
            state.clone(),
            add_cors_headers,
        ))
        .with_state(state)
}

async fn invalid_method() -> IngestError {
    IngestError::InvalidMethod
}

async fn not_found() -> IngestError {
    IngestError::NotFound
}

/// Attach the CORS headers to a response.
async fn add_cors_headers(State(state): State<AppState>, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let headers = &mut parts.headers;

    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        state.cors.allow_origin.clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-Zori-PT, x-zori-version"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, state.cors.max_age.clone());

    Response::from_parts(parts, body)
}
