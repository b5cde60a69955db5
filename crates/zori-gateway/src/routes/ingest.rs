//! Event ingestion endpoint.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use metrics::counter;
use zori_core::metrics::{increment, record_outcome};
use zori_core::{ClientEvent, EventFrame, Publisher};

use crate::error::IngestError;
use crate::project::{PUBLISHABLE_TOKEN_PREFIX, Project};
use crate::state::AppState;

/// The only path events are accepted on.
pub const INGEST_PATH: &str = "/ingest";

/// Request header carrying the publishable project token.
pub const PROJECT_TOKEN_HEADER: &str = "x-zori-pt";

/// Cookie pinning a browser to its first self-reported visitor id.
pub const VISITOR_COOKIE: &str = "visitor_id";

/// Lifetime of the visitor cookie, in seconds.
const VISITOR_COOKIE_MAX_AGE_SECS: i64 = 3_600_000;

/// Accept one event.
///
/// The event is published from a detached task; the response does not wait
/// for the broker.
pub async fn ingest(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<(StatusCode, CookieJar, String), IngestError> {
    let mut event: ClientEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "rejecting malformed event payload");
        IngestError::BadRequest("Failed to decode event payload")
    })?;

    let known_visitor = jar.get(VISITOR_COOKIE).map(|c| c.value().to_string());
    let jar = match known_visitor {
        Some(visitor_id) if visitor_id != event.visitor_id => {
            return Err(IngestError::BadRequest("Missing or Invalid Visitor ID"));
        }
        Some(_) => jar,
        None => jar.add(visitor_cookie(&state.config.cookie_domain, &event.visitor_id)),
    };

    let token = headers
        .get(PROJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(IngestError::Unauthorized(
            "X-Zori-PT Missing in the request header",
        ))?;

    if !token.starts_with(PUBLISHABLE_TOKEN_PREFIX) {
        return Err(IngestError::Unauthorized("Invalid Project Token"));
    }

    let project = state
        .projects
        .by_publishable_token(token)
        .await?
        .ok_or(IngestError::Unauthorized("Invalid Project Token"))?;

    check_local_host(request_host(&headers), &project)?;

    event.user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    event.ip = client_ip(&headers, peer.ip());

    let frame = EventFrame::new(event, project.id, project.organization_id);
    publish_detached(
        Arc::clone(&state.publisher),
        state.config.stream.subject.clone(),
        frame,
    );

    record_outcome("gateway_requests_total", "accepted");
    increment("gateway_bytes_total", body.len() as u64);

    Ok((StatusCode::ACCEPTED, jar, format!("ACCEPTED {}", body.len())))
}

/// CORS preflight. Headers are added by the router middleware.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn visitor_cookie(domain: &str, visitor_id: &str) -> Cookie<'static> {
    Cookie::build((VISITOR_COOKIE, visitor_id.to_string()))
        .domain(domain.to_string())
        .path("/")
        .max_age(time::Duration::seconds(VISITOR_COOKIE_MAX_AGE_SECS))
        .secure(false)
        .build()
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Enforce the project's local-host policy.
///
/// A host containing `localhost` is accepted only when the project allows it,
/// and only with no port or a valid TCP port.
fn check_local_host(host: &str, project: &Project) -> Result<(), IngestError> {
    if !host.contains("localhost") {
        return Ok(());
    }

    if !project.allow_local_host {
        return Err(IngestError::BadRequest(
            "Localhost events are not allowed for the project",
        ));
    }

    match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_err() => {
            Err(IngestError::BadRequest("Invalid Host"))
        }
        _ => Ok(()),
    }
}

/// Client address by precedence: `cf-connecting-ip`, first `x-forwarded-for`
/// entry, then the peer address.
fn client_ip(headers: &HeaderMap, peer: IpAddr) -> String {
    if let Some(ip) = header_value(headers, "cf-connecting-ip") {
        return ip.to_string();
    }

    if let Some(first) = header_value(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').map(str::trim).find(|v| !v.is_empty()))
    {
        return first.to_string();
    }

    peer.to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Publish a frame without holding up the response. Failures are logged and
/// counted, never retried.
fn publish_detached(publisher: Arc<dyn Publisher>, subject: String, frame: EventFrame) {
    tokio::spawn(async move {
        let payload = match frame.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode event frame");
                counter!("gateway_publish_errors_total").increment(1);
                return;
            }
        };

        match publisher.publish(&subject, payload).await {
            Ok(()) => increment("gateway_published_total", 1),
            Err(e) => {
                tracing::error!(
                    subject = %subject,
                    project_id = %frame.project_id,
                    error = %e,
                    "failed to publish event"
                );
                counter!("gateway_publish_errors_total").increment(1);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn project(allow_local_host: bool) -> Project {
        Project {
            id: "prj_1".to_string(),
            organization_id: "org_1".to_string(),
            domain: "https://example.com".to_string(),
            allow_local_host,
        }
    }

    #[test]
    fn test_local_host_policy() {
        let allowed = project(true);
        let denied = project(false);

        assert!(check_local_host("example.com", &denied).is_ok());
        assert!(check_local_host("api.zorihq.com:443", &denied).is_ok());

        assert!(check_local_host("localhost", &allowed).is_ok());
        assert!(check_local_host("localhost:3000", &allowed).is_ok());
        assert!(check_local_host("localhost:abc", &allowed).is_err());
        assert!(check_local_host("localhost:70000", &allowed).is_err());

        assert!(check_local_host("localhost", &denied).is_err());
        assert!(check_local_host("localhost:3000", &denied).is_err());
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "10.0.0.1");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.1.1.1"),
        );
        assert_eq!(client_ip(&headers, peer), "198.51.100.7");

        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(client_ip(&headers, peer), "203.0.113.9");
    }

    #[test]
    fn test_empty_forwarded_header_falls_back_to_peer() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , "));
        assert_eq!(client_ip(&headers, peer), "10.0.0.1");
    }

    #[test]
    fn test_visitor_cookie_attributes() {
        let cookie = visitor_cookie(".zorihq.com", "v_1");
        assert_eq!(cookie.name(), "visitor_id");
        assert_eq!(cookie.value(), "v_1");
        assert_eq!(cookie.domain(), Some("zorihq.com"));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(3_600_000)));
        assert_eq!(cookie.secure(), Some(false));
    }
}
