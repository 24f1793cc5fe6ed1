//! Replay Listener
//!
//! Thin axum boundary in front of the [`MatchingEngine`]. Every method and
//! path is routed to the engine; nothing is reserved for the server itself.

use crate::mock::error::ReplayError;
use crate::mock::fingerprint::RequestDescriptor;
use crate::mock::matcher::{MatchOutcome, MatchingEngine, ReplayMiss, ServedFixture};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared listener state.
#[derive(Clone)]
pub struct ReplayState {
    pub engine: Arc<MatchingEngine>,
    /// Add `Access-Control-Allow-Origin` to responses that lack one.
    pub cors: bool,
}

/// Diagnostic body returned when no fixture matches.
#[derive(Debug, Serialize)]
pub struct MissReport {
    pub source: &'static str,
    pub message: &'static str,
    pub http_method: String,
    pub path: String,
    pub origin_header: String,
    pub query_params: Vec<String>,
    pub generated_map_key: String,
    pub map_key_sequence: String,
    pub available_keys: Vec<String>,
}

pub fn router(engine: Arc<MatchingEngine>, cors: bool) -> Router {
    Router::new()
        .fallback(replay)
        .with_state(ReplayState { engine, cors })
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(engine: Arc<MatchingEngine>, addr: SocketAddr, cors: bool) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        fixtures = engine.store().len(),
        "Replay server listening"
    );
    axum::serve(listener, router(engine, cors))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

/// Build the engine's view of an inbound request.
pub fn describe(method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestDescriptor {
    let query_names: Vec<String> = uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, _)| k.into_owned())
                .collect()
        })
        .unwrap_or_default();

    let mut descriptor =
        RequestDescriptor::new(method.as_str(), uri.path()).with_query_names(query_names);
    if let Some(origin) = headers.get(header::ORIGIN) {
        descriptor = descriptor.with_origin(String::from_utf8_lossy(origin.as_bytes()));
    }
    descriptor
}

async fn replay(
    State(state): State<ReplayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let descriptor = describe(&method, &uri, &headers);

    let mut response = match state.engine.resolve(&descriptor) {
        Ok(MatchOutcome::Hit(served)) => fixture_response(&served),
        Ok(MatchOutcome::Miss(miss)) => miss_response(&descriptor, miss),
        Err(ReplayError::InvalidRequest(e)) => {
            warn!(method = %method, path = uri.path(), error = %e, "Rejected replay request");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(ReplayError::Store(e)) => {
            error!(method = %method, path = uri.path(), error = %e, "Fixture read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    };

    if state.cors && !response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
        let origin = descriptor
            .origin
            .as_deref()
            .and_then(|o| HeaderValue::from_str(o).ok())
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}

fn fixture_response(served: &ServedFixture) -> Response {
    let fixture = &served.fixture;
    let status = match StatusCode::from_u16(fixture.status_code) {
        Ok(status) => status,
        Err(_) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("recorded status {} is not valid", fixture.status_code),
            )
        }
    };

    let mut response = Response::new(Body::from(fixture.body.clone()));
    *response.status_mut() = status;
    let out = response.headers_mut();
    for (name, value) in &fixture.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.append(name, value);
            }
            _ => warn!(fingerprint = %served.fingerprint, header = %name, "Skipping unreplayable header"),
        }
    }
    response
}

fn miss_response(descriptor: &RequestDescriptor, miss: ReplayMiss) -> Response {
    let report = MissReport {
        source: env!("CARGO_PKG_NAME"),
        message: "No recorded response found for request.",
        http_method: descriptor.method.clone(),
        path: descriptor.path.clone(),
        origin_header: descriptor.origin_value().to_string(),
        query_params: descriptor.query_names.iter().cloned().collect(),
        generated_map_key: miss.base.to_string(),
        map_key_sequence: miss.candidate.to_string(),
        available_keys: miss.known,
    };

    let mut response = (StatusCode::NOT_FOUND, Json(report)).into_response();
    let allow_origin = descriptor
        .origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    response
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
