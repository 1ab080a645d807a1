//! Request/response binding.
//!
//! Every request that is not a WebSocket upgrade lands in [`dispatch`],
//! which translates it into [`RequestParts`] and hands it to the route
//! table.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, trace, warn};
use trellis_core::{
    HeaderMap, HttpSurface, Method, QueryMap, Reply, ReplyBody, RequestParts, StructuredError,
};

use crate::AppState;

/// Fallback handler serving every route of the table.
pub(crate) async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (parts, body) = request.into_parts();

    let method = match parts.method.as_str().parse::<Method>() {
        Ok(Method::All) | Err(_) => {
            debug!(method = %parts.method, path = %parts.uri.path(), "Unsupported method");
            return into_response(Reply::error(&StructuredError::new(
                405,
                "method-not-allowed",
            )))
            .await;
        }
        Ok(method) => method,
    };

    let query: QueryMap = match Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri) {
        Ok(Query(query)) => query,
        Err(e) => {
            return into_response(Reply::error(
                &StructuredError::bad_request("invalid-query").with_messages(vec![e.body_text()]),
            ))
            .await;
        }
    };

    let headers: HeaderMap = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let raw = match axum::body::to_bytes(body, state.options.body_limit).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %parts.uri.path(), error = %e, "Failed to read request body");
            return into_response(Reply::error(
                &StructuredError::new(413, "payload-too-large").with_messages(vec![e.to_string()]),
            ))
            .await;
        }
    };

    let body = match decode_body(&raw, headers.get("content-type").map(String::as_str)) {
        Ok(body) => body,
        Err(reason) => {
            return into_response(Reply::error(
                &StructuredError::bad_request("invalid-body").with_messages(vec![reason]),
            ))
            .await;
        }
    };

    trace!(method = %method, path = %parts.uri.path(), len = raw.len(), "Received HTTP request");
    let request = RequestParts::new(method, parts.uri.path())
        .with_body(body)
        .with_query(query)
        .with_headers(headers);
    let reply = state
        .registries
        .handle_http(request, HttpSurface::new(raw, remote_addr))
        .await;
    into_response(reply).await
}

/// Decodes a request body into a JSON value.
///
/// Empty bodies are `null`. A JSON content type must parse; anything else is
/// tried as JSON and otherwise kept as text.
fn decode_body(raw: &Bytes, content_type: Option<&str>) -> Result<Value, String> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let declared_json = content_type.is_some_and(|ct| ct.contains("json"));
    match serde_json::from_slice(raw) {
        Ok(value) => Ok(value),
        Err(e) if declared_json => Err(e.to_string()),
        Err(_) => Ok(Value::String(String::from_utf8_lossy(raw).into_owned())),
    }
}

/// Converts a finished [`Reply`] into an axum response.
pub(crate) async fn into_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = match reply.body {
        ReplyBody::Json(value) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            value.to_string(),
        )
            .into_response(),
        ReplyBody::Text(text) => (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        ReplyBody::Html(html) => (
            status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        ReplyBody::File(path) => match tokio::fs::read(&path).await {
            Ok(contents) => (
                status,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                Body::from(contents),
            )
                .into_response(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read reply file");
                let err = StructuredError::not_found(&path.display().to_string());
                (
                    StatusCode::NOT_FOUND,
                    [(header::CONTENT_TYPE, "application/json")],
                    err.to_value().to_string(),
                )
                    .into_response()
            }
        },
    };

    for (name, value) in reply.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}
