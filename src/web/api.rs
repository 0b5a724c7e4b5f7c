//! API port handler: forward control-plane requests to the tuner and
//! rewrite text responses so the gateway, not the device, is what clients
//! see.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Response, StatusCode};
use futures::TryStreamExt;
use tracing::{debug, error};

use crate::proxy::rewrite::{needs_rewrite, MAX_IN_MEMORY_SIZE};
use crate::proxy::session::error_response;
use crate::web::AppState;

/// Request bodies larger than this are not forwarded; the device's API only
/// ever takes small payloads.
const MAX_REQUEST_BODY: usize = 1024 * 1024;

pub async fn proxy_request(State(state): State<AppState>, req: Request) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let request_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    debug!("Proxying request: {} {}", parts.method, path_and_query);

    let target = format!("http://{}{}", state.device.tuner_address(), path_and_query);

    let mut forwarded = header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if name == header::HOST {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    let body_bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Error reading request body: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error creating proxy request");
        }
    };

    let upstream = match state
        .control_client
        .request(parts.method, target.as_str())
        .headers(forwarded)
        .body(body_bytes)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            error!("Error forwarding request to {}: {}", target, e);
            return error_response(StatusCode::BAD_GATEWAY, "Error forwarding request");
        }
    };

    let status = upstream.status();
    debug!("Received response with status: {}", status);

    // Content-Length is dropped: rewriting changes the body size, and the
    // passthrough path streams chunked anyway.
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers().iter() {
        if name == header::CONTENT_LENGTH {
            continue;
        }
        builder = builder.header(name, value);
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !needs_rewrite(&content_type) {
        debug!("Streaming response directly (Content-Type: {})", content_type);
        let stream = upstream.bytes_stream().map_err(std::io::Error::other);
        return finish(builder.body(Body::from_stream(stream)));
    }

    match upstream.content_length() {
        Some(len) if len >= MAX_IN_MEMORY_SIZE => {
            debug!("Streaming large response with line-oriented rewrite ({} bytes)", len);
            let stream = state.rewriter.clone().rewrite_stream(upstream, request_host);
            finish(builder.body(Body::from_stream(stream)))
        }
        _ => match upstream.text().await {
            Ok(text) => {
                let rewritten = state.rewriter.rewrite(&text, &request_host);
                finish(builder.body(Body::from(rewritten)))
            }
            Err(e) => {
                error!("Error reading tuner response: {}", e);
                error_response(StatusCode::BAD_GATEWAY, "Error reading tuner response")
            }
        },
    }
}

fn finish(result: Result<Response<Body>, axum::http::Error>) -> Response<Body> {
    result.unwrap_or_else(|e| {
        error!("Failed to build proxied response: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })
}
