//! Media port handlers.

use std::fmt::Write as _;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::proxy::session;
use crate::web::AppState;

/// `GET /auto/v<channel>`: dispatch a stream request. The channel rides in
/// the same path segment as the `v` prefix, so the route captures the whole
/// segment and the prefix is stripped here.
pub async fn stream_channel(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    headers: HeaderMap,
) -> Response<Body> {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    info!(
        "Received media request: /auto/{} (User-Agent: {})",
        stream, user_agent
    );

    let Some(channel) = stream.strip_prefix('v') else {
        debug!("Path /auto/{} doesn't match /auto/v pattern, returning 404", stream);
        return session::error_response(StatusCode::NOT_FOUND, "404 page not found");
    };

    if channel.is_empty() {
        warn!("Empty channel requested");
        return session::error_response(StatusCode::BAD_REQUEST, "Missing channel number");
    }

    if state.channel_map.needs_transcode(channel) {
        info!(
            "Processing channel {} with AC4 audio - transcoding to EAC3",
            channel
        );
        session::serve(&state, channel, true).await
    } else {
        info!(
            "Processing channel {} without AC4 audio - direct streaming",
            channel
        );
        session::serve(&state, channel, false).await
    }
}

/// `GET /status`: plain-text operational summary.
pub async fn status(State(state): State<AppState>) -> Response<Body> {
    info!("Status endpoint accessed");

    let sessions = state.registry.snapshot();
    let mut out = String::new();

    let _ = writeln!(out, "HDHomeRun AC4 Proxy Status");
    let _ = writeln!(out, "=========================");
    let _ = writeln!(out, "Active Streams: {}", sessions.len());
    let _ = writeln!(out, "Total Channels: {}", state.channel_map.total_channels());
    let _ = writeln!(out, "AC4 Audio Channels: {}\n", state.channel_map.ac4_channels());

    if !sessions.is_empty() {
        let _ = writeln!(out, "Channel    Duration (s)  Transcoding");
        let _ = writeln!(out, "-----------------------------------");
        for s in &sessions {
            let transcoding = if s.transcoding { "Yes (AC4->EAC3)" } else { "No" };
            let _ = writeln!(
                out,
                "{:<10} {:<12.2} {}",
                s.channel,
                s.duration.as_secs_f64(),
                transcoding
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "HDHomeRun Device: {}", state.device.tuner_address());
    let _ = writeln!(out, "Device ID: {}", state.device.device_id());
    let _ = writeln!(out, "FFmpeg Path: {}", state.config.transcoder.ffmpeg_path);
    let _ = writeln!(out, "Stream Timeout: None (streams indefinitely)");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(out))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("internal error"))
                .unwrap()
        })
}
