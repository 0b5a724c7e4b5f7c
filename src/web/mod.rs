//! HTTP surface.
//!
//! Two listeners impersonate the tuner: the API port forwards and rewrites
//! control-plane traffic, the media port serves the streaming dataplane.
//! Handlers stay thin; the session and rewrite logic lives in `proxy`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::proxy::{ResponseRewriter, SessionRegistry};
use crate::services::{ChannelMap, DeviceInfo, FfmpegCommandBuilder};

pub mod api;
pub mod media;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub control_client: reqwest::Client,
    pub stream_client: reqwest::Client,
    pub device: Arc<DeviceInfo>,
    pub channel_map: Arc<ChannelMap>,
    pub registry: Arc<SessionRegistry>,
    pub command_builder: Arc<FfmpegCommandBuilder>,
    pub rewriter: Arc<ResponseRewriter>,
    pub shutdown: CancellationToken,
}

/// Router for the media port: stream dispatch and the status page.
/// Anything else is a 404, matching the device.
pub fn media_router(state: AppState) -> Router {
    Router::new()
        .route("/auto/{stream}", get(media::stream_channel))
        .route("/status", get(media::status))
        .with_state(state)
}

/// Router for the API port: every path the device exposes is forwarded and
/// rewritten, so a single catch-all handler covers the whole surface.
pub fn api_router(state: AppState) -> Router {
    Router::new().fallback(api::proxy_request).with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(addr: SocketAddr, router: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
