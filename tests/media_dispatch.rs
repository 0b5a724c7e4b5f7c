//! Router-level behavior of the media port.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use hdhr_proxy::config::Config;
use hdhr_proxy::models::LineupEntry;
use hdhr_proxy::proxy::{ResponseRewriter, SessionRegistry};
use hdhr_proxy::services::{ChannelMap, DeviceInfo, FfmpegCommandBuilder};
use hdhr_proxy::utils::http;
use hdhr_proxy::web::{media_router, AppState};

fn lineup_entry(guide_number: &str, audio_codec: &str) -> LineupEntry {
    serde_json::from_value(serde_json::json!({
        "GuideNumber": guide_number,
        "GuideName": format!("Channel {guide_number}"),
        "AudioCodec": audio_codec,
        "VideoCodec": "HEVC",
    }))
    .unwrap()
}

fn test_state(channel_map: ChannelMap) -> AppState {
    let mut config = Config::default();
    config.tuner.address = "192.168.1.100".to_string();

    AppState {
        control_client: http::control_client(Duration::from_secs(1), Duration::from_secs(1))
            .unwrap(),
        stream_client: http::stream_client(Duration::from_secs(1)).unwrap(),
        device: Arc::new(DeviceInfo::with_device_id("192.168.1.100", "ABCDEF12")),
        channel_map: Arc::new(channel_map),
        registry: SessionRegistry::new(),
        command_builder: Arc::new(FfmpegCommandBuilder::new(config.transcoder.clone())),
        rewriter: Arc::new(ResponseRewriter::new("192.168.1.100", "ABCDEF12")),
        shutdown: CancellationToken::new(),
        config: Arc::new(config),
    }
}

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn empty_channel_returns_400() {
    let router = media_router(test_state(ChannelMap::default()));

    let response = router
        .oneshot(Request::builder().uri("/auto/v").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "Missing channel number");
}

#[tokio::test]
async fn non_v_prefix_returns_404() {
    let router = media_router(test_state(ChannelMap::default()));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/auto/x5.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_path_returns_404() {
    let router = media_router(test_state(ChannelMap::default()));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/lineup.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_capability_counts() {
    let map = ChannelMap::from_lineup(&[
        lineup_entry("5.1", "AC4"),
        lineup_entry("7.1", "AC3"),
    ]);
    let router = media_router(test_state(map));

    let response = router
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("Active Streams: 0"));
    assert!(text.contains("Total Channels: 2"));
    assert!(text.contains("AC4 Audio Channels: 1"));
    assert!(text.contains("HDHomeRun Device: 192.168.1.100"));
    assert!(text.contains("FFmpeg Path: /usr/bin/ffmpeg"));
}

#[tokio::test]
async fn stream_open_failure_maps_to_502() {
    // No tuner is listening on this address, so the upstream dial fails and
    // the handler must answer 502 before any body bytes.
    let mut config = Config::default();
    config.tuner.address = "127.0.0.1".to_string();
    config.web.media_port = 9;

    let mut state = test_state(ChannelMap::default());
    state.config = Arc::new(config);
    let registry = state.registry.clone();
    let router = media_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/auto/v5.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    // The failed session must not linger in the registry.
    assert_eq!(registry.active_count(), 0);
}
