use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hdhr_proxy::{
    config::Config,
    proxy::{ResponseRewriter, SessionRegistry},
    services::{ChannelMap, DeviceInfo, FfmpegCommandBuilder},
    utils::http,
    web::{self, AppState},
};

#[derive(Parser)]
#[command(name = "hdhr-proxy")]
#[command(version)]
#[command(about = "HDHomeRun compatibility gateway that transcodes AC4 audio to EAC3")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// IP address or host:port of the HDHomeRun device
    #[arg(short, long, value_name = "ADDRESS")]
    tuner: Option<String>,

    /// Port for the API server
    #[arg(long, value_name = "PORT")]
    api_port: Option<u16>,

    /// Port for the media server (must stay 5004 for client compatibility)
    #[arg(long, value_name = "PORT")]
    media_port: Option<u16>,

    /// Path to the ffmpeg binary
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<String>,

    /// Log level: error, warn, info, debug
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("hdhr_proxy={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HDHR Proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;

    // CLI flags take precedence over environment and file.
    if let Some(tuner) = cli.tuner {
        config.tuner.address = tuner;
    }
    if let Some(port) = cli.api_port {
        config.web.api_port = port;
    }
    if let Some(port) = cli.media_port {
        config.web.media_port = port;
    }
    if let Some(ffmpeg) = cli.ffmpeg {
        config.transcoder.ffmpeg_path = ffmpeg;
    }

    config.validate()?;

    if config.web.media_port != 5004 {
        warn!(
            "Media port {} differs from 5004; HDHomeRun clients expect 5004 and will not find the streams",
            config.web.media_port
        );
    }

    info!(
        "Configuration loaded: tuner={}, api_port={}, media_port={}, ffmpeg={}",
        config.tuner.address,
        config.web.api_port,
        config.web.media_port,
        config.transcoder.ffmpeg_path
    );

    let control_client =
        http::control_client(config.stream.control_timeout, config.stream.connect_timeout)?;
    let stream_client = http::stream_client(config.stream.connect_timeout)?;

    // Discovery and lineup are best-effort: an unreachable tuner at boot
    // degrades to the fallback device id and an empty channel map.
    let device = Arc::new(DeviceInfo::fetch(&control_client, &config.tuner.address).await);
    let channel_map = Arc::new(ChannelMap::fetch(&control_client, &config.tuner.address).await);
    info!(
        "Device ID: {} (advertising as {})",
        device.device_id(),
        device.reversed_id()
    );

    let rewriter = Arc::new(ResponseRewriter::new(config.tuner_host(), device.device_id()));
    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();

    let _monitor = registry.spawn_monitor(
        config.stream.activity_check_interval,
        config.stream.max_inactivity,
        shutdown.child_token(),
    );

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        control_client,
        stream_client,
        device,
        channel_map,
        registry: registry.clone(),
        command_builder: Arc::new(FfmpegCommandBuilder::new(config.transcoder.clone())),
        rewriter,
        shutdown: shutdown.clone(),
    };

    let api_addr: SocketAddr = format!("{}:{}", config.web.host, config.web.api_port).parse()?;
    let media_addr: SocketAddr = format!("{}:{}", config.web.host, config.web.media_port).parse()?;

    info!("Starting API server on {}", api_addr);
    let mut api_task = tokio::spawn(web::serve(
        api_addr,
        web::api_router(state.clone()),
        shutdown.clone(),
    ));

    info!("Starting media server on {}", media_addr);
    let mut media_task = tokio::spawn(web::serve(
        media_addr,
        web::media_router(state.clone()),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Graceful shutdown initiated...");
        }
        result = &mut api_task => {
            shutdown.cancel();
            result??;
            anyhow::bail!("API server exited unexpectedly");
        }
        result = &mut media_task => {
            shutdown.cancel();
            result??;
            anyhow::bail!("media server exited unexpectedly");
        }
    }

    // Stop the monitor and listeners, then cancel every live session; each
    // performs its own teardown and unregisters itself.
    shutdown.cancel();
    registry.cancel_all();

    let drain = async {
        let _ = api_task.await;
        let _ = media_task.await;
    };
    if tokio::time::timeout(config.stream.shutdown_grace, drain)
        .await
        .is_err()
    {
        warn!("Shutdown deadline exceeded, exiting anyway");
    }

    info!("HDHR Proxy shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
