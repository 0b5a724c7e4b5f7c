use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use crate::errors::AppError;
use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub tuner: TunerConfig,
    pub web: WebConfig,
    pub transcoder: TranscoderConfig,
    pub stream: StreamConfig,
}

/// Upstream tuner addressing. `address` is the only option without a usable
/// default; everything else can run out of the box.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TunerConfig {
    /// Host or `host:port` of the HDHomeRun device.
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Must stay 5004: HDHomeRun clients address the media port by convention.
    #[serde(default = "default_media_port")]
    pub media_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,
    #[serde(default = "default_bufsize")]
    pub bufsize: String,
    #[serde(default = "default_maxrate")]
    pub maxrate: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_tune")]
    pub tune: String,
    #[serde(default = "default_thread_queue_size")]
    pub thread_queue_size: u32,
    #[serde(default = "default_max_muxing_queue_size")]
    pub max_muxing_queue_size: u32,
    #[serde(default = "default_threads")]
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Total request timeout for control-plane calls (discovery, lineup,
    /// API forwarding). Stream requests never get a total timeout.
    #[serde(with = "duration_serde::duration", default = "default_control_timeout")]
    pub control_timeout: Duration,
    #[serde(with = "duration_serde::duration", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(
        with = "duration_serde::duration",
        default = "default_activity_check_interval"
    )]
    pub activity_check_interval: Duration,
    #[serde(with = "duration_serde::duration", default = "default_max_inactivity")]
    pub max_inactivity: Duration,
    #[serde(with = "duration_serde::duration", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_media_port() -> u16 {
    DEFAULT_MEDIA_PORT
}

fn default_ffmpeg_path() -> String {
    DEFAULT_FFMPEG_PATH.to_string()
}

fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

fn default_audio_channels() -> u32 {
    DEFAULT_AUDIO_CHANNELS
}

fn default_bufsize() -> String {
    DEFAULT_BUFSIZE.to_string()
}

fn default_maxrate() -> String {
    DEFAULT_MAXRATE.to_string()
}

fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}

fn default_tune() -> String {
    DEFAULT_TUNE.to_string()
}

fn default_thread_queue_size() -> u32 {
    DEFAULT_THREAD_QUEUE_SIZE
}

fn default_max_muxing_queue_size() -> u32 {
    DEFAULT_MAX_MUXING_QUEUE_SIZE
}

fn default_threads() -> u32 {
    DEFAULT_THREADS
}

fn default_control_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_CONTROL_TIMEOUT).unwrap()
}

fn default_connect_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_CONNECT_TIMEOUT).unwrap()
}

fn default_activity_check_interval() -> Duration {
    humantime::parse_duration(DEFAULT_ACTIVITY_CHECK_INTERVAL).unwrap()
}

fn default_max_inactivity() -> Duration {
    humantime::parse_duration(DEFAULT_MAX_INACTIVITY).unwrap()
}

fn default_shutdown_grace() -> Duration {
    humantime::parse_duration(DEFAULT_SHUTDOWN_GRACE).unwrap()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            media_port: default_media_port(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            audio_bitrate: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
            bufsize: default_bufsize(),
            maxrate: default_maxrate(),
            preset: default_preset(),
            tune: default_tune(),
            thread_queue_size: default_thread_queue_size(),
            max_muxing_queue_size: default_max_muxing_queue_size(),
            threads: default_threads(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            control_timeout: default_control_timeout(),
            connect_timeout: default_connect_timeout(),
            activity_check_interval: default_activity_check_interval(),
            max_inactivity: default_max_inactivity(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Config {
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            tracing::debug!(
                "Config file '{}' not found, using defaults and environment",
                config_file
            );

            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Env::prefixed("HDHR_PROXY_").split("__"))
                .extract()?;

            return Ok(config);
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("HDHR_PROXY_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tuner.address.is_empty() {
            return Err(AppError::configuration(
                "tuner address is required (--tuner, HDHR_PROXY_TUNER__ADDRESS, or [tuner] address)",
            ));
        }
        if self.transcoder.ffmpeg_path.is_empty() {
            return Err(AppError::configuration("transcoder path must not be empty"));
        }
        if self.transcoder.audio_channels == 0 {
            return Err(AppError::configuration("audio_channels must be at least 1"));
        }
        Ok(())
    }

    /// Host portion of the tuner address, without any port suffix.
    pub fn tuner_host(&self) -> &str {
        self.tuner
            .address
            .split_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.tuner.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.web.api_port, 80);
        assert_eq!(config.web.media_port, 5004);
        assert_eq!(config.transcoder.ffmpeg_path, "/usr/bin/ffmpeg");
        assert_eq!(config.stream.control_timeout, Duration::from_secs(30));
        assert_eq!(config.stream.max_inactivity, Duration::from_secs(120));
    }

    #[test]
    fn validate_requires_tuner_address() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tuner.address = "192.168.1.100".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tuner_host_strips_port() {
        let mut config = Config::default();
        config.tuner.address = "192.168.1.100:8080".to_string();
        assert_eq!(config.tuner_host(), "192.168.1.100");

        config.tuner.address = "192.168.1.100".to_string();
        assert_eq!(config.tuner_host(), "192.168.1.100");
    }
}
