//! FFmpeg argument construction.
//!
//! The argument vector has a fixed shape; only the tunable slots (bitrate,
//! channels, rates, preset) come from configuration. Nothing request-derived
//! ever lands in the vector: input and output are both pipes.

use crate::config::TranscoderConfig;

pub struct FfmpegCommandBuilder {
    config: TranscoderConfig,
}

impl FfmpegCommandBuilder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Arguments for one transcode run: MPEG-TS on stdin, video copied,
    /// audio re-encoded to EAC3, MPEG-TS on stdout. The error-tolerance
    /// flags keep the decoder alive through the packet corruption that
    /// over-the-air reception produces constantly; `-strict experimental`
    /// is required because ffmpeg gates the AC4 decoder behind it.
    pub fn build_args(&self) -> Vec<String> {
        let c = &self.config;
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "warning".into(),
            "-err_detect".into(),
            "ignore_err".into(),
            "-fflags".into(),
            "+discardcorrupt".into(),
            "-strict".into(),
            "experimental".into(),
            "-thread_queue_size".into(),
            c.thread_queue_size.to_string(),
            "-i".into(),
            "pipe:0".into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "eac3".into(),
            "-b:a".into(),
            c.audio_bitrate.clone(),
            "-ac".into(),
            c.audio_channels.to_string(),
            "-bufsize".into(),
            c.bufsize.clone(),
            "-maxrate".into(),
            c.maxrate.clone(),
            "-preset".into(),
            c.preset.clone(),
            "-tune".into(),
            c.tune.clone(),
            "-max_muxing_queue_size".into(),
            c.max_muxing_queue_size.to_string(),
            "-threads".into(),
            c.threads.to_string(),
            "-f".into(),
            "mpegts".into(),
            "pipe:1".into(),
        ]
    }
}
