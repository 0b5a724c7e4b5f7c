//! Transcoder subprocess management.
//!
//! One ffmpeg child per transcoded session: the upstream MPEG-TS is pumped
//! into its stdin, its stdout becomes the client body, and its stderr feeds
//! a rate-limited classifier for the AC4 decoder complaints that live
//! over-the-air reception produces constantly. Those complaints never end a
//! session; only a non-zero exit with a clean AC4 record counts as failure.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::types::is_disconnect_error;
use crate::errors::StreamError;
use crate::services::FfmpegCommandBuilder;
use crate::utils::security::validate_executable;

/// Reset the consecutive-error counter after this long without an error.
const ERROR_RESET_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive errors above this are logged at warn; beyond
/// `MAX_CONSECUTIVE_ERRORS`, at error.
const QUIET_CONSECUTIVE_ERRORS: u32 = 5;
const MAX_CONSECUTIVE_ERRORS: u32 = 20;
/// How long a child that closed stdout gets to exit before being killed.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters for AC4 decoder diagnostics, shared between the stderr reader
/// and the session that classifies the child's exit.
pub struct Ac4ErrorCounters {
    total: AtomicU32,
    consecutive: AtomicU32,
    last_error_millis: AtomicU64,
    epoch: Instant,
}

impl Default for Ac4ErrorCounters {
    fn default() -> Self {
        Self {
            total: AtomicU32::new(0),
            consecutive: AtomicU32::new(0),
            last_error_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }
}

impl Ac4ErrorCounters {
    pub fn total(&self) -> u32 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    /// Record one AC4 diagnostic and return `(total, consecutive)`.
    fn record(&self) -> (u32, u32) {
        self.record_at(self.epoch.elapsed().as_millis() as u64)
    }

    fn record_at(&self, now_millis: u64) -> (u32, u32) {
        let last = self.last_error_millis.load(Ordering::Relaxed);
        if now_millis.saturating_sub(last) > ERROR_RESET_INTERVAL.as_millis() as u64 {
            self.consecutive.store(0, Ordering::Relaxed);
        }

        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        let consecutive = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_error_millis.store(now_millis, Ordering::Relaxed);

        (total, consecutive)
    }

    /// Classify one stderr line, updating counters and logging at a severity
    /// that escalates with the consecutive-error run length.
    pub fn observe_line(&self, channel: &str, line: &str) {
        if is_ac4_diagnostic(line) {
            let (total, consecutive) = self.record();
            let error_kind = describe_ac4_error(line);

            if consecutive <= QUIET_CONSECUTIVE_ERRORS {
                debug!(
                    "AC4 error on channel {}: {} (total: {}, consecutive: {})",
                    channel, error_kind, total, consecutive
                );
            } else if consecutive <= MAX_CONSECUTIVE_ERRORS {
                warn!(
                    "AC4 error on channel {}: {} (total: {}, consecutive: {})",
                    channel, error_kind, total, consecutive
                );
            } else {
                error!(
                    "High AC4 error rate on channel {}: {} (total: {}, consecutive: {}) - stream may have quality issues",
                    channel, error_kind, total, consecutive
                );
            }
        } else if line.contains("Error") {
            error!("FFmpeg critical error: {}", line);
        }
    }
}

/// AC4 decoder diagnostics the classifier counts. Everything else on stderr
/// is either progress chatter or a genuine error line.
fn is_ac4_diagnostic(line: &str) -> bool {
    line.contains("[ac4 @")
        && (line.contains("substream audio data overread")
            || line.contains("Invalid data found when processing input"))
}

/// Compress a diagnostic line to its error kind for log output.
fn describe_ac4_error(line: &str) -> String {
    if let Some(idx) = line.find("substream audio data overread") {
        // Keep the overread count the decoder appends after the colon.
        line[idx..].trim().to_string()
    } else if line.contains("Invalid data found when processing input") {
        "invalid data in input stream".to_string()
    } else {
        "unknown AC4 error".to_string()
    }
}

/// A running ffmpeg child bound to one stream session.
pub struct TranscoderProcess {
    child: Child,
    channel: String,
    pid: Option<u32>,
    counters: Arc<Ac4ErrorCounters>,
}

impl TranscoderProcess {
    /// Validate the binary, spawn it, and wire up the stdin pump and stderr
    /// classifier tasks. The returned process still holds its stdout for the
    /// caller to take.
    pub fn spawn(
        ffmpeg_path: &str,
        builder: &FfmpegCommandBuilder,
        channel: &str,
        upstream: reqwest::Response,
        cancel: CancellationToken,
    ) -> Result<Self, StreamError> {
        validate_executable(ffmpeg_path)?;

        let args = builder.build_args();
        debug!("Starting ffmpeg for channel {} with args: {:?}", channel, args);

        let mut child = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(StreamError::SpawnFailed)?;

        let pid = child.id();
        debug!("ffmpeg process started for channel {} with PID: {:?}", channel, pid);

        let counters = Arc::new(Ac4ErrorCounters::default());

        if let Some(stderr) = child.stderr.take() {
            let counters = counters.clone();
            let channel = channel.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg[{}]: {}", channel, line);
                    counters.observe_line(&channel, &line);
                }
            });
        }

        if let Some(stdin) = child.stdin.take() {
            let channel = channel.to_string();
            tokio::spawn(pump_upstream_to_stdin(upstream, stdin, channel, cancel));
        }

        Ok(Self {
            child,
            channel: channel.to_string(),
            pid,
            counters,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the child's stdout for use as the response body source. Panics if
    /// called twice; the session takes it exactly once.
    pub fn take_stdout(&mut self) -> ChildStdout {
        self.child
            .stdout
            .take()
            .expect("transcoder stdout already taken")
    }

    /// Wait for the child to exit and classify the result. A non-zero exit
    /// after AC4 decoder errors is how live AC4 streams normally end.
    pub async fn wait_and_classify(&mut self) -> Result<(), StreamError> {
        let status = match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Failed to reap ffmpeg for channel {}: {}", self.channel, e);
                return Ok(());
            }
            Err(_) => {
                warn!(
                    "ffmpeg for channel {} closed stdout but did not exit, killing it",
                    self.channel
                );
                self.terminate().await;
                return Ok(());
            }
        };

        if status.success() {
            debug!("Transcoding completed successfully for channel {}", self.channel);
            return Ok(());
        }

        let ac4_errors = self.counters.total();
        if ac4_errors > 0 {
            info!(
                "FFmpeg process ended with {} AC4 decoding errors for channel {} - this is normal for live AC4 streams",
                ac4_errors, self.channel
            );
            return Ok(());
        }

        Err(StreamError::SubprocessFailure {
            status: status.to_string(),
            detail: format!("channel {}", self.channel),
        })
    }

    /// Signal the child to terminate and reap it. Safe to call on an already
    /// dead child; "process already finished" is not an error.
    pub async fn terminate(&mut self) {
        match self.child.start_kill() {
            Ok(()) => debug!("Killed ffmpeg process for channel {} (PID: {:?})", self.channel, self.pid),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                // Already exited.
            }
            Err(e) => warn!("Failed to kill ffmpeg for channel {}: {}", self.channel, e),
        }
        let _ = self.child.wait().await;
    }
}

/// Copy the upstream response body into the child's stdin. A broken pipe
/// means ffmpeg went away first, which the session handles elsewhere; it is
/// not worth an error line here.
async fn pump_upstream_to_stdin(
    mut upstream: reqwest::Response,
    mut stdin: tokio::process::ChildStdin,
    channel: String,
    cancel: CancellationToken,
) {
    debug!("Starting stream copy from tuner to ffmpeg for channel {}", channel);
    let mut total_copied: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Cancelled during tuner to ffmpeg copy for channel {}", channel);
                break;
            }
            chunk = upstream.chunk() => match chunk {
                Ok(Some(bytes)) => {
                    total_copied += bytes.len() as u64;
                    if let Err(e) = stdin.write_all(&bytes).await {
                        if is_disconnect_error(&e.to_string()) {
                            debug!("ffmpeg stdin closed during write for channel {}", channel);
                        } else {
                            error!("Error writing to ffmpeg for channel {}: {}", channel, e);
                        }
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Tuner stream ended for channel {} ({} bytes copied)", channel, total_copied);
                    break;
                }
                Err(e) => {
                    let msg = e.to_string();
                    if !is_disconnect_error(&msg) {
                        error!("Error reading from tuner for channel {}: {}", channel, msg);
                    }
                    break;
                }
            }
        }
    }
    // Dropping stdin closes the pipe so ffmpeg sees EOF and drains.
}
