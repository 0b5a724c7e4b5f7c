//! Per-request stream sessions.
//!
//! A session wires the tuner's MPEG-TS stream to the client, either directly
//! or through the transcoder subprocess. All resources hang off a
//! `SessionGuard` embedded in the response body's stream state: whichever
//! way the stream ends (upstream EOF, error, client disconnect, eviction,
//! shutdown), dropping the body drops the guard and teardown runs exactly
//! once.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::types::is_disconnect_error;
use crate::errors::StreamError;
use crate::proxy::registry::{ActivityStamp, SessionHandle, SessionRegistry};
use crate::services::transcoder::TranscoderProcess;
use crate::web::AppState;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Owns everything a session must release: the cancellation token for its
/// helper tasks and, when transcoding, the child process. Dropping the guard
/// is the single teardown path.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
    transcoder: Option<TranscoderProcess>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.handle.cancel.cancel();

        if let Some(mut transcoder) = self.transcoder.take() {
            // Drop runs on the runtime (the body stream lives in hyper), so
            // the kill-and-reap can finish asynchronously.
            tokio::spawn(async move { transcoder.terminate().await });
        }

        if self
            .registry
            .complete(&self.handle.channel, self.handle.session_id)
            .is_some()
        {
            info!(
                "{} session for channel {} ended after {:.2} seconds",
                if self.handle.transcoding { "Transcoding" } else { "Direct streaming" },
                self.handle.channel,
                self.handle.started_at.elapsed().as_secs_f64()
            );
        }
    }
}

/// Open the upstream stream for `channel` and serve it, transcoded or not.
pub async fn serve(state: &AppState, channel: &str, transcode: bool) -> Response<Body> {
    let handle = state
        .registry
        .begin_session(channel, transcode, &state.shutdown)
        .await;
    let guard = SessionGuard {
        registry: state.registry.clone(),
        handle: handle.clone(),
        transcoder: None,
    };

    let upstream = match open_upstream(state, channel).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("Failed to open stream for channel {}: {}", channel, e);
            let msg = match &e {
                StreamError::UpstreamStatus { status } => {
                    format!("Invalid response from tuner: {status}")
                }
                _ => "Failed to fetch stream from tuner".to_string(),
            };
            return error_response(StatusCode::BAD_GATEWAY, &msg);
        }
    };

    if transcode {
        serve_transcoded(state, channel, upstream, guard)
    } else {
        serve_direct(channel, upstream, guard)
    }
}

/// Open the tuner's stream for a channel. The stream client has no total
/// timeout, so only the dial and the status line can fail here.
async fn open_upstream(
    state: &AppState,
    channel: &str,
) -> Result<reqwest::Response, StreamError> {
    let source_url = format!(
        "http://{}:{}/auto/v{}",
        state.config.tuner_host(),
        state.config.web.media_port,
        channel
    );
    debug!("Connecting to source URL: {}", source_url);

    let upstream = state
        .stream_client
        .get(source_url.as_str())
        .send()
        .await
        .map_err(|e| StreamError::UpstreamUnavailable {
            url: source_url.clone(),
            source: e,
        })?;

    let status = upstream.status();
    if status != StatusCode::OK {
        return Err(StreamError::UpstreamStatus {
            status: status.as_u16(),
        });
    }

    Ok(upstream)
}

/// Copy the upstream body verbatim, stamping activity on every chunk.
fn serve_direct(channel: &str, upstream: reqwest::Response, guard: SessionGuard) -> Response<Body> {
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/MP2T")
        .to_string();

    debug!("Starting direct stream copy for channel {}", channel);

    struct DirectState {
        upstream: reqwest::Response,
        channel: String,
        activity: Arc<ActivityStamp>,
        cancel: CancellationToken,
        _guard: SessionGuard,
    }

    let state = DirectState {
        upstream,
        channel: channel.to_string(),
        activity: guard.handle.activity.clone(),
        cancel: guard.handle.cancel.clone(),
        _guard: guard,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        tokio::select! {
            _ = st.cancel.cancelled() => {
                debug!("Session cancelled during direct stream for channel {}", st.channel);
                None
            }
            chunk = st.upstream.chunk() => match chunk {
                Ok(Some(bytes)) => {
                    st.activity.touch();
                    Some((Ok::<_, std::io::Error>(bytes), st))
                }
                Ok(None) => {
                    debug!("Finished direct stream copy for channel {}", st.channel);
                    None
                }
                Err(e) => {
                    let msg = e.to_string();
                    if is_disconnect_error(&msg) {
                        debug!("Disconnect during direct stream for channel {}: {}", st.channel, msg);
                    } else {
                        error!("Error in stream copy from tuner for channel {}: {}", st.channel, msg);
                    }
                    None
                }
            }
        }
    });

    stream_response(&content_type, Body::from_stream(stream))
}

/// Plumb the upstream through ffmpeg and serve the child's stdout.
fn serve_transcoded(
    state: &AppState,
    channel: &str,
    upstream: reqwest::Response,
    mut guard: SessionGuard,
) -> Response<Body> {
    let process = match TranscoderProcess::spawn(
        &state.config.transcoder.ffmpeg_path,
        &state.command_builder,
        channel,
        upstream,
        guard.handle.cancel.clone(),
    ) {
        Ok(process) => process,
        Err(e) => {
            error!("Failed to start transcoder for channel {}: {}", channel, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to start transcoder",
            );
        }
    };

    struct TranscodedState {
        stdout: ChildStdout,
        buf: Vec<u8>,
        channel: String,
        activity: Arc<ActivityStamp>,
        cancel: CancellationToken,
        guard: SessionGuard,
    }

    let mut process = process;
    debug!(
        "Registered ffmpeg process {:?} for channel {}",
        process.pid(),
        channel
    );
    let stdout = process.take_stdout();
    let activity = guard.handle.activity.clone();
    let cancel = guard.handle.cancel.clone();
    guard.transcoder = Some(process);

    let state = TranscodedState {
        stdout,
        buf: vec![0u8; COPY_BUFFER_SIZE],
        channel: channel.to_string(),
        activity,
        cancel,
        guard,
    };

    debug!("Starting stream copy from ffmpeg to response for channel {}", channel);

    let stream = futures::stream::unfold(state, |mut st| async move {
        tokio::select! {
            _ = st.cancel.cancelled() => {
                debug!("Session cancelled during transcoded stream for channel {}", st.channel);
                None
            }
            read = st.stdout.read(&mut st.buf) => match read {
                Ok(0) => {
                    // ffmpeg closed stdout; reap it and decide whether the
                    // exit was a real failure. Headers are long gone, so a
                    // failure here can only be logged.
                    if let Some(process) = st.guard.transcoder.as_mut() {
                        if let Err(e) = process.wait_and_classify().await {
                            error!("Transcoding error for channel {}: {}", st.channel, e);
                        }
                    }
                    None
                }
                Ok(n) => {
                    st.activity.touch();
                    let chunk = Bytes::copy_from_slice(&st.buf[..n]);
                    Some((Ok::<_, std::io::Error>(chunk), st))
                }
                Err(e) => {
                    let msg = e.to_string();
                    if is_disconnect_error(&msg) {
                        debug!("Disconnect during transcoded stream for channel {}: {}", st.channel, msg);
                    } else {
                        error!("Error reading ffmpeg output for channel {}: {}", st.channel, msg);
                    }
                    None
                }
            }
        }
    });

    stream_response("video/MP2T", Body::from_stream(stream))
}

fn stream_response(content_type: &str, body: Body) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("internal error"))
                .unwrap()
        })
}

pub fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(msg.to_string()))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("internal error"))
                .unwrap()
        })
}
