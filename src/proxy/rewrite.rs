//! Response body rewriting for the API proxy.
//!
//! Control-plane responses from the tuner embed its own identity: device id,
//! address, and the AC4 codec label. All three must be replaced so clients
//! talk to the gateway and believe the audio is something they can play.
//! The rewrite is a single pass with the more specific pattern winning at
//! each position.

use bytes::Bytes;
use futures::Stream;
use tracing::{debug, error};

/// Bodies above this size are rewritten line by line instead of in memory.
pub const MAX_IN_MEMORY_SIZE: u64 = 1024 * 1024;

pub struct ResponseRewriter {
    device_id: String,
    reversed_id: String,
    tuner_host: String,
}

impl ResponseRewriter {
    pub fn new(tuner_host: &str, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            reversed_id: device_id.chars().rev().collect(),
            tuner_host: tuner_host.to_string(),
        }
    }

    /// Rewrite one body in a single pass. `request_host` is the Host header
    /// the client used to reach the gateway, with or without a port.
    pub fn rewrite(&self, content: &str, request_host: &str) -> String {
        let host_name = request_host.split(':').next().unwrap_or(request_host);
        let host_port = request_host
            .split_once(':')
            .map(|(_, port)| port)
            .unwrap_or("80");
        // Port 80 is implied; advertising it confuses some clients.
        let host_with_port = if host_port == "80" {
            host_name.to_string()
        } else {
            request_host.to_string()
        };

        let tuner_with_media_port = format!("{}:5004", self.tuner_host);
        let host_with_media_port = format!("{host_name}:5004");

        let mut result = String::with_capacity(content.len() + 256);
        let mut i = 0;

        while i < content.len() {
            let rest = &content[i..];

            if !self.device_id.is_empty() && rest.starts_with(&self.device_id) {
                result.push_str(&self.reversed_id);
                i += self.device_id.len();
                continue;
            }

            if rest.starts_with(&tuner_with_media_port) {
                result.push_str(&host_with_media_port);
                i += tuner_with_media_port.len();
                continue;
            }

            if rest.starts_with(&self.tuner_host) {
                let after = &rest[self.tuner_host.len()..];
                if after.starts_with(':') {
                    // Some other port on the tuner; leave the address alone
                    // by advancing a single character.
                    let ch = rest.chars().next().unwrap();
                    result.push(ch);
                    i += ch.len_utf8();
                    continue;
                }
                result.push_str(&host_with_port);
                i += self.tuner_host.len();
                continue;
            }

            if rest.starts_with("AC4") {
                result.push_str("AC3");
                i += 3;
                continue;
            }

            let ch = rest.chars().next().unwrap();
            result.push(ch);
            i += ch.len_utf8();
        }

        result
    }

    /// Line-oriented rewrite of a large body. Each complete line goes through
    /// the same single-pass transform; correctness relies on the tuner not
    /// splitting tokens across lines, which holds for its JSON output.
    pub fn rewrite_stream(
        self: std::sync::Arc<Self>,
        upstream: reqwest::Response,
        request_host: String,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        struct RewriteState {
            rewriter: std::sync::Arc<ResponseRewriter>,
            upstream: reqwest::Response,
            request_host: String,
            carry: Vec<u8>,
            done: bool,
        }

        let state = RewriteState {
            rewriter: self,
            upstream,
            request_host,
            carry: Vec::new(),
            done: false,
        };

        futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.done {
                    return None;
                }

                match st.upstream.chunk().await {
                    Ok(Some(bytes)) => {
                        st.carry.extend_from_slice(&bytes);

                        // Emit everything up to the last complete line.
                        let Some(split) = st.carry.iter().rposition(|&b| b == b'\n') else {
                            continue;
                        };
                        let remainder = st.carry.split_off(split + 1);
                        let complete = std::mem::replace(&mut st.carry, remainder);

                        let text = String::from_utf8_lossy(&complete);
                        let rewritten = st.rewriter.rewrite(&text, &st.request_host);
                        return Some((Ok(Bytes::from(rewritten.into_bytes())), st));
                    }
                    Ok(None) => {
                        st.done = true;
                        if st.carry.is_empty() {
                            return None;
                        }
                        let text = String::from_utf8_lossy(&st.carry);
                        let rewritten = st.rewriter.rewrite(&text, &st.request_host);
                        debug!("Flushed {} trailing bytes from line rewriter", rewritten.len());
                        return Some((Ok(Bytes::from(rewritten.into_bytes())), st));
                    }
                    Err(e) => {
                        st.done = true;
                        error!("Error reading tuner response during rewrite: {}", e);
                        return Some((Err(std::io::Error::other(e)), st));
                    }
                }
            }
        })
    }
}

/// Content types whose bodies get rewritten. Everything else streams through
/// untouched.
pub fn needs_rewrite(content_type: &str) -> bool {
    content_type.contains("application/json")
        || content_type.contains("text/html")
        || content_type.contains("text/plain")
        || content_type.contains("text/xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> ResponseRewriter {
        ResponseRewriter::new("192.168.1.100", "ABCDEF12")
    }

    #[test]
    fn rewrites_all_patterns_in_one_pass() {
        let body = "dev ABCDEF12 at 192.168.1.100:5004 codec AC4";
        let result = rewriter().rewrite(body, "proxy.local");
        assert_eq!(result, "dev 21FEDCBA at proxy.local:5004 codec AC3");
    }

    #[test]
    fn bare_tuner_address_gets_client_host_and_port() {
        let result = rewriter().rewrite("http://192.168.1.100/lineup.json", "proxy.local:8080");
        assert_eq!(result, "http://proxy.local:8080/lineup.json");
    }

    #[test]
    fn port_80_is_omitted() {
        let result = rewriter().rewrite("http://192.168.1.100/discover.json", "proxy.local:80");
        assert_eq!(result, "http://proxy.local/discover.json");
    }

    #[test]
    fn other_tuner_ports_are_left_alone() {
        let result = rewriter().rewrite("http://192.168.1.100:8080/x", "proxy.local");
        assert_eq!(result, "http://192.168.1.100:8080/x");
    }

    #[test]
    fn media_port_rewrite_is_idempotent() {
        let r = rewriter();
        let once = r.rewrite("stream at 192.168.1.100:5004/auto/v5.1", "proxy.local");
        let twice = r.rewrite(&once, "proxy.local");
        assert_eq!(once, twice);
    }

    #[test]
    fn device_id_takes_precedence_over_codec_token() {
        // A device id containing "AC4" must reverse as a unit, not be
        // half-rewritten as a codec label.
        let r = ResponseRewriter::new("192.168.1.100", "AC412345");
        let result = r.rewrite("id=AC412345 codec=AC4", "proxy.local");
        assert_eq!(result, "id=54321CA4 codec=AC3");
    }

    #[test]
    fn json_lineup_body_round_trip() {
        let body = r#"[{"GuideNumber":"5.1","AudioCodec":"AC4","URL":"http://192.168.1.100:5004/auto/v5.1"}]"#;
        let result = rewriter().rewrite(body, "gateway.lan:80");
        assert_eq!(
            result,
            r#"[{"GuideNumber":"5.1","AudioCodec":"AC3","URL":"http://gateway.lan:5004/auto/v5.1"}]"#
        );
    }

    #[test]
    fn content_type_classification() {
        assert!(needs_rewrite("application/json; charset=utf-8"));
        assert!(needs_rewrite("text/html"));
        assert!(needs_rewrite("text/plain"));
        assert!(needs_rewrite("text/xml"));
        assert!(!needs_rewrite("video/MP2T"));
        assert!(!needs_rewrite("application/octet-stream"));
    }
}
