//! Upstream HTTP clients.
//!
//! Two clients with distinct timeout policies share the same transport
//! tuning: the control client bounds the whole request, the stream client
//! only bounds the dial so a live stream can run indefinitely. Both talk to
//! a single upstream host, so the idle pool stays small.

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Client for control-plane calls: discovery, lineup, API forwarding.
pub fn control_client(total_timeout: Duration, connect_timeout: Duration) -> Result<Client> {
    Ok(base_builder(connect_timeout).timeout(total_timeout).build()?)
}

/// Client for media streams. No total timeout: a stream stays open until one
/// side closes it; liveness is the activity monitor's job.
pub fn stream_client(connect_timeout: Duration) -> Result<Client> {
    Ok(base_builder(connect_timeout).build()?)
}

fn base_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(15))
        .http1_only()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_build() {
        control_client(Duration::from_secs(30), Duration::from_secs(3)).unwrap();
        stream_client(Duration::from_secs(3)).unwrap();
    }
}
