//! Device identity.
//!
//! The gateway advertises itself with the character-reversed device id so
//! clients that have seen the real tuner never confuse the two and
//! short-circuit around the proxy.

use reqwest::Client;
use tracing::{debug, warn};

use crate::config::defaults::DEFAULT_DEVICE_ID;
use crate::models::DiscoverInfo;

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    tuner_address: String,
    device_id: String,
}

impl DeviceInfo {
    /// Fetch the device id from the tuner's discovery endpoint. Any failure
    /// falls back to the fixed default id; the gateway still works, it just
    /// advertises the placeholder identity.
    pub async fn fetch(client: &Client, tuner_address: &str) -> Self {
        let url = format!("http://{tuner_address}/discover.json");
        debug!("Fetching device ID from {}", url);

        let device_id = match Self::fetch_device_id(client, &url).await {
            Ok(id) if !id.is_empty() => {
                debug!("Discovered device ID: {}", id);
                id
            }
            Ok(_) => {
                warn!("Tuner reported an empty DeviceID, using default");
                DEFAULT_DEVICE_ID.to_string()
            }
            Err(e) => {
                warn!(
                    "Failed to fetch device ID from {} ({}), using default",
                    tuner_address, e
                );
                DEFAULT_DEVICE_ID.to_string()
            }
        };

        Self {
            tuner_address: tuner_address.to_string(),
            device_id,
        }
    }

    async fn fetch_device_id(client: &Client, url: &str) -> Result<String, reqwest::Error> {
        let resp = client.get(url).send().await?.error_for_status()?;
        let discovery: DiscoverInfo = resp.json().await?;
        Ok(discovery.device_id)
    }

    /// Build a descriptor without touching the network. Used by tests and by
    /// the rewriter's unit coverage.
    pub fn with_device_id(tuner_address: &str, device_id: &str) -> Self {
        Self {
            tuner_address: tuner_address.to_string(),
            device_id: device_id.to_string(),
        }
    }

    pub fn tuner_address(&self) -> &str {
        &self.tuner_address
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The identity advertised downstream.
    pub fn reversed_id(&self) -> String {
        self.device_id.chars().rev().collect()
    }
}
