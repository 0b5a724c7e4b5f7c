//! Channel capability map.
//!
//! A boot-time snapshot of the tuner's lineup recording which channels carry
//! AC4 audio. Lineup changes over a process lifetime are rare enough that no
//! refresh is done; restart the gateway after a channel scan.

use std::collections::HashMap;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::models::LineupEntry;

#[derive(Debug, Default)]
pub struct ChannelMap {
    channels: HashMap<String, bool>,
}

impl ChannelMap {
    /// Fetch `lineup.json` and classify each channel. On any failure the map
    /// is left empty, which makes every channel transcode.
    pub async fn fetch(client: &Client, tuner_address: &str) -> Self {
        let url = format!("http://{tuner_address}/lineup.json");
        debug!("Fetching lineup from {}", url);

        match Self::fetch_lineup(client, &url).await {
            Ok(lineup) => Self::from_lineup(&lineup),
            Err(e) => {
                warn!("Failed to fetch channel lineup from {}: {}", tuner_address, e);
                Self::default()
            }
        }
    }

    async fn fetch_lineup(client: &Client, url: &str) -> Result<Vec<LineupEntry>, reqwest::Error> {
        let resp = client.get(url).send().await?.error_for_status()?;
        resp.json().await
    }

    pub fn from_lineup(lineup: &[LineupEntry]) -> Self {
        let mut channels = HashMap::with_capacity(lineup.len());
        let mut ac4_count = 0;

        for entry in lineup {
            let has_ac4 = entry.audio_codec.to_uppercase() == "AC4";
            channels.insert(entry.guide_number.clone(), has_ac4);

            if has_ac4 {
                ac4_count += 1;
                info!(
                    "Identified AC4 audio channel: {} - {} (Audio: {}, Video: {})",
                    entry.guide_number, entry.guide_name, entry.audio_codec, entry.video_codec
                );
            } else {
                debug!(
                    "Regular channel: {} - {} (Audio: {}, Video: {})",
                    entry.guide_number,
                    entry.guide_name,
                    or_unknown(&entry.audio_codec),
                    or_unknown(&entry.video_codec)
                );
            }
        }

        info!(
            "Found {} channels with AC4 audio out of {} total channels",
            ac4_count,
            lineup.len()
        );

        Self { channels }
    }

    /// Whether a channel's audio must be re-encoded. Unknown channels are
    /// assumed to need it.
    pub fn needs_transcode(&self, channel: &str) -> bool {
        match self.channels.get(channel) {
            Some(&has_ac4) => has_ac4,
            None => {
                debug!("Unknown channel {}, assuming it may have AC4 audio", channel);
                true
            }
        }
    }

    pub fn total_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn ac4_channels(&self) -> usize {
        self.channels.values().filter(|&&ac4| ac4).count()
    }
}

fn or_unknown(codec: &str) -> &str {
    if codec.is_empty() { "Unknown" } else { codec }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(guide_number: &str, audio_codec: &str) -> LineupEntry {
        serde_json::from_value(serde_json::json!({
            "GuideNumber": guide_number,
            "GuideName": format!("Channel {guide_number}"),
            "AudioCodec": audio_codec,
            "VideoCodec": "HEVC",
        }))
        .unwrap()
    }

    #[test]
    fn classifies_ac4_case_insensitively() {
        let map = ChannelMap::from_lineup(&[
            entry("5.1", "AC4"),
            entry("7.1", "AC3"),
            entry("9.1", "ac4"),
        ]);

        assert!(map.needs_transcode("5.1"));
        assert!(!map.needs_transcode("7.1"));
        assert!(map.needs_transcode("9.1"));
        assert_eq!(map.total_channels(), 3);
        assert_eq!(map.ac4_channels(), 2);
    }

    #[test]
    fn unknown_channel_needs_transcode() {
        let map = ChannelMap::from_lineup(&[entry("7.1", "AC3")]);
        assert!(map.needs_transcode("42.3"));
    }

    #[test]
    fn empty_map_transcodes_everything() {
        let map = ChannelMap::default();
        assert!(map.needs_transcode("5.1"));
        assert_eq!(map.total_channels(), 0);
        assert_eq!(map.ac4_channels(), 0);
    }

    #[test]
    fn missing_audio_codec_is_not_ac4() {
        let map = ChannelMap::from_lineup(&[entry("11.1", "")]);
        assert!(!map.needs_transcode("11.1"));
    }
}
