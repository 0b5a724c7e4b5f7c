//! Wire types for the tuner's JSON endpoints.

use serde::Deserialize;

/// One channel record from `lineup.json`.
///
/// The tuner omits codec fields for some channels; defaults keep
/// deserialization tolerant.
#[derive(Debug, Clone, Deserialize)]
pub struct LineupEntry {
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    #[serde(rename = "GuideName", default)]
    pub guide_name: String,
    #[serde(rename = "AudioCodec", default)]
    pub audio_codec: String,
    #[serde(rename = "VideoCodec", default)]
    pub video_codec: String,
}

/// The subset of `discover.json` the gateway cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverInfo {
    #[serde(rename = "DeviceID", default)]
    pub device_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineup_entry_tolerates_missing_codecs() {
        let entry: LineupEntry =
            serde_json::from_str(r#"{"GuideNumber":"7.1","GuideName":"KQED"}"#).unwrap();
        assert_eq!(entry.guide_number, "7.1");
        assert_eq!(entry.audio_codec, "");
    }

    #[test]
    fn discover_info_parses_device_id() {
        let info: DiscoverInfo =
            serde_json::from_str(r#"{"DeviceID":"ABCDEF12","ModelNumber":"HDHR5-4K"}"#).unwrap();
        assert_eq!(info.device_id, "ABCDEF12");
    }
}
