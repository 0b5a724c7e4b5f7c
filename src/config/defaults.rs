/// Configuration default values
///
/// All defaults live here so they can be changed in one place.

// Listener defaults
pub const DEFAULT_API_PORT: u16 = 80;
// The HDHomeRun client protocol hard-codes 5004; changing this breaks Plex/Emby discovery.
pub const DEFAULT_MEDIA_PORT: u16 = 5004;
pub const DEFAULT_HOST: &str = "0.0.0.0";

// Device identity fallback when discover.json is unreachable
pub const DEFAULT_DEVICE_ID: &str = "00ABCDEF";

// Transcoder defaults
pub const DEFAULT_FFMPEG_PATH: &str = "/usr/bin/ffmpeg";
pub const DEFAULT_AUDIO_BITRATE: &str = "384k";
pub const DEFAULT_AUDIO_CHANNELS: u32 = 2;
pub const DEFAULT_BUFSIZE: &str = "2048k";
pub const DEFAULT_MAXRATE: &str = "30M";
pub const DEFAULT_PRESET: &str = "superfast";
pub const DEFAULT_TUNE: &str = "zerolatency";
pub const DEFAULT_THREAD_QUEUE_SIZE: u32 = 512;
pub const DEFAULT_MAX_MUXING_QUEUE_SIZE: u32 = 256;
pub const DEFAULT_THREADS: u32 = 4;

// Stream session defaults
pub const DEFAULT_CONTROL_TIMEOUT: &str = "30s";
pub const DEFAULT_CONNECT_TIMEOUT: &str = "3s";
pub const DEFAULT_ACTIVITY_CHECK_INTERVAL: &str = "30s";
pub const DEFAULT_MAX_INACTIVITY: &str = "2m";
pub const DEFAULT_SHUTDOWN_GRACE: &str = "10s";
