pub mod device;
pub mod ffmpeg_command;
pub mod lineup;
pub mod transcoder;

pub use device::DeviceInfo;
pub use ffmpeg_command::FfmpegCommandBuilder;
pub use lineup::ChannelMap;
