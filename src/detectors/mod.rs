pub mod channel_watching;
pub mod disk_space;
pub mod recording_events;
pub mod vod_watching;

pub use channel_watching::ChannelWatchingDetector;
pub use disk_space::DiskSpaceDetector;
pub use recording_events::RecordingEventsDetector;
pub use vod_watching::VodWatchingDetector;
