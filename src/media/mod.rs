pub mod backend;
pub mod manager;
pub mod types;

pub use backend::{CaptureBackend, ExternalCaptureBackend};
pub use manager::{MediaAcquirer, MediaDeviceManager};
pub use types::{
    CaptureSource, DeviceInfo, DevicePreference, Facing, LocalStream, MediaError, MediaKind,
    MediaTrack,
};
