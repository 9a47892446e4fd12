use crate::config::AudioProcessing;
use crate::utils::random_id;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Какая камера: фронтальная или основная
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    User,
    Environment,
}

impl Facing {
    pub fn flipped(self) -> Facing {
        match self {
            Facing::User => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

/// Предпочтение по устройству одного вида
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DevicePreference {
    pub kind: MediaKind,
    pub device_id: Option<String>,
    /// Только для видео
    pub facing: Option<Facing>,
}

impl DevicePreference {
    pub fn audio(device_id: Option<String>) -> Self {
        Self {
            kind: MediaKind::Audio,
            device_id,
            facing: None,
        }
    }

    pub fn video(device_id: Option<String>, facing: Facing) -> Self {
        Self {
            kind: MediaKind::Video,
            device_id,
            facing: Some(facing),
        }
    }
}

/// Запрос на захват пары аудио + видео
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub audio: Option<DevicePreference>,
    pub video: Option<DevicePreference>,
    pub processing: AudioProcessing,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: MediaKind,
    pub label: String,
    #[serde(default)]
    pub facing: Option<Facing>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Источник захвата за одной дорожкой (камера, микрофон)
pub trait CaptureSource: Send + Sync {
    fn device_id(&self) -> &str;
    fn set_enabled(&self, enabled: bool);
    /// Освобождает устройство
    fn stop(&self);
}

/// Локальная дорожка: источник захвата + RTP дорожка движка
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    source: Arc<dyn CaptureSource>,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, stream_id: &str, source: Arc<dyn CaptureSource>) -> Self {
        let id = format!("{}-{}", kind, random_id());
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.to_owned(),
        ));
        Self {
            id,
            kind,
            source,
            rtp,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn device_id(&self) -> &str {
        self.source.device_id()
    }

    pub fn rtp(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.source.set_enabled(enabled);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Кадр от внешнего захвата. Выключенная или остановленная дорожка
    /// кадры молча пропускает
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<(), MediaError> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }
        self.rtp
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| MediaError::Backend(e.to_string()))
    }

    /// Повторные вызовы ничего не делают
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(track = %self.id, kind = %self.kind, "stopping local track");
            self.source.stop();
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("device_id", &self.device_id())
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Локальный поток: не более одной дорожки каждого вида
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl LocalStream {
    pub fn new(id: String, tracks: Vec<MediaTrack>) -> Self {
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Заменяет дорожку того же вида, возвращает старую
    pub fn replace(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        match self.tracks.iter().position(|t| t.kind() == track.kind()) {
            Some(pos) => Some(std::mem::replace(&mut self.tracks[pos], track)),
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
