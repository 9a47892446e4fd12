use crate::config::AudioProcessing;
use crate::media::backend::CaptureBackend;
use crate::media::types::{
    CaptureRequest, DeviceInfo, DevicePreference, Facing, LocalStream, MediaError, MediaKind,
    MediaTrack,
};
use crate::utils::random_id;
use std::sync::Arc;

/// Захват по запросу, отвязанный от менеджера: его можно увезти в отдельную
/// задачу, пока оркестратор обрабатывает другие события
pub struct MediaAcquirer {
    backend: Arc<dyn CaptureBackend>,
    request: CaptureRequest,
}

impl MediaAcquirer {
    pub async fn acquire(self) -> Result<LocalStream, MediaError> {
        let stream_id = format!("local-{}", random_id());
        let mut tracks: Vec<MediaTrack> = Vec::with_capacity(2);

        for preference in [self.request.audio.as_ref(), self.request.video.as_ref()]
            .into_iter()
            .flatten()
        {
            match self
                .backend
                .open(preference, &self.request.processing)
                .await
            {
                Ok(source) => tracks.push(MediaTrack::new(preference.kind, &stream_id, source)),
                Err(e) => {
                    // то, что уже успели открыть, отпускаем
                    for track in &tracks {
                        track.stop();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(stream = %stream_id, tracks = tracks.len(), "local media acquired");
        Ok(LocalStream::new(stream_id, tracks))
    }
}

/// Владелец локального потока. Сессия звонка поток только одалживает.
pub struct MediaDeviceManager {
    backend: Arc<dyn CaptureBackend>,
    processing: AudioProcessing,
    audio_device: Option<String>,
    video_device: Option<String>,
    facing: Facing,
    microphone_enabled: bool,
    camera_enabled: bool,
    current: Option<LocalStream>,
    devices: Vec<DeviceInfo>,
}

impl MediaDeviceManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, processing: AudioProcessing) -> Self {
        Self {
            backend,
            processing,
            audio_device: None,
            video_device: None,
            facing: Facing::User,
            microphone_enabled: true,
            camera_enabled: true,
            current: None,
            devices: Vec::new(),
        }
    }

    pub fn request(&self) -> CaptureRequest {
        CaptureRequest {
            audio: Some(DevicePreference::audio(self.audio_device.clone())),
            video: Some(DevicePreference::video(self.video_device.clone(), self.facing)),
            processing: self.processing,
        }
    }

    pub fn acquirer(&self) -> MediaAcquirer {
        MediaAcquirer {
            backend: self.backend.clone(),
            request: self.request(),
        }
    }

    /// Захват с текущими предпочтениями; поток сразу переходит во владение
    pub async fn acquire(&mut self) -> Result<LocalStream, MediaError> {
        let stream = self.acquirer().acquire().await?;
        self.adopt(stream.clone());
        Ok(stream)
    }

    /// Принимает поток, захваченный через [`MediaAcquirer`]
    pub fn adopt(&mut self, stream: LocalStream) {
        self.release();
        for track in stream.tracks() {
            track.set_enabled(self.kind_enabled(track.kind()));
            match track.kind() {
                MediaKind::Audio => self.audio_device = Some(track.device_id().to_owned()),
                MediaKind::Video => self.video_device = Some(track.device_id().to_owned()),
            }
        }
        self.current = Some(stream);
    }

    /// Останавливает текущий поток; `false` если останавливать нечего
    pub fn release(&mut self) -> bool {
        match self.current.take() {
            Some(stream) => {
                tracing::debug!(stream = %stream.id(), "releasing local stream");
                stream.stop();
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<&LocalStream> {
        self.current.as_ref()
    }

    pub async fn enumerate(&mut self) -> Result<&[DeviceInfo], MediaError> {
        self.devices = self.backend.enumerate().await?;
        Ok(&self.devices)
    }

    pub fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    pub fn selected_device(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Audio => self.audio_device.as_deref(),
            MediaKind::Video => self.video_device.as_deref(),
        }
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    fn kind_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.microphone_enabled,
            MediaKind::Video => self.camera_enabled,
        }
    }

    fn apply_enabled(&self, kind: MediaKind) {
        if let Some(track) = self.current.as_ref().and_then(|s| s.track(kind)) {
            track.set_enabled(self.kind_enabled(kind));
        }
    }

    pub fn toggle_microphone(&mut self) -> bool {
        self.microphone_enabled = !self.microphone_enabled;
        self.apply_enabled(MediaKind::Audio);
        self.microphone_enabled
    }

    pub fn toggle_camera(&mut self) -> bool {
        self.camera_enabled = !self.camera_enabled;
        self.apply_enabled(MediaKind::Video);
        self.camera_enabled
    }

    /// Меняет устройство одного вида. Если поток активен, старая дорожка
    /// останавливается, новая захватывается и возвращается для replaceTrack.
    /// Дорожка другого вида не трогается.
    pub async fn switch_device(
        &mut self,
        kind: MediaKind,
        device_id: Option<String>,
    ) -> Result<Option<MediaTrack>, MediaError> {
        match kind {
            MediaKind::Audio => self.audio_device = device_id.clone(),
            MediaKind::Video => self.video_device = device_id.clone(),
        }

        let Some(stream) = self.current.as_ref() else {
            return Ok(None);
        };
        let stream_id = stream.id().to_owned();
        if let Some(old) = stream.track(kind) {
            old.stop();
        }

        let preference = match kind {
            MediaKind::Audio => DevicePreference::audio(device_id),
            MediaKind::Video => DevicePreference::video(device_id, self.facing),
        };
        let source = self.backend.open(&preference, &self.processing).await?;
        let track = MediaTrack::new(kind, &stream_id, source);
        track.set_enabled(self.kind_enabled(kind));
        match kind {
            MediaKind::Audio => self.audio_device = Some(track.device_id().to_owned()),
            MediaKind::Video => self.video_device = Some(track.device_id().to_owned()),
        }

        if let Some(stream) = self.current.as_mut() {
            stream.replace(track.clone());
        }
        tracing::info!(%kind, device = %track.device_id(), "switched input device");
        Ok(Some(track))
    }

    /// Переключение фронтальной/основной камеры
    pub async fn switch_camera(&mut self, facing: Facing) -> Result<Option<MediaTrack>, MediaError> {
        self.facing = facing;
        self.switch_device(MediaKind::Video, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCapture;

    fn manager(capture: &ScriptedCapture) -> MediaDeviceManager {
        MediaDeviceManager::new(Arc::new(capture.clone()), AudioProcessing::default())
    }

    #[tokio::test]
    async fn acquire_then_release_once() {
        let capture = ScriptedCapture::with_default_devices();
        let mut media = manager(&capture);
        let stream = media.acquire().await.unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(media.selected_device(MediaKind::Audio), Some("mic-1"));

        assert!(media.release());
        assert!(!media.release());
        assert_eq!(capture.stop_count("mic-1"), 1);
        assert_eq!(capture.stop_count("cam-front"), 1);
    }

    #[tokio::test]
    async fn failed_video_releases_audio() {
        let capture = ScriptedCapture::with_default_devices();
        capture.fail_kind(MediaKind::Video, MediaError::DeviceBusy("cam-front".into()));
        let mut media = manager(&capture);
        let err = media.acquire().await.unwrap_err();
        assert_eq!(err, MediaError::DeviceBusy("cam-front".into()));
        assert_eq!(capture.stop_count("mic-1"), 1);
        assert!(media.current().is_none());
    }

    #[tokio::test]
    async fn switch_device_leaves_other_kind_running() {
        let capture = ScriptedCapture::with_default_devices();
        let mut media = manager(&capture);
        media.acquire().await.unwrap();

        let track = media
            .switch_device(MediaKind::Video, Some("cam-back".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.device_id(), "cam-back");
        assert_eq!(capture.stop_count("cam-front"), 1);
        assert_eq!(capture.stop_count("mic-1"), 0);

        let stream = media.current().unwrap();
        assert!(!stream.track(MediaKind::Audio).unwrap().is_stopped());
        assert_eq!(stream.track(MediaKind::Video).unwrap().device_id(), "cam-back");
    }

    #[tokio::test]
    async fn switch_without_stream_only_records_preference() {
        let capture = ScriptedCapture::with_default_devices();
        let mut media = manager(&capture);
        let swapped = media
            .switch_device(MediaKind::Audio, Some("mic-2".into()))
            .await
            .unwrap();
        assert!(swapped.is_none());
        assert_eq!(media.request().audio.unwrap().device_id.as_deref(), Some("mic-2"));
    }

    #[tokio::test]
    async fn toggles_survive_reacquire() {
        let capture = ScriptedCapture::with_default_devices();
        let mut media = manager(&capture);
        media.acquire().await.unwrap();
        assert!(!media.toggle_microphone());
        assert!(!media.current().unwrap().track(MediaKind::Audio).unwrap().is_enabled());

        media.release();
        let stream = media.acquire().await.unwrap();
        assert!(!stream.track(MediaKind::Audio).unwrap().is_enabled());
        assert!(stream.track(MediaKind::Video).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn flip_camera_uses_facing() {
        let capture = ScriptedCapture::with_default_devices();
        let mut media = manager(&capture);
        media.acquire().await.unwrap();
        let track = media
            .switch_camera(media.facing().flipped())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.device_id(), "cam-back");
        assert_eq!(media.facing(), Facing::Environment);
    }
}
