use crate::config::AudioProcessing;
use crate::media::types::{
    CaptureSource, DeviceInfo, DevicePreference, Facing, MediaError, MediaKind,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Доступ к устройствам захвата.
///
/// `open` может надолго зависнуть: на десктопе за ним стоит запрос
/// разрешения у пользователя.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(
        &self,
        preference: &DevicePreference,
        processing: &AudioProcessing,
    ) -> Result<Arc<dyn CaptureSource>, MediaError>;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError>;
}

#[derive(Debug, Default)]
struct ExternalState {
    devices: Vec<DeviceInfo>,
    denied: bool,
    open: HashSet<String>,
}

/// Бэкенд для внешнего захвата: устройства регистрирует хост-приложение
/// (нативный захват или фронтенд), а кадры оно же пишет через
/// [`CallOrchestrator::push_frame`](crate::call::CallOrchestrator::push_frame).
#[derive(Debug, Clone, Default)]
pub struct ExternalCaptureBackend {
    state: Arc<Mutex<ExternalState>>,
}

impl ExternalCaptureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        let backend = Self::new();
        backend.lock().devices = devices;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, ExternalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_device(&self, device: DeviceInfo) {
        let mut state = self.lock();
        state.devices.retain(|d| d.device_id != device.device_id);
        state.devices.push(device);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.lock().devices.retain(|d| d.device_id != device_id);
    }

    /// Ответ пользователя на запрос доступа
    pub fn set_permission(&self, granted: bool) {
        self.lock().denied = !granted;
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.lock().open.contains(device_id)
    }
}

/// Выбор устройства: явный id, затем сторона камеры, затем первое подходящее
pub(crate) fn pick_device<'a>(
    devices: &'a [DeviceInfo],
    preference: &DevicePreference,
) -> Result<&'a DeviceInfo, MediaError> {
    let mut of_kind = devices.iter().filter(|d| d.kind == preference.kind);

    if let Some(wanted) = &preference.device_id {
        return of_kind
            .find(|d| &d.device_id == wanted)
            .ok_or_else(|| MediaError::DeviceNotFound(wanted.clone()));
    }

    let candidates: Vec<&DeviceInfo> = of_kind.by_ref().collect();
    if let Some(facing) = preference.facing {
        if let Some(device) = candidates
            .iter()
            .find(|d| d.facing.unwrap_or(Facing::User) == facing)
        {
            return Ok(*device);
        }
    }
    candidates
        .first()
        .copied()
        .ok_or_else(|| MediaError::DeviceNotFound(format!("no {} input", preference.kind)))
}

#[async_trait]
impl CaptureBackend for ExternalCaptureBackend {
    async fn open(
        &self,
        preference: &DevicePreference,
        processing: &AudioProcessing,
    ) -> Result<Arc<dyn CaptureSource>, MediaError> {
        let mut state = self.lock();
        if state.denied {
            return Err(MediaError::PermissionDenied);
        }
        let device_id = pick_device(&state.devices, preference)?.device_id.clone();
        if !state.open.insert(device_id.clone()) {
            return Err(MediaError::DeviceBusy(device_id));
        }
        if preference.kind == MediaKind::Audio {
            tracing::debug!(device = %device_id, ?processing, "opening audio input");
        } else {
            tracing::debug!(device = %device_id, facing = ?preference.facing, "opening video input");
        }
        Ok(Arc::new(ExternalSource {
            device_id,
            enabled: AtomicBool::new(true),
            state: self.state.clone(),
        }))
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(self.lock().devices.clone())
    }
}

struct ExternalSource {
    device_id: String,
    enabled: AtomicBool,
    state: Arc<Mutex<ExternalState>>,
}

impl CaptureSource for ExternalSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .remove(&self.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, kind: MediaKind, facing: Option<Facing>) -> DeviceInfo {
        DeviceInfo {
            device_id: id.into(),
            kind,
            label: id.into(),
            facing,
        }
    }

    fn backend() -> ExternalCaptureBackend {
        ExternalCaptureBackend::with_devices(vec![
            device("mic-1", MediaKind::Audio, None),
            device("cam-front", MediaKind::Video, Some(Facing::User)),
            device("cam-back", MediaKind::Video, Some(Facing::Environment)),
        ])
    }

    #[tokio::test]
    async fn picks_camera_by_facing() {
        let backend = backend();
        let source = backend
            .open(
                &DevicePreference::video(None, Facing::Environment),
                &AudioProcessing::default(),
            )
            .await
            .unwrap();
        assert_eq!(source.device_id(), "cam-back");
        assert!(backend.is_open("cam-back"));
        source.stop();
        assert!(!backend.is_open("cam-back"));
    }

    #[tokio::test]
    async fn open_device_is_busy_until_stopped() {
        let backend = backend();
        let pref = DevicePreference::audio(Some("mic-1".into()));
        let first = backend.open(&pref, &AudioProcessing::default()).await.unwrap();
        let second = backend.open(&pref, &AudioProcessing::default()).await;
        assert!(matches!(second, Err(MediaError::DeviceBusy(id)) if id == "mic-1"));
        first.stop();
        assert!(backend.open(&pref, &AudioProcessing::default()).await.is_ok());
    }

    #[tokio::test]
    async fn denied_permission_and_unknown_device() {
        let backend = backend();
        let missing = backend
            .open(
                &DevicePreference::audio(Some("nope".into())),
                &AudioProcessing::default(),
            )
            .await;
        assert!(matches!(missing, Err(MediaError::DeviceNotFound(_))));

        backend.set_permission(false);
        let denied = backend
            .open(&DevicePreference::audio(None), &AudioProcessing::default())
            .await;
        assert!(matches!(denied, Err(MediaError::PermissionDenied)));
    }
}
