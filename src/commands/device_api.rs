use crate::commands::call_api::CallHost;
use crate::media::types::{DeviceInfo, MediaKind};
use bytes::Bytes;
use std::time::Duration;
use tauri::{command, State};

/// Фронтенд сообщает о найденном устройстве захвата
#[command]
pub fn register_capture_device(host: State<'_, CallHost>, device: DeviceInfo) {
    tracing::debug!(device = %device.device_id, kind = %device.kind, "capture device registered");
    host.capture.register_device(device);
}

#[command]
pub fn remove_capture_device(host: State<'_, CallHost>, device_id: String) {
    host.capture.remove_device(&device_id);
}

/// Ответ пользователя на системный запрос доступа к камере/микрофону
#[command]
pub fn set_capture_permission(host: State<'_, CallHost>, granted: bool) {
    tracing::info!(granted, "capture permission changed");
    host.capture.set_permission(granted);
}

/// Кадр от захвата хоста (Opus/VP8) в дорожку текущего звонка.
/// `false`, если активной дорожки этого вида нет.
#[command]
pub async fn push_capture_frame(
    host: State<'_, CallHost>,
    kind: MediaKind,
    data: Vec<u8>,
    duration_ms: u64,
) -> Result<bool, String> {
    let call = host.call()?;
    call.push_frame(kind, Bytes::from(data), Duration::from_millis(duration_ms))
        .await
        .map_err(|e| e.to_string())
}
