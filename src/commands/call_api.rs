use crate::call::{CallOrchestrator, CallSnapshot};
use crate::config::CallConfig;
use crate::media::backend::ExternalCaptureBackend;
use crate::media::manager::MediaDeviceManager;
use crate::media::types::{Facing, MediaKind};
use crate::peer::connection::WebRtcConnector;
use crate::signaling::WsSignalingChannel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tauri::{command, AppHandle, Emitter, State};
use tokio::sync::watch;

/// Событие для фронтенда с полным снимком состояния звонка
pub const STATE_EVENT: &str = "ssc-call-state";

/// Оркестратор текущего пользователя плюс внешний захват,
/// в который фронтенд регистрирует устройства
#[derive(Default)]
pub struct CallHost {
    call: Mutex<Option<CallOrchestrator>>,
    pub(crate) capture: ExternalCaptureBackend,
}

impl CallHost {
    fn lock(&self) -> MutexGuard<'_, Option<CallOrchestrator>> {
        self.call.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Клон ручки, чтобы не держать замок через await
    pub(crate) fn call(&self) -> Result<CallOrchestrator, String> {
        self.lock()
            .clone()
            .ok_or_else(|| "not connected to signaling".to_string())
    }

    fn with_call(&self, op: impl FnOnce(&CallOrchestrator)) -> Result<(), String> {
        match self.lock().as_ref() {
            Some(call) => {
                op(call);
                Ok(())
            }
            None => Err("not connected to signaling".into()),
        }
    }
}

fn forward_state(app: AppHandle, mut state: watch::Receiver<CallSnapshot>) {
    tauri::async_runtime::spawn(async move {
        loop {
            let snapshot = state.borrow_and_update().clone();
            if let Err(e) = app.emit(STATE_EVENT, &snapshot) {
                tracing::warn!(error = %e, "failed to emit call state");
            }
            if state.changed().await.is_err() {
                break;
            }
        }
        tracing::debug!("call state forwarding stopped");
    });
}

/// Подключение к relay под userId от провайдера аутентификации.
/// Повторный вызов заменяет оркестратор (старый звонок завершается).
#[command]
pub async fn connect(
    app: AppHandle,
    host: State<'_, CallHost>,
    user_id: String,
    config: Option<CallConfig>,
) -> Result<(), String> {
    let config = config.unwrap_or_default();
    config.validate().map_err(|e| e.to_string())?;
    let url = config
        .signaling_url
        .clone()
        .ok_or_else(|| "signaling URL is not configured".to_string())?;

    tracing::info!(user = %user_id, url = %url, "connecting to relay");
    let (channel, inbound) = WsSignalingChannel::connect(&url, &user_id)
        .await
        .map_err(|e| e.to_string())?;

    let media = MediaDeviceManager::new(Arc::new(host.capture.clone()), config.audio_processing);
    let connector = Arc::new(WebRtcConnector::new(config.ice_servers.clone()));
    let call = CallOrchestrator::spawn(Arc::new(channel), inbound, media, connector, config);
    forward_state(app, call.subscribe());

    *host.lock() = Some(call);
    Ok(())
}

/// Отпускает оркестратор; активный звонок завершается
#[command]
pub fn disconnect(host: State<'_, CallHost>) -> bool {
    host.lock().take().is_some()
}

#[command]
pub fn call_state(host: State<'_, CallHost>) -> Option<CallSnapshot> {
    host.lock().as_ref().map(CallOrchestrator::snapshot)
}

#[command]
pub fn place_call(host: State<'_, CallHost>, target_user_id: String) -> Result<(), String> {
    host.with_call(|call| call.place_call(target_user_id))
}

#[command]
pub fn accept_incoming(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::accept_incoming)
}

#[command]
pub fn reject_incoming(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::reject_incoming)
}

#[command]
pub fn hangup(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::hangup)
}

#[command]
pub fn toggle_microphone(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::toggle_microphone)
}

#[command]
pub fn toggle_camera(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::toggle_camera)
}

#[command]
pub fn switch_camera(host: State<'_, CallHost>, facing: Option<Facing>) -> Result<(), String> {
    host.with_call(|call| call.switch_camera(facing))
}

#[command]
pub fn list_devices(host: State<'_, CallHost>) -> Result<(), String> {
    host.with_call(CallOrchestrator::list_devices)
}

#[command]
pub fn switch_device(
    host: State<'_, CallHost>,
    kind: MediaKind,
    device_id: String,
) -> Result<(), String> {
    host.with_call(|call| call.switch_device(kind, device_id))
}
