use crate::error::CallError;
use crate::media::types::{DeviceInfo, Facing};
use crate::peer::types::{PeerConnectionState, RemoteTrackInfo};
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Idle,
    /// Исходящий: offer отправлен (или готовится)
    Dialing,
    /// Входящий: offer получен, ждём accept
    Ringing,
    Negotiating,
    Connected,
    Terminating,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_id())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Чем закончился звонок
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "reason", content = "error", rename_all = "camelCase")]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    /// Мы отклонили входящий
    Declined,
    /// Собеседник отклонил наш звонок
    Rejected,
    /// Собеседник уже в звонке
    Busy,
    Failed(CallError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub session_id: String,
    pub reason: EndReason,
    pub message: String,
}

impl CallEnded {
    pub fn new(session_id: &SessionId, reason: EndReason) -> Self {
        let message = match &reason {
            EndReason::LocalHangup | EndReason::RemoteHangup => "Call ended".to_owned(),
            EndReason::Declined => "Call declined".to_owned(),
            EndReason::Rejected => "Call rejected".to_owned(),
            EndReason::Busy => "User is busy".to_owned(),
            EndReason::Failed(err) => err.user_message().to_owned(),
        };
        Self {
            session_id: session_id.to_string(),
            reason,
            message,
        }
    }
}

/// Всё, что рисует UI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub session_id: Option<String>,
    pub role: Option<Role>,
    pub state: CallState,
    pub connection_state: Option<PeerConnectionState>,
    pub remote_user_id: Option<String>,
    /// Кто звонит, пока идёт звонок в состоянии Ringing
    pub incoming_from: Option<String>,
    /// Идёт захват медиа или согласование
    pub pending: bool,
    pub buffered_candidates: usize,
    pub remote_tracks: Vec<RemoteTrackInfo>,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub facing: Facing,
    pub audio_devices: Vec<DeviceInfo>,
    pub video_devices: Vec<DeviceInfo>,
    pub selected_audio_device: Option<String>,
    pub selected_video_device: Option<String>,
    pub ended: Option<CallEnded>,
    /// Некритичная ошибка устройства (смена камеры и т.п.)
    pub device_error: Option<String>,
}

impl CallSnapshot {
    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }
}
