use crate::media::types::MediaError;
use crate::peer::adapter::AdapterError;
use crate::signaling::SignalingError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Причины, по которым звонок завершается с ошибкой.
///
/// Любой сбой внутри сессии приводится к одному из этих вариантов и
/// попадает в наблюдаемое состояние вместе с терминальным переходом.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum CallError {
    /// Нет доступа к камере/микрофону или устройство занято
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Собеседник офлайн или relay не доставил сообщение
    #[error("signaling delivery failed: {0}")]
    SignalingDelivery(String),

    /// Некорректный SDP или нарушение состояния адаптера
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("no viable candidate pair within {0}s")]
    IceFailureTimeout(u64),

    #[error("no answer within {0}s")]
    AnswerTimeout(u64),
}

impl CallError {
    /// Текст для UI
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::MediaAcquisition(_) => {
                "Could not access camera or microphone. Check device permissions and try again."
            }
            CallError::SignalingDelivery(_) | CallError::AnswerTimeout(_) => "User unavailable",
            CallError::Negotiation(_) | CallError::IceFailureTimeout(_) => "Call failed",
        }
    }

    /// Нужно ли сообщать собеседнику о завершении (если он вообще в курсе)
    pub fn notifies_remote(&self) -> bool {
        matches!(
            self,
            CallError::IceFailureTimeout(_) | CallError::Negotiation(_) | CallError::AnswerTimeout(_)
        )
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        CallError::MediaAcquisition(err.to_string())
    }
}

impl From<AdapterError> for CallError {
    fn from(err: AdapterError) -> Self {
        CallError::Negotiation(err.to_string())
    }
}

impl From<SignalingError> for CallError {
    fn from(err: SignalingError) -> Self {
        CallError::SignalingDelivery(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("server {0}: URL cannot be empty")]
    EmptyUrl(String),

    #[error("server {0}: TURN servers require username and credential")]
    MissingTurnCredentials(String),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_user_messages() {
        assert_eq!(
            CallError::AnswerTimeout(30).user_message(),
            CallError::SignalingDelivery("offline".into()).user_message()
        );
        assert_eq!(
            CallError::from(MediaError::PermissionDenied).user_message(),
            CallError::MediaAcquisition(String::new()).user_message()
        );
        assert!(matches!(
            CallError::from(AdapterError::Closed),
            CallError::Negotiation(_)
        ));
    }

    #[test]
    fn local_and_delivery_failures_stay_local() {
        assert!(CallError::IceFailureTimeout(20).notifies_remote());
        assert!(CallError::AnswerTimeout(30).notifies_remote());
        assert!(!CallError::SignalingDelivery("offline".into()).notifies_remote());
        assert!(!CallError::MediaAcquisition("denied".into()).notifies_remote());
    }
}
