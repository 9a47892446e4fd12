use crate::media::types::MediaTrack;
use crate::peer::types::{IceCandidate, PeerEvent, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Операция не имеет смысла в текущем signaling state
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("peer connection closed")]
    Closed,

    #[error("engine error: {0}")]
    Engine(String),
}

impl From<webrtc::Error> for AdapterError {
    fn from(err: webrtc::Error) -> Self {
        match err {
            webrtc::Error::ErrConnectionClosed => AdapterError::Closed,
            other => AdapterError::Engine(other.to_string()),
        }
    }
}

/// Узкий контракт над движком согласования и транспорта.
///
/// Реализация не обязана быть потокобезопасной по порядку вызовов:
/// оркестратор вызывает методы строго последовательно.
#[async_trait]
pub trait PeerConnectionAdapter: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, AdapterError>;
    async fn create_answer(&self) -> Result<SessionDescription, AdapterError>;
    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), AdapterError>;
    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), AdapterError>;
    /// `InvalidState`, пока remote description не установлен
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AdapterError>;
    async fn add_track(&self, track: &MediaTrack) -> Result<(), AdapterError>;
    /// Подмена дорожки без нового offer/answer
    async fn replace_track(&self, track: &MediaTrack) -> Result<(), AdapterError>;
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Куда адаптер шлёт события движка
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Фабрика адаптеров: по одному на звонок
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnectionAdapter>, AdapterError>;
}
