pub mod message;
pub mod ws;

pub use message::{HangupReason, SignalTag, SignalingMessage};
pub use ws::WsSignalingChannel;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    Closed,

    #[error("failed to encode signaling message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed signaling frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to connect to relay: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid relay url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Сырые текстовые кадры от relay; разбор делает оркестратор
pub type InboundFrames = mpsc::UnboundedReceiver<String>;

/// Постоянный канал до relay. Никакой логики звонка здесь нет.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Идентичность канала (userId от провайдера аутентификации)
    fn user_id(&self) -> &str;

    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError>;
}
