use crate::signaling::{InboundFrames, SignalingChannel, SignalingError, SignalingMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
};
use url::Url;

/// WebSocket до relay. Пользователь передаётся в query (`?userId=`),
/// как это делает провайдер аутентификации.
pub struct WsSignalingChannel {
    user_id: String,
    outbound: mpsc::UnboundedSender<String>,
}

impl WsSignalingChannel {
    pub async fn connect(
        relay_url: &str,
        user_id: &str,
    ) -> Result<(Self, InboundFrames), SignalingError> {
        let mut url = Url::parse(relay_url)?;
        url.query_pairs_mut().append_pair("userId", user_id);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        tracing::debug!(url = %url, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if ws_write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(len = data.len(), "dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!("signaling websocket closed: {err}");
                            }
                            _ => tracing::warn!("signaling websocket error: {err}"),
                        }
                        break;
                    }
                };
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                user_id: user_id.to_owned(),
                outbound,
            },
            inbound_rx,
        ))
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        let text = message.encode()?;
        tracing::trace!(event = %message.tag(), len = text.len(), "ws out");
        self.outbound.send(text).map_err(|_| SignalingError::Closed)
    }
}
