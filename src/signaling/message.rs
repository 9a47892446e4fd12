use crate::peer::types::{IceCandidate, SessionDescription};
use crate::signaling::SignalingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Почему собеседник (или мы) кладёт трубку
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HangupReason {
    #[default]
    Hangup,
    Rejected,
    Busy,
    Failed,
}

/// Сообщения relay. На проводе: `{"event": "<name>", "data": {...}}`.
///
/// Исходящие: `NewOffer`, `NewAnswer`, `IceCandidate`, `HangupRequest`.
/// Входящие: `OfferAwaiting`, `AnswerResponse`, `AnswerAck`, `IceCandidate`,
/// `HangupNotice`, `Unreachable`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    #[serde(rename = "newOffer", rename_all = "camelCase")]
    NewOffer {
        sdp: SessionDescription,
        to_user_id: String,
    },

    #[serde(rename = "newOfferAwaiting", rename_all = "camelCase")]
    OfferAwaiting {
        sdp: SessionDescription,
        from_user_id: String,
        /// Кандидаты звонящего, которые relay успел накопить
        #[serde(default)]
        candidates: Vec<IceCandidate>,
    },

    #[serde(rename = "newAnswer", rename_all = "camelCase")]
    NewAnswer {
        sdp: SessionDescription,
        to_user_id: String,
        /// Кандидаты отвечающего, собранные до отправки answer
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<IceCandidate>,
    },

    /// Подтверждение relay на newAnswer с накопленными кандидатами
    #[serde(rename = "newAnswerAck", rename_all = "camelCase")]
    AnswerAck {
        #[serde(default)]
        candidates: Vec<IceCandidate>,
    },

    #[serde(rename = "answerResponse", rename_all = "camelCase")]
    AnswerResponse {
        sdp: SessionDescription,
        #[serde(default)]
        from_user_id: Option<String>,
        /// Кандидаты из `newAnswer`, если relay их пересылает
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<IceCandidate>,
    },

    #[serde(
        rename = "sendIceCandidateToSignalingServer",
        alias = "receivedIceCandidateFromServer",
        rename_all = "camelCase"
    )]
    IceCandidate {
        #[serde(rename = "iceCandidate")]
        candidate: IceCandidate,
        did_i_offer: bool,
        /// Адресат, заполняет только звонящий
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_to_user_id: Option<String>,
        /// Звонящий для обеих сторон: у звонящего это он сам, у отвечающего
        /// адресат, по нему relay и маршрутизирует
        #[serde(default)]
        ice_user_id: Option<String>,
    },

    #[serde(rename = "hangupCall", rename_all = "camelCase")]
    HangupRequest {
        to_user_id: String,
        #[serde(default)]
        reason: HangupReason,
    },

    #[serde(rename = "hangupCallReq", rename_all = "camelCase")]
    HangupNotice {
        from_user_id: String,
        #[serde(default)]
        reason: HangupReason,
    },

    /// relay не смог доставить сообщение адресату
    #[serde(rename = "userUnavailable", rename_all = "camelCase")]
    Unreachable { user_id: String },
}

/// Дискриминант сообщения для таблицы обработчиков
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTag {
    NewOffer,
    OfferAwaiting,
    NewAnswer,
    AnswerAck,
    AnswerResponse,
    IceCandidate,
    HangupRequest,
    HangupNotice,
    Unreachable,
}

impl fmt::Display for SignalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl SignalingMessage {
    pub fn tag(&self) -> SignalTag {
        match self {
            SignalingMessage::NewOffer { .. } => SignalTag::NewOffer,
            SignalingMessage::OfferAwaiting { .. } => SignalTag::OfferAwaiting,
            SignalingMessage::NewAnswer { .. } => SignalTag::NewAnswer,
            SignalingMessage::AnswerAck { .. } => SignalTag::AnswerAck,
            SignalingMessage::AnswerResponse { .. } => SignalTag::AnswerResponse,
            SignalingMessage::IceCandidate { .. } => SignalTag::IceCandidate,
            SignalingMessage::HangupRequest { .. } => SignalTag::HangupRequest,
            SignalingMessage::HangupNotice { .. } => SignalTag::HangupNotice,
            SignalingMessage::Unreachable { .. } => SignalTag::Unreachable,
        }
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(SignalingError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(raw).map_err(SignalingError::Decode)
    }
}
