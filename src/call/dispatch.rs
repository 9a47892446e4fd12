//! Таблица обработчиков входящих сообщений relay.
//!
//! Обработчики чистые: смотрят на текущую сессию и сообщение и возвращают
//! следующее состояние плюс список эффектов. Исполняет эффекты оркестратор.

use crate::call::session::CallSession;
use crate::call::state::{CallState, EndReason, Role};
use crate::error::CallError;
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::signaling::{HangupReason, SignalTag, SignalingMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(SignalingMessage),
    /// Создать входящую сессию в Ringing
    OpenIncoming {
        from_user_id: String,
        offer: SessionDescription,
        candidates: Vec<IceCandidate>,
    },
    /// setRemoteDescription(answer) у звонящего
    ApplyAnswer(SessionDescription),
    /// Удалённые кандидаты: применить или положить в очередь
    AcceptCandidates(Vec<IceCandidate>),
    Terminate {
        reason: EndReason,
        notify: Option<HangupReason>,
    },
    Ignore(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Фиксируется после успешного выполнения всех эффектов
    pub next: Option<CallState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(effects: Vec<Effect>) -> Self {
        Self {
            next: None,
            effects,
        }
    }

    fn to(next: CallState, effects: Vec<Effect>) -> Self {
        Self {
            next: Some(next),
            effects,
        }
    }

    fn ignore(why: &'static str) -> Self {
        Self::stay(vec![Effect::Ignore(why)])
    }
}

type Handler = fn(Option<&CallSession>, SignalingMessage) -> Transition;

fn handler(tag: SignalTag) -> Handler {
    match tag {
        SignalTag::OfferAwaiting => on_offer,
        SignalTag::AnswerResponse => on_answer,
        SignalTag::AnswerAck => on_answer_ack,
        SignalTag::IceCandidate => on_candidate,
        SignalTag::HangupNotice => on_hangup,
        SignalTag::Unreachable => on_unreachable,
        SignalTag::NewOffer | SignalTag::NewAnswer | SignalTag::HangupRequest => outbound_only,
    }
}

pub fn dispatch(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    handler(message.tag())(session, message)
}

fn outbound_only(_: Option<&CallSession>, _: SignalingMessage) -> Transition {
    Transition::ignore("outbound-only event received")
}

fn on_offer(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::OfferAwaiting {
        sdp,
        from_user_id,
        candidates,
    } = message
    else {
        return Transition::ignore("tag mismatch");
    };

    match session {
        None => Transition::to(
            CallState::Ringing,
            vec![Effect::OpenIncoming {
                from_user_id,
                offer: sdp,
                candidates,
            }],
        ),
        // повтор того же offer от того же собеседника
        Some(s)
            if s.role() == Role::Answerer
                && s.remote_user_id() == from_user_id
                && s.remote_offer() == Some(&sdp) =>
        {
            Transition::ignore("duplicate offer")
        }
        Some(_) => Transition::stay(vec![Effect::Send(SignalingMessage::HangupRequest {
            to_user_id: from_user_id,
            reason: HangupReason::Busy,
        })]),
    }
}

fn on_answer(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::AnswerResponse {
        sdp,
        from_user_id,
        candidates,
    } = message
    else {
        return Transition::ignore("tag mismatch");
    };
    let Some(s) = session else {
        return Transition::ignore("answer without session");
    };
    if from_user_id
        .as_deref()
        .is_some_and(|from| from != s.remote_user_id())
    {
        return Transition::ignore("answer from another user");
    }
    if s.role() != Role::Offerer || s.state() != CallState::Dialing || s.remote_description_set() {
        return Transition::ignore("answer not expected in this state");
    }
    let mut effects = vec![Effect::ApplyAnswer(sdp)];
    let fresh: Vec<IceCandidate> = candidates
        .into_iter()
        .filter(|c| !s.has_seen_candidate(c))
        .collect();
    if !fresh.is_empty() {
        effects.push(Effect::AcceptCandidates(fresh));
    }
    Transition::to(CallState::Negotiating, effects)
}

fn on_answer_ack(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::AnswerAck { candidates } = message else {
        return Transition::ignore("tag mismatch");
    };
    match session {
        Some(s) if s.role() == Role::Answerer => fresh_candidates(s, candidates),
        Some(_) => Transition::ignore("answer ack for offerer"),
        None => Transition::ignore("answer ack without session"),
    }
}

fn on_candidate(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::IceCandidate {
        candidate,
        did_i_offer,
        ..
    } = message
    else {
        return Transition::ignore("tag mismatch");
    };
    let Some(s) = session else {
        return Transition::ignore("candidate without session");
    };
    // didIOffer выставляет отправитель: от звонящего к нам, если мы отвечаем
    if did_i_offer == (s.role() == Role::Offerer) {
        return Transition::ignore("own candidate echoed back");
    }
    fresh_candidates(s, vec![candidate])
}

fn fresh_candidates(session: &CallSession, candidates: Vec<IceCandidate>) -> Transition {
    let fresh: Vec<IceCandidate> = candidates
        .into_iter()
        .filter(|c| !session.has_seen_candidate(c))
        .collect();
    if fresh.is_empty() {
        return Transition::ignore("no new candidates");
    }
    Transition::stay(vec![Effect::AcceptCandidates(fresh)])
}

fn on_hangup(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::HangupNotice {
        from_user_id,
        reason,
    } = message
    else {
        return Transition::ignore("tag mismatch");
    };
    match session {
        Some(s) if s.remote_user_id() == from_user_id => {
            let reason = match reason {
                HangupReason::Hangup => EndReason::RemoteHangup,
                HangupReason::Rejected => EndReason::Rejected,
                HangupReason::Busy => EndReason::Busy,
                HangupReason::Failed => EndReason::Failed(CallError::Negotiation(
                    "remote side reported failure".into(),
                )),
            };
            Transition::to(
                CallState::Idle,
                vec![Effect::Terminate {
                    reason,
                    notify: None,
                }],
            )
        }
        Some(_) => Transition::ignore("hangup from another user"),
        None => Transition::ignore("hangup without session"),
    }
}

fn on_unreachable(session: Option<&CallSession>, message: SignalingMessage) -> Transition {
    let SignalingMessage::Unreachable { user_id } = message else {
        return Transition::ignore("tag mismatch");
    };
    match session {
        Some(s) if s.remote_user_id() == user_id => Transition::to(
            CallState::Idle,
            vec![Effect::Terminate {
                reason: EndReason::Failed(CallError::SignalingDelivery(format!(
                    "{user_id} is offline"
                ))),
                notify: None,
            }],
        ),
        _ => Transition::ignore("unreachable notice for another user"),
    }
}
