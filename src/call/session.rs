use crate::call::state::{CallState, Role, SessionId};
use crate::peer::adapter::{AdapterError, PeerConnectionAdapter};
use crate::peer::ice::CandidateBuffer;
use crate::peer::types::{IceCandidate, PeerConnectionState, RemoteTrackInfo, SessionDescription};
use std::sync::Arc;

/// Один звонок с одним собеседником.
///
/// Роль задаётся при создании и не меняется. Локальный поток принадлежит
/// менеджеру устройств.
pub struct CallSession {
    id: SessionId,
    role: Role,
    state: CallState,
    remote_user_id: String,
    remote_offer: Option<SessionDescription>,
    adapter: Option<Arc<dyn PeerConnectionAdapter>>,
    remote_tracks: Vec<RemoteTrackInfo>,
    candidates: CandidateBuffer,
    local_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    remote_engaged: bool,
    connection_state: Option<PeerConnectionState>,
    step_in_flight: bool,
    disconnect_epoch: u64,
}

impl CallSession {
    fn new(role: Role, state: CallState, remote_user_id: String) -> Self {
        Self {
            id: SessionId::generate(),
            role,
            state,
            remote_user_id,
            remote_offer: None,
            adapter: None,
            remote_tracks: Vec::new(),
            candidates: CandidateBuffer::new(),
            local_candidates: Vec::new(),
            remote_description_set: false,
            remote_engaged: false,
            connection_state: None,
            step_in_flight: false,
            disconnect_epoch: 0,
        }
    }

    /// Исходящий звонок
    pub fn outgoing(remote_user_id: impl Into<String>) -> Self {
        Self::new(Role::Offerer, CallState::Dialing, remote_user_id.into())
    }

    /// Входящий звонок: offer уже на руках, собеседник ждёт ответа
    pub fn incoming(remote_user_id: impl Into<String>, offer: SessionDescription) -> Self {
        let mut session = Self::new(Role::Answerer, CallState::Ringing, remote_user_id.into());
        session.remote_offer = Some(offer);
        session.remote_engaged = true;
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn set_state(&mut self, next: CallState) {
        if self.state != next {
            tracing::info!(session = %self.id, from = ?self.state, to = ?next, "call state");
            self.state = next;
        }
    }

    pub fn remote_user_id(&self) -> &str {
        &self.remote_user_id
    }

    pub fn remote_offer(&self) -> Option<&SessionDescription> {
        self.remote_offer.as_ref()
    }

    pub fn adapter(&self) -> Option<&Arc<dyn PeerConnectionAdapter>> {
        self.adapter.as_ref()
    }

    /// Привязка результата долгого шага (захват + адаптер)
    pub fn attach(&mut self, adapter: Arc<dyn PeerConnectionAdapter>) {
        self.adapter = Some(adapter);
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn mark_remote_description_set(&mut self) {
        self.remote_description_set = true;
    }

    /// Собеседник уже знает о звонке (offer/answer ушли или пришли)
    pub fn remote_engaged(&self) -> bool {
        self.remote_engaged
    }

    pub fn mark_remote_engaged(&mut self) {
        self.remote_engaged = true;
    }

    pub fn step_in_flight(&self) -> bool {
        self.step_in_flight
    }

    pub fn begin_step(&mut self) {
        self.step_in_flight = true;
    }

    pub fn end_step(&mut self) {
        self.step_in_flight = false;
    }

    pub fn connection_state(&self) -> Option<PeerConnectionState> {
        self.connection_state
    }

    pub fn set_connection_state(&mut self, state: PeerConnectionState) {
        self.connection_state = Some(state);
    }

    /// Новая эпоха разрыва; старые таймеры grace period по ней отсеиваются
    pub fn bump_disconnect_epoch(&mut self) -> u64 {
        self.disconnect_epoch += 1;
        self.disconnect_epoch
    }

    pub fn disconnect_epoch(&self) -> u64 {
        self.disconnect_epoch
    }

    pub fn remote_tracks(&self) -> &[RemoteTrackInfo] {
        &self.remote_tracks
    }

    pub fn add_remote_track(&mut self, track: RemoteTrackInfo) {
        if !self.remote_tracks.iter().any(|t| t.id == track.id) {
            self.remote_tracks.push(track);
        }
    }

    pub fn record_local_candidate(&mut self, candidate: IceCandidate) {
        self.local_candidates.push(candidate);
    }

    pub fn local_candidates(&self) -> &[IceCandidate] {
        &self.local_candidates
    }

    pub fn has_seen_candidate(&self, candidate: &IceCandidate) -> bool {
        self.candidates.has_seen(candidate)
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Удалённый кандидат: применяется сразу, если есть куда, иначе в очередь.
    /// Повтор по содержимому отбрасывается.
    pub async fn accept_candidate(&mut self, candidate: IceCandidate) {
        if !self.candidates.admit(&candidate) {
            tracing::debug!(session = %self.id, "duplicate remote candidate dropped");
            return;
        }

        // порядок держит очередь: новый кандидат всегда встаёт в хвост
        self.candidates.push(candidate);
        if self.adapter.is_some() && self.remote_description_set {
            self.flush_candidates().await;
        }
    }

    /// Применяет накопленные кандидаты в порядке поступления.
    /// Возвращает число применённых.
    pub async fn flush_candidates(&mut self) -> usize {
        let Some(adapter) = self.adapter.clone() else {
            return 0;
        };
        if !self.remote_description_set {
            return 0;
        }

        let mut applied = 0;
        while let Some(candidate) = self.candidates.pop() {
            match adapter.add_ice_candidate(candidate.clone()).await {
                Ok(()) => applied += 1,
                Err(AdapterError::InvalidState(reason)) => {
                    // адаптер ещё не готов, пробуем позже с того же места
                    tracing::debug!(session = %self.id, %reason, "flush paused");
                    self.candidates.push_front(candidate);
                    break;
                }
                Err(AdapterError::Closed) => {
                    tracing::debug!(session = %self.id, "flush stopped, adapter closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "skipping remote candidate");
                }
            }
        }
        if applied > 0 {
            tracing::debug!(session = %self.id, applied, "buffered candidates applied");
        }
        applied
    }

    /// Закрывает адаптер и забывает всё удалённое. Ошибки закрытия глотаются.
    pub async fn close(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Err(e) = adapter.close().await {
                tracing::debug!(session = %self.id, error = %e, "adapter close failed");
            }
        }
        self.remote_tracks.clear();
        self.candidates.clear();
        self.local_candidates.clear();
        self.remote_description_set = false;
    }
}
