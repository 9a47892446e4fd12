use crate::call::dispatch::{dispatch, Effect, Transition};
use crate::call::session::CallSession;
use crate::call::state::{CallEnded, CallSnapshot, CallState, EndReason, Role, SessionId};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::manager::{MediaAcquirer, MediaDeviceManager};
use crate::media::types::{Facing, LocalStream, MediaError, MediaKind, MediaTrack};
use crate::peer::adapter::{AdapterError, PeerConnectionAdapter, PeerConnector, PeerEventSender};
use crate::peer::ice::analyze_candidates;
use crate::peer::types::{IceCandidate, PeerConnectionState, PeerEvent, SessionDescription};
use crate::signaling::{
    HangupReason, InboundFrames, SignalTag, SignalingChannel, SignalingMessage,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Операции UI
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    PlaceCall(String),
    AcceptIncoming,
    RejectIncoming,
    Hangup,
    ToggleMicrophone,
    ToggleCamera,
    /// `None` переключает на противоположную камеру
    SwitchCamera(Option<Facing>),
    ListDevices,
    SwitchDevice { kind: MediaKind, device_id: String },
}

/// Результат долгого шага: захват + адаптер + локальный SDP
enum StepOutcome {
    Ready {
        adapter: Arc<dyn PeerConnectionAdapter>,
        stream: LocalStream,
        local: SessionDescription,
    },
    Failed(CallError),
}

impl StepOutcome {
    /// Результат больше никому не нужен: всё захваченное отпускаем
    async fn discard(self) {
        if let StepOutcome::Ready { adapter, stream, .. } = self {
            abandon(adapter.as_ref(), &stream).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Answer,
    Ice,
    Grace(u64),
}

enum Internal {
    Peer(SessionId, PeerEvent),
    Step(SessionId, StepOutcome),
    Timer(SessionId, Timer),
}

enum Event {
    Command(Command),
    Signal(SignalingMessage),
    Internal(Internal),
}

/// Ручка оркестратора. Дешёвая в клонировании; когда отпущена последняя,
/// активный звонок завершается и задача останавливается.
#[derive(Clone)]
pub struct CallOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallSnapshot>,
    local: watch::Receiver<Option<LocalStream>>,
}

impl CallOrchestrator {
    /// Запускает единственную точку диспетчеризации звонков
    pub fn spawn(
        channel: Arc<dyn SignalingChannel>,
        inbound: InboundFrames,
        media: MediaDeviceManager,
        connector: Arc<dyn PeerConnector>,
        config: CallConfig,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(CallSnapshot {
            microphone_enabled: media.microphone_enabled(),
            camera_enabled: media.camera_enabled(),
            facing: media.facing(),
            ..Default::default()
        });
        let (local_tx, local) = watch::channel(None);

        let coordinator = Coordinator {
            local_user_id: channel.user_id().to_owned(),
            channel,
            connector,
            media,
            config,
            session: None,
            deferred: VecDeque::new(),
            internal,
            state: state_tx,
            local: local_tx,
            ended: None,
            device_error: None,
        };
        tokio::spawn(coordinator.run(commands_rx, inbound, internal_rx));

        Self {
            commands,
            state,
            local,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("call orchestrator stopped, command dropped");
        }
    }

    pub fn place_call(&self, target_user_id: impl Into<String>) {
        self.send(Command::PlaceCall(target_user_id.into()));
    }

    pub fn accept_incoming(&self) {
        self.send(Command::AcceptIncoming);
    }

    pub fn reject_incoming(&self) {
        self.send(Command::RejectIncoming);
    }

    /// Безопасно в любом состоянии; в Idle ничего не делает
    pub fn hangup(&self) {
        self.send(Command::Hangup);
    }

    pub fn toggle_microphone(&self) {
        self.send(Command::ToggleMicrophone);
    }

    pub fn toggle_camera(&self) {
        self.send(Command::ToggleCamera);
    }

    pub fn switch_camera(&self, facing: Option<Facing>) {
        self.send(Command::SwitchCamera(facing));
    }

    pub fn list_devices(&self) {
        self.send(Command::ListDevices);
    }

    pub fn switch_device(&self, kind: MediaKind, device_id: impl Into<String>) {
        self.send(Command::SwitchDevice {
            kind,
            device_id: device_id.into(),
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.state.borrow().clone()
    }

    /// Кадр внешнего захвата в локальную дорожку активного звонка.
    /// `false`, если дорожки такого вида сейчас нет.
    pub async fn push_frame(
        &self,
        kind: MediaKind,
        data: Bytes,
        duration: Duration,
    ) -> Result<bool, MediaError> {
        let track = self
            .local
            .borrow()
            .as_ref()
            .and_then(|stream| stream.track(kind).cloned());
        match track {
            Some(track) => {
                track.write_sample(data, duration).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

struct Coordinator {
    local_user_id: String,
    channel: Arc<dyn SignalingChannel>,
    connector: Arc<dyn PeerConnector>,
    media: MediaDeviceManager,
    config: CallConfig,
    session: Option<CallSession>,
    /// События, пришедшие пока шаг сессии не зафиксирован
    deferred: VecDeque<Event>,
    internal: mpsc::UnboundedSender<Internal>,
    state: watch::Sender<CallSnapshot>,
    /// Текущий локальный поток для записи кадров снаружи
    local: watch::Sender<Option<LocalStream>>,
    ended: Option<CallEnded>,
    device_error: Option<String>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: InboundFrames,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::info!(user = %self.local_user_id, "call orchestrator started");
        self.refresh_devices().await;
        self.publish();

        let mut inbound_open = true;
        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },
                frame = inbound.recv(), if inbound_open => match frame {
                    Some(raw) => match SignalingMessage::decode(&raw) {
                        Ok(message) => Event::Signal(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping signaling frame");
                            continue;
                        }
                    },
                    None => {
                        inbound_open = false;
                        self.signaling_lost().await;
                        continue;
                    }
                },
                Some(event) = internal.recv() => Event::Internal(event),
            };

            self.handle(event).await;
            self.drain_deferred().await;
        }

        // все ручки отпущены
        self.hangup().await;
        tracing::info!(user = %self.local_user_id, "call orchestrator stopped");
    }

    fn step_in_flight(&self) -> bool {
        self.session.as_ref().is_some_and(CallSession::step_in_flight)
    }

    /// Пока шаг не зафиксирован, проходят только отмена, завершение шага,
    /// таймеры и то, что не трогает сессию (busy, hangup собеседника)
    fn must_defer(&self, event: &Event) -> bool {
        if !self.step_in_flight() {
            return false;
        }
        match event {
            Event::Command(Command::Hangup | Command::RejectIncoming) => false,
            Event::Signal(message) => !matches!(
                message.tag(),
                SignalTag::OfferAwaiting | SignalTag::HangupNotice | SignalTag::Unreachable
            ),
            Event::Internal(Internal::Step(..) | Internal::Timer(..)) => false,
            _ => true,
        }
    }

    async fn handle(&mut self, event: Event) {
        if self.must_defer(&event) {
            self.deferred.push_back(event);
            return;
        }
        match event {
            Event::Command(command) => self.on_command(command).await,
            Event::Signal(message) => self.on_signal(message).await,
            Event::Internal(Internal::Peer(id, event)) => self.on_peer_event(id, event).await,
            Event::Internal(Internal::Step(id, outcome)) => self.on_step(id, outcome).await,
            Event::Internal(Internal::Timer(id, timer)) => self.on_timer(id, timer).await,
        }
    }

    async fn drain_deferred(&mut self) {
        while !self.step_in_flight() {
            let Some(event) = self.deferred.pop_front() else {
                break;
            };
            self.handle(event).await;
        }
    }

    // ---------- snapshot ----------

    fn snapshot(&self, session: Option<&CallSession>) -> CallSnapshot {
        let mut snapshot = CallSnapshot {
            microphone_enabled: self.media.microphone_enabled(),
            camera_enabled: self.media.camera_enabled(),
            facing: self.media.facing(),
            audio_devices: self.media.devices(MediaKind::Audio),
            video_devices: self.media.devices(MediaKind::Video),
            selected_audio_device: self.media.selected_device(MediaKind::Audio).map(str::to_owned),
            selected_video_device: self.media.selected_device(MediaKind::Video).map(str::to_owned),
            ended: self.ended.clone(),
            device_error: self.device_error.clone(),
            ..Default::default()
        };
        if let Some(s) = session {
            snapshot.session_id = Some(s.id().to_string());
            snapshot.role = Some(s.role());
            snapshot.state = s.state();
            snapshot.connection_state = s.connection_state();
            snapshot.remote_user_id = Some(s.remote_user_id().to_owned());
            snapshot.incoming_from = (s.state() == CallState::Ringing)
                .then(|| s.remote_user_id().to_owned());
            snapshot.pending = s.step_in_flight();
            snapshot.buffered_candidates = s.buffered_candidates();
            snapshot.remote_tracks = s.remote_tracks().to_vec();
        }
        snapshot
    }

    fn publish(&self) {
        self.local.send_replace(self.media.current().cloned());
        self.state.send_replace(self.snapshot(self.session.as_ref()));
    }

    // ---------- commands ----------

    async fn on_command(&mut self, command: Command) {
        tracing::debug!(?command, "command");
        match command {
            Command::PlaceCall(target) => self.place_call(target),
            Command::AcceptIncoming => self.accept_incoming(),
            Command::RejectIncoming => self.reject_incoming().await,
            Command::Hangup => self.hangup().await,
            Command::ToggleMicrophone => {
                let enabled = self.media.toggle_microphone();
                tracing::info!(enabled, "microphone toggled");
                self.publish();
            }
            Command::ToggleCamera => {
                let enabled = self.media.toggle_camera();
                tracing::info!(enabled, "camera toggled");
                self.publish();
            }
            Command::SwitchCamera(facing) => {
                let facing = facing.unwrap_or_else(|| self.media.facing().flipped());
                let result = self.media.switch_camera(facing).await;
                self.swap_track(result).await;
            }
            Command::SwitchDevice { kind, device_id } => {
                let result = self.media.switch_device(kind, Some(device_id)).await;
                self.swap_track(result).await;
            }
            Command::ListDevices => {
                self.refresh_devices().await;
                self.publish();
            }
        }
    }

    fn place_call(&mut self, target: String) {
        let target = target.trim().to_owned();
        if let Some(session) = &self.session {
            tracing::warn!(state = ?session.state(), "placeCall ignored, call already active");
            return;
        }
        if target.is_empty() || target == self.local_user_id {
            tracing::warn!(%target, "placeCall ignored, invalid target");
            return;
        }

        let session = CallSession::outgoing(target);
        tracing::info!(session = %session.id(), to = %session.remote_user_id(), "placing call");
        self.ended = None;
        self.device_error = None;
        self.session = Some(session);
        self.start_step(None);
        self.publish();
    }

    fn accept_incoming(&mut self) {
        let offer = match self.session.as_ref() {
            Some(s)
                if s.role() == Role::Answerer
                    && s.state() == CallState::Ringing
                    && !s.step_in_flight() =>
            {
                s.remote_offer().cloned()
            }
            _ => None,
        };
        let Some(offer) = offer else {
            tracing::warn!("acceptIncoming ignored, nothing is ringing");
            return;
        };
        self.start_step(Some(offer));
        self.publish();
    }

    async fn reject_incoming(&mut self) {
        match self.session.as_ref() {
            Some(s) if s.role() == Role::Answerer && s.state() == CallState::Ringing => {
                self.teardown(EndReason::Declined, Some(HangupReason::Rejected))
                    .await;
            }
            _ => tracing::debug!("rejectIncoming ignored, nothing is ringing"),
        }
    }

    async fn hangup(&mut self) {
        let Some(s) = self.session.as_ref() else {
            tracing::debug!("hangup ignored, already idle");
            return;
        };
        let (reason, notify) = if s.role() == Role::Answerer && s.state() == CallState::Ringing {
            (EndReason::Declined, Some(HangupReason::Rejected))
        } else if s.remote_engaged() {
            (EndReason::LocalHangup, Some(HangupReason::Hangup))
        } else {
            (EndReason::LocalHangup, None)
        };
        self.teardown(reason, notify).await;
    }

    /// Новая дорожка после смены устройства; renegotiation не нужен
    async fn swap_track(&mut self, result: Result<Option<MediaTrack>, MediaError>) {
        match result {
            Ok(Some(track)) => {
                self.device_error = None;
                if let Some(adapter) = self.session.as_ref().and_then(|s| s.adapter().cloned()) {
                    if let Err(e) = adapter.replace_track(&track).await {
                        tracing::warn!(kind = %track.kind(), error = %e, "replaceTrack failed");
                        self.device_error = Some(format!("could not switch {}: {e}", track.kind()));
                    }
                }
            }
            Ok(None) => self.device_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "device switch failed");
                self.device_error = Some(e.to_string());
            }
        }
        self.publish();
    }

    async fn refresh_devices(&mut self) {
        match self.media.enumerate().await.map(|devices| devices.len()) {
            Ok(count) => tracing::debug!(count, "devices enumerated"),
            Err(e) => {
                tracing::warn!(error = %e, "device enumeration failed");
                self.device_error = Some(e.to_string());
            }
        }
    }

    // ---------- long steps ----------

    /// Захват и подготовка SDP уходят в отдельную задачу; результат вернётся
    /// событием `Step` с id сессии
    fn start_step(&mut self, remote_offer: Option<SessionDescription>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.begin_step();
        let id = session.id().clone();
        let acquirer = self.media.acquirer();
        let connector = self.connector.clone();
        let events = peer_sink(&self.internal, &id);
        let internal = self.internal.clone();

        tokio::spawn(async move {
            let outcome = prepare(acquirer, connector, events, remote_offer).await;
            if let Err(mpsc::error::SendError(Internal::Step(_, outcome))) =
                internal.send(Internal::Step(id, outcome))
            {
                outcome.discard().await;
            }
        });
    }

    async fn on_step(&mut self, id: SessionId, outcome: StepOutcome) {
        let current = self
            .session
            .as_ref()
            .is_some_and(|s| s.id() == &id && s.step_in_flight());
        if !current {
            tracing::debug!(session = %id, "discarding stale step result");
            outcome.discard().await;
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.end_step();
        }

        match outcome {
            StepOutcome::Ready {
                adapter,
                stream,
                local,
            } => self.step_ready(adapter, stream, local).await,
            StepOutcome::Failed(err) => self.step_failed(err).await,
        }
    }

    async fn step_ready(
        &mut self,
        adapter: Arc<dyn PeerConnectionAdapter>,
        stream: LocalStream,
        local: SessionDescription,
    ) {
        self.media.adopt(stream.clone());
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.attach(adapter);
        let id = session.id().clone();
        let role = session.role();
        let to_user_id = session.remote_user_id().to_owned();

        let message = match role {
            Role::Offerer => SignalingMessage::NewOffer {
                sdp: local,
                to_user_id,
            },
            Role::Answerer => {
                session.mark_remote_description_set();
                // собранные за время шага кандидаты едут копией в answer,
                // по одному они уйдут при разборе отложенных событий
                let candidates = pending_local_candidates(&self.deferred, &id);
                SignalingMessage::NewAnswer {
                    sdp: local,
                    to_user_id,
                    candidates,
                }
            }
        };

        if let Err(e) = self.channel.send(message).await {
            self.fail(e.into()).await;
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.mark_remote_engaged();
        }
        self.refresh_devices().await;

        match role {
            Role::Offerer => {
                arm_timer(&self.internal, id, Timer::Answer, self.config.answer_timeout());
                self.publish();
            }
            Role::Answerer => self.commit(CallState::Negotiating).await,
        }
    }

    async fn step_failed(&mut self, err: CallError) {
        tracing::warn!(error = %err, "call setup failed");
        let notify = match self.session.as_ref() {
            Some(s) if s.role() == Role::Answerer => match err {
                CallError::MediaAcquisition(_) if !self.config.notify_on_media_failure => None,
                CallError::MediaAcquisition(_) => Some(HangupReason::Rejected),
                _ => Some(HangupReason::Failed),
            },
            _ => None,
        };
        self.teardown(EndReason::Failed(err), notify).await;
    }

    // ---------- signaling ----------

    async fn on_signal(&mut self, message: SignalingMessage) {
        tracing::debug!(event = %message.tag(), "signal in");
        let transition = dispatch(self.session.as_ref(), message);
        self.execute(transition).await;
    }

    async fn execute(&mut self, transition: Transition) {
        let Transition { next, effects } = transition;
        for effect in effects {
            match effect {
                Effect::Send(message) => {
                    let tag = message.tag();
                    if let Err(e) = self.channel.send(message).await {
                        tracing::warn!(event = %tag, error = %e, "signal send failed");
                    }
                }
                Effect::OpenIncoming {
                    from_user_id,
                    offer,
                    candidates,
                } => {
                    let mut session = CallSession::incoming(from_user_id, offer);
                    for candidate in candidates {
                        session.accept_candidate(candidate).await;
                    }
                    tracing::info!(
                        session = %session.id(),
                        from = %session.remote_user_id(),
                        "incoming call"
                    );
                    self.ended = None;
                    self.device_error = None;
                    self.session = Some(session);
                }
                Effect::ApplyAnswer(answer) => {
                    let Some(adapter) = self.session.as_ref().and_then(|s| s.adapter().cloned())
                    else {
                        self.fail(CallError::Negotiation("answer before local offer".into()))
                            .await;
                        return;
                    };
                    if let Err(e) = adapter.set_remote_description(answer).await {
                        self.fail(e.into()).await;
                        return;
                    }
                    if let Some(session) = self.session.as_mut() {
                        session.mark_remote_description_set();
                    }
                }
                Effect::AcceptCandidates(candidates) => {
                    if let Some(session) = self.session.as_mut() {
                        for candidate in candidates {
                            session.accept_candidate(candidate).await;
                        }
                    }
                }
                Effect::Terminate { reason, notify } => {
                    self.teardown(reason, notify).await;
                    return;
                }
                Effect::Ignore(why) => tracing::debug!(why, "signal ignored"),
            }
        }

        match next {
            Some(next) => self.commit(next).await,
            None => self.publish(),
        }
    }

    /// Фиксация перехода плюс действия при входе в состояние
    async fn commit(&mut self, next: CallState) {
        if let Some(session) = self.session.as_mut() {
            session.set_state(next);
            match next {
                CallState::Negotiating => {
                    session.flush_candidates().await;
                    arm_timer(
                        &self.internal,
                        session.id().clone(),
                        Timer::Ice,
                        self.config.ice_timeout(),
                    );
                }
                CallState::Connected => {
                    analyze_candidates(session.local_candidates());
                }
                _ => {}
            }
        }
        self.publish();
    }

    async fn signaling_lost(&mut self) {
        tracing::warn!("signaling channel closed");
        if self.session.is_some() {
            self.fail(CallError::SignalingDelivery("relay connection lost".into()))
                .await;
        }
    }

    // ---------- peer events ----------

    async fn on_peer_event(&mut self, id: SessionId, event: PeerEvent) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == &id) else {
            tracing::debug!(session = %id, "peer event for stale session");
            return;
        };

        // очередь, остановленная на InvalidState, пробует снова
        if session.buffered_candidates() > 0 {
            session.flush_candidates().await;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                session.record_local_candidate(candidate.clone());
                let remote = session.remote_user_id().to_owned();
                // relay доставляет по sendToUserId от звонящего и по iceUserId
                // от отвечающего, iceUserId всегда звонящий
                let message = match session.role() {
                    Role::Offerer => SignalingMessage::IceCandidate {
                        candidate,
                        did_i_offer: true,
                        send_to_user_id: Some(remote),
                        ice_user_id: Some(self.local_user_id.clone()),
                    },
                    Role::Answerer => SignalingMessage::IceCandidate {
                        candidate,
                        did_i_offer: false,
                        send_to_user_id: None,
                        ice_user_id: Some(remote),
                    },
                };
                if let Err(e) = self.channel.send(message).await {
                    tracing::warn!(error = %e, "failed to send local candidate");
                }
            }
            PeerEvent::GatheringComplete => {
                tracing::debug!(
                    count = session.local_candidates().len(),
                    "ICE gathering complete"
                );
            }
            PeerEvent::ConnectionState(state) => self.on_connection_state(state).await,
            PeerEvent::RemoteTrack(track) => {
                tracing::info!(track = %track.id, kind = %track.kind, "remote track");
                session.add_remote_track(track);
                self.publish();
            }
        }
    }

    async fn on_connection_state(&mut self, state: PeerConnectionState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.set_connection_state(state);
        let call_state = session.state();

        match state {
            PeerConnectionState::Connected if call_state == CallState::Negotiating => {
                self.commit(CallState::Connected).await;
                return;
            }
            PeerConnectionState::Connected if call_state == CallState::Connected => {
                tracing::info!(session = %session.id(), "connection recovered");
            }
            PeerConnectionState::Disconnected
                if matches!(call_state, CallState::Negotiating | CallState::Connected) =>
            {
                let epoch = session.bump_disconnect_epoch();
                tracing::warn!(
                    session = %session.id(),
                    grace = ?self.config.grace_period(),
                    "peer disconnected, waiting for recovery"
                );
                arm_timer(
                    &self.internal,
                    session.id().clone(),
                    Timer::Grace(epoch),
                    self.config.grace_period(),
                );
            }
            PeerConnectionState::Failed => {
                self.fail(CallError::Negotiation("peer connection failed".into()))
                    .await;
                return;
            }
            PeerConnectionState::Closed => {
                self.fail(CallError::Negotiation(
                    "peer connection closed unexpectedly".into(),
                ))
                .await;
                return;
            }
            _ => {}
        }
        self.publish();
    }

    async fn on_timer(&mut self, id: SessionId, timer: Timer) {
        let Some(session) = self.session.as_ref().filter(|s| s.id() == &id) else {
            return;
        };
        let err = match timer {
            Timer::Answer if session.state() == CallState::Dialing => {
                CallError::AnswerTimeout(self.config.answer_timeout_secs)
            }
            Timer::Ice if session.state() == CallState::Negotiating => {
                CallError::IceFailureTimeout(self.config.ice_timeout_secs)
            }
            Timer::Grace(epoch)
                if epoch == session.disconnect_epoch()
                    && session.connection_state() != Some(PeerConnectionState::Connected)
                    && matches!(
                        session.state(),
                        CallState::Negotiating | CallState::Connected
                    ) =>
            {
                CallError::IceFailureTimeout(self.config.grace_period_secs)
            }
            _ => return,
        };
        tracing::warn!(session = %id, ?timer, "call timer expired");
        self.fail(err).await;
    }

    // ---------- teardown ----------

    async fn fail(&mut self, err: CallError) {
        let notify = self
            .session
            .as_ref()
            .is_some_and(|s| s.remote_engaged() && err.notifies_remote())
            .then_some(match err {
                CallError::AnswerTimeout(_) => HangupReason::Hangup,
                _ => HangupReason::Failed,
            });
        self.teardown(EndReason::Failed(err), notify).await;
    }

    /// Единственный путь в Idle. Сессия забирается из `Option`, так что
    /// повторный вызов ничего не освобождает второй раз.
    async fn teardown(&mut self, reason: EndReason, notify: Option<HangupReason>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.set_state(CallState::Terminating);
        self.state.send_replace(self.snapshot(Some(&session)));

        if let Some(hangup_reason) = notify {
            let message = SignalingMessage::HangupRequest {
                to_user_id: session.remote_user_id().to_owned(),
                reason: hangup_reason,
            };
            if let Err(e) = self.channel.send(message).await {
                tracing::warn!(error = %e, "failed to notify remote about hangup");
            }
        }

        session.close().await;
        self.media.release();
        tracing::info!(session = %session.id(), ?reason, "call ended");
        self.ended = Some(CallEnded::new(session.id(), reason));
        self.publish();
    }
}

/// Канал событий адаптера с пометкой сессии
fn peer_sink(internal: &mpsc::UnboundedSender<Internal>, id: &SessionId) -> PeerEventSender {
    let (events, mut rx) = mpsc::unbounded_channel();
    let internal = internal.clone();
    let id = id.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if internal.send(Internal::Peer(id.clone(), event)).is_err() {
                break;
            }
        }
    });
    events
}

fn arm_timer(
    internal: &mpsc::UnboundedSender<Internal>,
    id: SessionId,
    timer: Timer,
    after: Duration,
) {
    let internal = internal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = internal.send(Internal::Timer(id, timer));
    });
}

/// Локальные кандидаты сессии, ждущие в очереди отложенных событий
fn pending_local_candidates(deferred: &VecDeque<Event>, id: &SessionId) -> Vec<IceCandidate> {
    deferred
        .iter()
        .filter_map(|event| match event {
            Event::Internal(Internal::Peer(owner, PeerEvent::LocalCandidate(candidate)))
                if owner == id =>
            {
                Some(candidate.clone())
            }
            _ => None,
        })
        .collect()
}

/// Offer (без `remote_offer`) или answer на него
async fn prepare(
    acquirer: MediaAcquirer,
    connector: Arc<dyn PeerConnector>,
    events: PeerEventSender,
    remote_offer: Option<SessionDescription>,
) -> StepOutcome {
    let stream = match acquirer.acquire().await {
        Ok(stream) => stream,
        Err(e) => return StepOutcome::Failed(e.into()),
    };
    let adapter = match connector.connect(events).await {
        Ok(adapter) => adapter,
        Err(e) => {
            stream.stop();
            return StepOutcome::Failed(e.into());
        }
    };

    match negotiate(adapter.as_ref(), &stream, remote_offer).await {
        Ok(local) => StepOutcome::Ready {
            adapter,
            stream,
            local,
        },
        Err(e) => {
            abandon(adapter.as_ref(), &stream).await;
            StepOutcome::Failed(e.into())
        }
    }
}

async fn negotiate(
    adapter: &dyn PeerConnectionAdapter,
    stream: &LocalStream,
    remote_offer: Option<SessionDescription>,
) -> Result<SessionDescription, AdapterError> {
    for track in stream.tracks() {
        adapter.add_track(track).await?;
    }
    let local = match remote_offer {
        Some(offer) => {
            adapter.set_remote_description(offer).await?;
            adapter.create_answer().await?
        }
        None => adapter.create_offer().await?,
    };
    adapter.set_local_description(local.clone()).await?;
    Ok(local)
}

async fn abandon(adapter: &dyn PeerConnectionAdapter, stream: &LocalStream) {
    if let Err(e) = adapter.close().await {
        tracing::debug!(error = %e, "adapter close failed");
    }
    stream.stop();
}
