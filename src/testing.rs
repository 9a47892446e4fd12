//! Тестовые двойники: relay в памяти, движок с журналом вызовов,
//! захват по сценарию.

use crate::config::AudioProcessing;
use crate::media::backend::{pick_device, CaptureBackend};
use crate::media::types::{CaptureSource, DeviceInfo, DevicePreference, Facing, MediaError, MediaKind, MediaTrack};
use crate::peer::adapter::{AdapterError, PeerConnectionAdapter, PeerConnector, PeerEventSender};
use crate::peer::types::{IceCandidate, PeerConnectionState, PeerEvent, SdpKind, SessionDescription};
use crate::signaling::{InboundFrames, SignalingChannel, SignalingError, SignalingMessage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------- relay ----------

#[derive(Default)]
struct RelayState {
    peers: HashMap<String, mpsc::UnboundedSender<String>>,
    sent: Vec<(String, SignalingMessage)>,
    /// Кандидаты звонящего для догоняющей доставки
    offer_candidates: HashMap<String, Vec<IceCandidate>>,
    /// Кому кандидаты по одному не доставляются
    muted: HashSet<String>,
}

/// Relay в памяти с маршрутизацией как у настоящего сервера
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, user_id: &str) -> (Arc<RelayChannel>, InboundFrames) {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).peers.insert(user_id.to_owned(), tx);
        let channel = RelayChannel {
            user_id: user_id.to_owned(),
            relay: self.clone(),
        };
        (Arc::new(channel), rx)
    }

    /// Закрывает входящий поток пользователя
    pub fn leave(&self, user_id: &str) {
        lock(&self.state).peers.remove(user_id);
    }

    /// Кандидаты к пользователю по одному теряются; догоняющие списки
    /// доходят
    pub fn drop_candidates_to(&self, user_id: &str) {
        lock(&self.state).muted.insert(user_id.to_owned());
    }

    /// Сырой кадр пользователю в обход маршрутизации
    pub fn inject(&self, user_id: &str, frame: impl Into<String>) {
        if let Some(peer) = lock(&self.state).peers.get(user_id) {
            let _ = peer.send(frame.into());
        }
    }

    pub fn sent_by(&self, user_id: &str) -> Vec<SignalingMessage> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|(from, _)| from == user_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn deliver(&self, to: &str, message: SignalingMessage) -> bool {
        let Ok(frame) = message.encode() else {
            return false;
        };
        match lock(&self.state).peers.get(to) {
            Some(peer) => peer.send(frame).is_ok(),
            None => false,
        }
    }

    fn route(&self, from: &str, message: SignalingMessage) {
        lock(&self.state)
            .sent
            .push((from.to_owned(), message.clone()));

        if let SignalingMessage::IceCandidate {
            candidate,
            did_i_offer,
            send_to_user_id,
            ice_user_id,
        } = &message
        {
            // от звонящего по sendToUserId, от отвечающего по iceUserId
            let target = if *did_i_offer {
                send_to_user_id.clone()
            } else {
                ice_user_id.clone()
            };
            let mut state = lock(&self.state);
            if *did_i_offer {
                state
                    .offer_candidates
                    .entry(from.to_owned())
                    .or_default()
                    .push(candidate.clone());
            }
            let muted = target.as_ref().is_some_and(|to| state.muted.contains(to));
            drop(state);
            if let Some(to) = target.filter(|_| !muted) {
                self.deliver(&to, message);
            }
            return;
        }

        match message {
            SignalingMessage::NewOffer { sdp, to_user_id } => {
                let candidates = lock(&self.state)
                    .offer_candidates
                    .insert(from.to_owned(), Vec::new())
                    .unwrap_or_default();
                let offer = SignalingMessage::OfferAwaiting {
                    sdp,
                    from_user_id: from.to_owned(),
                    candidates,
                };
                if !self.deliver(&to_user_id, offer) {
                    self.deliver(from, SignalingMessage::Unreachable { user_id: to_user_id });
                }
            }
            SignalingMessage::NewAnswer {
                sdp,
                to_user_id,
                candidates,
            } => {
                let answer = SignalingMessage::AnswerResponse {
                    sdp,
                    from_user_id: Some(from.to_owned()),
                    candidates,
                };
                if self.deliver(&to_user_id, answer) {
                    let caught_up = lock(&self.state)
                        .offer_candidates
                        .get(&to_user_id)
                        .cloned()
                        .unwrap_or_default();
                    self.deliver(from, SignalingMessage::AnswerAck { candidates: caught_up });
                } else {
                    self.deliver(from, SignalingMessage::Unreachable { user_id: to_user_id });
                }
            }
            SignalingMessage::HangupRequest { to_user_id, reason } => {
                self.deliver(
                    &to_user_id,
                    SignalingMessage::HangupNotice {
                        from_user_id: from.to_owned(),
                        reason,
                    },
                );
            }
            _ => {}
        }
    }
}

pub struct RelayChannel {
    user_id: String,
    relay: MemoryRelay,
}

#[async_trait]
impl SignalingChannel for RelayChannel {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn send(&self, message: SignalingMessage) -> Result<(), SignalingError> {
        self.relay.route(&self.user_id, message);
        Ok(())
    }
}

// ---------- движок ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    AddTrack { kind: MediaKind, device: String },
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    ReplaceTrack { kind: MediaKind, device: String },
    Close,
}

/// Журнал вызовов по адаптерам в порядке создания
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Vec<AdapterCall>>>>,
}

impl CallLog {
    fn register(&self) -> usize {
        let mut calls = lock(&self.calls);
        calls.push(Vec::new());
        calls.len() - 1
    }

    fn push(&self, adapter: usize, call: AdapterCall) {
        if let Some(calls) = lock(&self.calls).get_mut(adapter) {
            calls.push(call);
        }
    }

    pub fn adapters(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self, adapter: usize) -> Vec<AdapterCall> {
        lock(&self.calls).get(adapter).cloned().unwrap_or_default()
    }

    pub fn count(&self, adapter: usize, pred: impl Fn(&AdapterCall) -> bool) -> usize {
        self.calls(adapter).iter().filter(|c| pred(c)).count()
    }

    pub fn candidates(&self, adapter: usize) -> Vec<String> {
        self.calls(adapter)
            .into_iter()
            .filter_map(|c| match c {
                AdapterCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }
}

struct ConnectorState {
    log: CallLog,
    connectivity: bool,
    events: Mutex<Vec<PeerEventSender>>,
    rejections: Arc<AtomicUsize>,
}

/// Фабрика фейковых адаптеров. С `connectivity` адаптер сам сообщает
/// Connected, как только есть оба описания.
#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<ConnectorState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// ICE никогда не сходится
    pub fn without_connectivity() -> Self {
        Self::build(false)
    }

    fn build(connectivity: bool) -> Self {
        Self {
            state: Arc::new(ConnectorState {
                log: CallLog::default(),
                connectivity,
                events: Mutex::new(Vec::new()),
                rejections: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn log(&self) -> CallLog {
        self.state.log.clone()
    }

    /// Следующие `count` кандидатов движок отклоняет как InvalidState
    pub fn reject_candidates(&self, count: usize) {
        self.state.rejections.store(count, Ordering::SeqCst);
    }

    /// Событие движка от имени адаптера
    pub fn emit(&self, adapter: usize, event: PeerEvent) {
        if let Some(events) = lock(&self.state.events).get(adapter) {
            let _ = events.send(event);
        }
    }

    pub async fn adapter_for_test(&self) -> Arc<dyn PeerConnectionAdapter> {
        let (events, _rx) = mpsc::unbounded_channel();
        self.connect(events).await.unwrap()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnectionAdapter>, AdapterError> {
        let index = self.state.log.register();
        lock(&self.state.events).push(events.clone());
        Ok(Arc::new(FakeAdapter {
            index,
            log: self.state.log.clone(),
            events,
            connectivity: self.state.connectivity,
            rejections: self.state.rejections.clone(),
            local: AtomicBool::new(false),
            remote: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeAdapter {
    index: usize,
    log: CallLog,
    events: PeerEventSender,
    connectivity: bool,
    rejections: Arc<AtomicUsize>,
    local: AtomicBool,
    remote: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl FakeAdapter {
    fn record(&self, call: AdapterCall) {
        self.log.push(self.index, call);
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::Closed)
        } else {
            Ok(())
        }
    }

    fn maybe_connect(&self) {
        if self.connectivity
            && self.local.load(Ordering::SeqCst)
            && self.remote.load(Ordering::SeqCst)
            && !self.connected.swap(true, Ordering::SeqCst)
        {
            let _ = self
                .events
                .send(PeerEvent::ConnectionState(PeerConnectionState::Connecting));
            let _ = self
                .events
                .send(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnectionAdapter for FakeAdapter {
    async fn create_offer(&self) -> Result<SessionDescription, AdapterError> {
        self.ensure_open()?;
        self.record(AdapterCall::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-{}", self.index)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, AdapterError> {
        self.ensure_open()?;
        if !self.remote.load(Ordering::SeqCst) {
            return Err(AdapterError::InvalidState("no remote offer".into()));
        }
        self.record(AdapterCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-{}", self.index)))
    }

    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.record(AdapterCall::SetLocal(sdp.kind));
        self.local.store(true, Ordering::SeqCst);
        let _ = self.events.send(PeerEvent::LocalCandidate(IceCandidate::new(format!(
            "candidate:{} 1 udp 2122260223 192.168.1.{} 40000 typ host",
            self.index + 100,
            self.index + 2
        ))));
        // настоящий движок успевает собрать host-кандидат до возврата
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.record(AdapterCall::SetRemote(sdp.kind));
        self.remote.store(true, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AdapterError> {
        self.ensure_open()?;
        if !self.remote.load(Ordering::SeqCst) {
            return Err(AdapterError::InvalidState("remote description not set".into()));
        }
        if self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AdapterError::InvalidState("engine busy".into()));
        }
        self.record(AdapterCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.record(AdapterCall::AddTrack {
            kind: track.kind(),
            device: track.device_id().to_owned(),
        });
        Ok(())
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.record(AdapterCall::ReplaceTrack {
            kind: track.kind(),
            device: track.device_id().to_owned(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.record(AdapterCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------- захват ----------

#[derive(Default)]
struct CaptureState {
    devices: Vec<DeviceInfo>,
    failures: HashMap<MediaKind, MediaError>,
    opened: HashMap<String, usize>,
    stopped: HashMap<String, usize>,
    enabled: HashMap<String, bool>,
}

/// Захват по сценарию: считает открытия/остановки, умеет отказывать
/// и задерживать `open` (как висящий запрос разрешения)
#[derive(Clone)]
pub struct ScriptedCapture {
    state: Arc<Mutex<CaptureState>>,
    gate: Arc<watch::Sender<bool>>,
}

impl ScriptedCapture {
    pub fn with_default_devices() -> Self {
        let device = |id: &str, kind, facing| DeviceInfo {
            device_id: id.into(),
            kind,
            label: id.into(),
            facing,
        };
        let state = CaptureState {
            devices: vec![
                device("mic-1", MediaKind::Audio, None),
                device("mic-2", MediaKind::Audio, None),
                device("cam-front", MediaKind::Video, Some(Facing::User)),
                device("cam-back", MediaKind::Video, Some(Facing::Environment)),
            ],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            gate: Arc::new(watch::channel(true).0),
        }
    }

    pub fn fail_kind(&self, kind: MediaKind, err: MediaError) {
        lock(&self.state).failures.insert(kind, err);
    }

    /// `open` ждёт до `release`
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn total_opens(&self) -> usize {
        lock(&self.state).opened.values().sum()
    }

    pub fn stop_count(&self, device_id: &str) -> usize {
        lock(&self.state).stopped.get(device_id).copied().unwrap_or(0)
    }

    pub fn is_enabled(&self, device_id: &str) -> Option<bool> {
        lock(&self.state).enabled.get(device_id).copied()
    }
}

#[async_trait]
impl CaptureBackend for ScriptedCapture {
    async fn open(
        &self,
        preference: &DevicePreference,
        _processing: &AudioProcessing,
    ) -> Result<Arc<dyn CaptureSource>, MediaError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = lock(&self.state);
        if let Some(err) = state.failures.get(&preference.kind) {
            return Err(err.clone());
        }
        let device_id = pick_device(&state.devices, preference)?.device_id.clone();
        *state.opened.entry(device_id.clone()).or_default() += 1;
        state.enabled.insert(device_id.clone(), true);
        Ok(Arc::new(ScriptedSource {
            device_id,
            state: self.state.clone(),
        }))
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(lock(&self.state).devices.clone())
    }
}

struct ScriptedSource {
    device_id: String,
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureSource for ScriptedSource {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn set_enabled(&self, enabled: bool) {
        lock(&self.state).enabled.insert(self.device_id.clone(), enabled);
    }

    fn stop(&self) {
        *lock(&self.state)
            .stopped
            .entry(self.device_id.clone())
            .or_default() += 1;
    }
}
