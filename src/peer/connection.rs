use crate::logger::dump_candidate;
use crate::media::types::{MediaKind, MediaTrack};
use crate::peer::adapter::{AdapterError, PeerConnectionAdapter, PeerConnector, PeerEventSender};
use crate::peer::types::{
    IceCandidate, PeerConnectionState, PeerEvent, RemoteTrackInfo, SdpKind, ServerConfig,
    SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Создаёт адаптеры поверх webrtc-rs
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnectionAdapter>, AdapterError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        attach_handlers(&pc, events);

        Ok(Arc::new(WebRtcAdapter {
            pc,
            senders: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Подписки на события peer connection; всё уходит в канал оркестратора
fn attach_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEventSender) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let event = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    Some(PeerEvent::LocalCandidate(candidate))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize local candidate");
                    None
                }
            },
            // cand == None означает конец сбора
            None => Some(PeerEvent::GatheringComplete),
        };
        if let Some(event) = event {
            let _ = candidate_events.send(event);
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        tracing::debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        tracing::debug!(state = ?st, "peer connection state changed");
        let mapped = match st {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                PeerConnectionState::New
            }
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        };
        let _ = state_events.send(PeerEvent::ConnectionState(mapped));
        Box::pin(async {})
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                let _ = events.send(PeerEvent::RemoteTrack(RemoteTrackInfo {
                    id: track.id(),
                    kind,
                }));
            }
            Box::pin(async {})
        },
    ));
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, AdapterError> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

/// Адаптер над `RTCPeerConnection`
pub struct WebRtcAdapter {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
    closed: AtomicBool,
}

impl WebRtcAdapter {
    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::Closed)
        } else {
            Ok(())
        }
    }

    fn sender(&self, kind: MediaKind) -> Option<Arc<RTCRtpSender>> {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }
}

#[async_trait]
impl PeerConnectionAdapter for WebRtcAdapter {
    async fn create_offer(&self) -> Result<SessionDescription, AdapterError> {
        self.ensure_open()?;
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, AdapterError> {
        self.ensure_open()?;
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.pc.set_local_description(to_rtc(sdp)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.pc.set_remote_description(to_rtc(sdp)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AdapterError> {
        self.ensure_open()?;
        if self.pc.remote_description().await.is_none() {
            return Err(AdapterError::InvalidState(
                "remote description not set".into(),
            ));
        }
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let sender = self
            .pc
            .add_track(track.rtp() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP надо вычитывать, иначе интерсепторы не работают
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let sender = self.sender(track.kind()).ok_or_else(|| {
            AdapterError::InvalidState(format!("no {} sender to replace", track.kind()))
        })?;
        sender
            .replace_track(Some(track.rtp() as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_servers_get_schemes_and_credentials() {
        let servers = ice_servers(&[
            ServerConfig {
                id: "turn".into(),
                r#type: "turn".into(),
                url: "relay.example:3478".into(),
                username: Some("u".into()),
                credential: Some("p".into()),
            },
            ServerConfig {
                id: "stun".into(),
                r#type: "stun".into(),
                url: "stun:stun.example:19302".into(),
                username: None,
                credential: None,
            },
        ]);
        assert_eq!(servers[0].urls, vec!["turn:relay.example:3478".to_string()]);
        assert_eq!(servers[0].username, "u");
        assert_eq!(servers[1].urls, vec!["stun:stun.example:19302".to_string()]);
        assert!(servers[1].credential.is_empty());
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_invalid_state() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let adapter = WebRtcConnector::new(Vec::new()).connect(tx).await.unwrap();
        let err = adapter
            .add_ice_candidate(IceCandidate::new(
                "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidState(_)));

        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
        assert_eq!(
            adapter.create_offer().await.unwrap_err(),
            AdapterError::Closed
        );
    }
}
