pub mod adapter;
pub mod connection;
pub mod ice;
pub mod types;

pub use adapter::{AdapterError, PeerConnectionAdapter, PeerConnector, PeerEventSender};
pub use connection::{WebRtcAdapter, WebRtcConnector};
pub use ice::{analyze_candidates, CandidateBuffer, CandidateSummary};
pub use types::{
    IceCandidate, PeerConnectionState, PeerEvent, RemoteTrackInfo, SdpKind, ServerConfig,
    SessionDescription,
};
