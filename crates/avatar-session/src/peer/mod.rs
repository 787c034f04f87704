//! Peer transport: one real-time media connection per session
//!
//! Handles SDP offer/answer, local ICE candidate emission, remote track
//! reception and connection state reporting.

pub mod connection;
pub mod transport;

pub use connection::{WebRtcPeerTransport, WebRtcTransportFactory};
pub use transport::{
    ConnectionState, ConnectionStateCallback, DataMessageCallback, IceCandidateCallback,
    PeerTransport, RemoteTrack, TrackCallback, TrackKind, TransportFactory,
};
