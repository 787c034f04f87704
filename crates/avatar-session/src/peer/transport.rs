//! Peer transport capability set
//!
//! The session controller is written once against [`PeerTransport`]; each
//! media stack (webrtc-rs, a vendor call SDK, a test double) supplies its own
//! adapter plus a [`TransportFactory`] that builds one instance per session.

use crate::media::FrameSource;
use crate::signaling::{IceCandidate, IceServerDescriptor, NegotiationOffer, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Peer connection state as reported by the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, connection not yet started
    New,
    /// ICE/DTLS negotiation in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Connectivity lost; ICE may still recover
    Disconnected,
    /// Connection failed and will not recover
    Failed,
    /// Connection closed
    Closed,
}

impl ConnectionState {
    /// States after which the session cannot continue
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Kind of a remote media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A remote media track announced by the transport
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Decoded frames, for video tracks
    pub frames: Option<Arc<dyn FrameSource>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("has_frames", &self.frames.is_some())
            .finish()
    }
}

/// Sink for locally gathered ICE candidates
pub type IceCandidateCallback = Box<dyn Fn(IceCandidate) + Send + Sync>;

/// Sink for remote tracks
pub type TrackCallback = Box<dyn Fn(RemoteTrack) + Send + Sync>;

/// Sink for connection state transitions
pub type ConnectionStateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Sink for data-channel payloads
pub type DataMessageCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// One live real-time media connection
///
/// An instance wraps exactly one underlying peer connection for its whole
/// lifetime. Callbacks are invoked in the order the transport detects the
/// underlying events and stop firing once [`PeerTransport::close`] has been
/// called.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Identifier of this connection instance (for logs)
    fn connection_id(&self) -> &str;

    /// Set the remote description. Fails with `Error::Negotiation` on a
    /// second call or a malformed SDP.
    async fn apply_remote_offer(&self, offer: &NegotiationOffer) -> Result<()>;

    /// Generate and set the local answer; only valid after
    /// [`PeerTransport::apply_remote_offer`] succeeded.
    async fn create_local_answer(&self) -> Result<SessionDescription>;

    /// Register the ICE candidate sink
    fn on_ice_candidate(&self, callback: IceCandidateCallback);

    /// Register the remote track sink
    fn on_track_received(&self, callback: TrackCallback);

    /// Register the connection state sink
    fn on_connection_state_change(&self, callback: ConnectionStateCallback);

    /// Register the data-channel sink. Transports without data channels
    /// ignore it.
    fn on_data_message(&self, _callback: DataMessageCallback) {}

    /// Release all resources. Safe to call repeatedly and before
    /// negotiation completed.
    async fn close(&self) -> Result<()>;
}

/// Builds one [`PeerTransport`] per session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport using the ICE servers the remote service handed out
    async fn create(&self, ice_servers: &[IceServerDescriptor]) -> Result<Arc<dyn PeerTransport>>;
}
