//! Real-time talking-avatar sessions for RemoteMedia
//!
//! This crate opens a streaming session against a remote avatar service,
//! negotiates a WebRTC peer connection for the avatar's audio/video, renders
//! the video with a chroma-key filter onto a presentation surface and
//! dispatches text for the avatar to speak.
//!
//! # Features
//!
//! - **Negotiation client**: HTTP control API (create, answer, ICE, speak, stop)
//! - **Peer transport**: webrtc-rs adapter behind a swappable trait
//! - **Frame compositor**: epoch-guarded render loop with green-screen keying
//! - **Lifecycle controller**: one session at a time, idempotent teardown
//! - **Speech dispatcher**: duration-hinted speech tasks
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Caller (UI / orchestration)                           │
//! │  ↓ start / stop / speak                                │
//! │  SessionLifecycleController                            │
//! │  ├─ NegotiationApi (HTTP control API)                  │
//! │  │   create → offer, answer, ICE candidates, stop      │
//! │  ├─ PeerTransport (one RTCPeerConnection per session)  │
//! │  │   └─ remote video → FrameSlot                       │
//! │  └─ FrameCompositor (RenderEpoch-guarded loop)         │
//! │     ↓ chroma-keyed RGBA                                │
//! │  PresentationSurface                                   │
//! │                                                        │
//! │  SpeechDispatcher ──→ NegotiationApi (speak)           │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use remotemedia_avatar_session::AvatarSessionConfig;
//!
//! let config = AvatarSessionConfig::from_toml_str(
//!     r#"
//!     [api]
//!     base_url = "https://avatar.example.com"
//!
//!     [avatar]
//!     avatar_id = "anna"
//!     quality = "high"
//!     "#,
//! )
//! .unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.compositor.frame_interval_ms, 16);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use remotemedia_avatar_session::{
//!     AvatarSessionConfig, PixelSurface, SessionLifecycleController, SpeechDispatcher,
//! };
//!
//! # async fn example() -> remotemedia_avatar_session::Result<()> {
//! let (_surface, shared) = PixelSurface::shared();
//! let controller = SessionLifecycleController::from_config(AvatarSessionConfig::default(), shared)?;
//!
//! controller.start_and_wait_connected().await?;
//!
//! let speech = SpeechDispatcher::new(&controller);
//! speech.conclude("Thanks for practicing with me today.").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod compositor;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod speech;

// Re-exports for public API
pub use compositor::{
    apply_chroma_key, FrameCompositor, PixelSurface, PresentationSurface, RenderEpoch,
    RenderLoopHandle, SharedSurface,
};
pub use config::{
    ApiConfig, AvatarProfile, AvatarSessionConfig, ChromaKeyConfig, CompositorConfig, Quality,
    SpeechConfig, TransportConfig, TurnServerConfig,
};
pub use error::{Error, RemoteServiceKind, Result};
pub use media::{FrameSlot, FrameSource, VideoFrame};
pub use peer::{
    ConnectionState, PeerTransport, RemoteTrack, TrackKind, TransportFactory,
    WebRtcPeerTransport, WebRtcTransportFactory,
};
pub use session::{RetryPolicy, Session, SessionLifecycleController, SessionState};
pub use signaling::{
    HttpNegotiationClient, IceCandidate, IceServerDescriptor, NegotiationApi, NegotiationOffer,
    SessionDescription,
};
pub use speech::{SpeechDispatcher, SpeechTask};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
