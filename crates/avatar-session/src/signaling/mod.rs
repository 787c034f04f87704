//! Signaling against the remote avatar control API
//!
//! The control API is plain request/response: create a session (receiving
//! the service's SDP offer), submit the local answer, relay ICE candidates,
//! request speech and stop the session.

pub mod client;
pub mod protocol;

pub use client::{HttpNegotiationClient, NegotiationApi};
pub use protocol::{
    CreateSessionParams, CreatedSession, IceCandidate, IceServerDescriptor, NegotiationOffer,
    SessionDescription, SpeechReceipt,
};
