//! Control API wire types
//!
//! Every request is a JSON POST body carrying `session_id` plus the
//! operation-specific fields. Responses wrap their payload in a `data`
//! envelope.

use crate::config::Quality;
use serde::{Deserialize, Serialize};

/// ICE server descriptor handed out by the avatar service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerDescriptor {
    /// STUN/TURN URLs
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// SDP payload as exchanged with the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// "offer" or "answer"
    #[serde(rename = "type")]
    pub sdp_type: String,

    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// The remote service's SDP offer plus its ICE servers.
/// Received once per session and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOffer {
    pub sdp: SessionDescription,
    pub ice_servers: Vec<IceServerDescriptor>,
}

/// A locally gathered ICE candidate, in the browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Parameters for opening a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionParams {
    pub quality: Quality,
    pub avatar_id: String,
    pub voice_id: Option<String>,
}

/// Result of opening a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub offer: NegotiationOffer,
}

/// Result of a speak request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechReceipt {
    /// Estimated speaking time reported by the service
    pub duration_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct VoiceSelection<'a> {
    pub voice_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRequest<'a> {
    pub quality: Quality,
    pub avatar_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceSelection<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerRequest<'a> {
    pub session_id: &'a str,
    pub sdp: &'a SessionDescription,
}

#[derive(Debug, Serialize)]
pub(crate) struct IceRequest<'a> {
    pub session_id: &'a str,
    pub candidate: &'a IceCandidate,
}

#[derive(Debug, Serialize)]
pub(crate) struct SpeakRequest<'a> {
    pub session_id: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct StopRequest<'a> {
    pub session_id: &'a str,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateResponse {
    pub session_id: String,
    pub sdp: SessionDescription,
    #[serde(default, alias = "ice_servers2")]
    pub ice_servers: Vec<IceServerDescriptor>,
}

impl From<CreateResponse> for CreatedSession {
    fn from(resp: CreateResponse) -> Self {
        Self {
            session_id: resp.session_id,
            offer: NegotiationOffer {
                sdp: resp.sdp,
                ice_servers: resp.ice_servers,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SpeakResponse {
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_response_accepts_ice_servers2() {
        let json = r#"{
            "data": {
                "session_id": "s1",
                "sdp": {"type": "offer", "sdp": "v=0"},
                "ice_servers2": [{"urls": ["stun:stun.example.com"]}]
            }
        }"#;
        let envelope: Envelope<CreateResponse> = serde_json::from_str(json).unwrap();
        let created = CreatedSession::from(envelope.data);

        assert_eq!(created.session_id, "s1");
        assert_eq!(created.offer.sdp, SessionDescription::offer("v=0"));
        assert_eq!(created.offer.ice_servers.len(), 1);
        assert_eq!(created.offer.ice_servers[0].username, None);
    }

    #[test]
    fn test_create_request_omits_missing_voice() {
        let body = CreateRequest {
            quality: Quality::Low,
            avatar_name: "tutor",
            voice: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, serde_json::json!({"quality": "low", "avatar_name": "tutor"}));
    }

    #[test]
    fn test_ice_candidate_uses_browser_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
        assert!(value.get("usernameFragment").is_none());
    }

    #[test]
    fn test_speak_response_without_duration() {
        let envelope: Envelope<SpeakResponse> = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert!(envelope.data.duration_ms.is_none());
    }
}
