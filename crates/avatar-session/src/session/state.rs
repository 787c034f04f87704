//! Session record and lifecycle states

use std::fmt;
use std::time::SystemTime;

/// Session lifecycle state
///
/// ```text
/// idle -> creating -> negotiating -> connected -> closing -> closed
///            \______________\_____________\-> error -> closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started yet
    Idle,
    /// Waiting for the remote service to create the session
    Creating,
    /// Offer/answer and ICE exchange in progress
    Negotiating,
    /// Media is flowing; speech may be dispatched
    Connected,
    /// Caller-requested teardown in progress
    Closing,
    /// Failure-triggered teardown in progress
    Error,
    /// Torn down
    Closed,
}

impl SessionState {
    /// States in which a session exists and must be torn down before another starts
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Creating | SessionState::Negotiating | SessionState::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Creating => "creating",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Identifier assigned by the remote service; None while creating
    pub session_id: Option<String>,
    pub state: SessionState,
    /// Epoch of the render loop currently bound to this session (0 = none yet)
    pub render_epoch: u64,
    pub created_at: SystemTime,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            session_id: None,
            state: SessionState::Creating,
            render_epoch: 0,
            created_at: SystemTime::now(),
        }
    }

    /// Label for logs
    pub fn label(&self) -> &str {
        self.session_id.as_deref().unwrap_or("<pending>")
    }
}
