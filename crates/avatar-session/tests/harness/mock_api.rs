//! Scripted control API

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_avatar_session::signaling::{
    CreateSessionParams, CreatedSession, IceCandidate, NegotiationApi, NegotiationOffer,
    SessionDescription, SpeechReceipt,
};
use remotemedia_avatar_session::{Error, Result, SessionState};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// One recorded control API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create { avatar_id: String },
    Answer { session_id: String, sdp: String },
    Ice { session_id: String, candidate: String },
    Speak { session_id: String, text: String },
    Stop { session_id: String },
}

pub struct MockNegotiationApi {
    calls: Mutex<Vec<ApiCall>>,
    create_failures: Mutex<VecDeque<u16>>,
    create_delay: Mutex<Option<Duration>>,
    speech_duration_ms: Mutex<Option<u64>>,
    speech_failure: Mutex<Option<u16>>,
    fail_ice: AtomicBool,
    next_id: AtomicU64,
    /// Controller state seen at each stop_session call
    observer: Mutex<Option<watch::Receiver<SessionState>>>,
    stop_states: Mutex<Vec<SessionState>>,
}

impl MockNegotiationApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            create_failures: Mutex::new(VecDeque::new()),
            create_delay: Mutex::new(None),
            speech_duration_ms: Mutex::new(Some(1200)),
            speech_failure: Mutex::new(None),
            fail_ice: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            observer: Mutex::new(None),
            stop_states: Mutex::new(Vec::new()),
        }
    }

    pub fn observe(&self, rx: watch::Receiver<SessionState>) {
        *self.observer.lock() = Some(rx);
    }

    /// Fail the next create calls with these HTTP statuses, in order
    pub fn fail_next_creates(&self, statuses: &[u16]) {
        self.create_failures.lock().extend(statuses.iter().copied());
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub fn set_speech_duration(&self, duration_ms: Option<u64>) {
        *self.speech_duration_ms.lock() = duration_ms;
    }

    pub fn fail_speech(&self, status: Option<u16>) {
        *self.speech_failure.lock() = status;
    }

    pub fn fail_ice(&self, fail: bool) {
        self.fail_ice.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn creates(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ApiCall::Create { .. }))
            .count()
    }

    pub fn answers(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ApiCall::Answer { session_id, .. } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Candidate lines submitted for `session_id`, in submission order
    pub fn candidates(&self, session_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ApiCall::Ice {
                    session_id: id,
                    candidate,
                } if id == session_id => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ApiCall::Stop { session_id } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stop_states(&self) -> Vec<SessionState> {
        self.stop_states.lock().clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl NegotiationApi for MockNegotiationApi {
    async fn create_session(&self, params: &CreateSessionParams) -> Result<CreatedSession> {
        self.record(ApiCall::Create {
            avatar_id: params.avatar_id.clone(),
        });

        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.create_failures.lock().pop_front();
        if let Some(status) = failure {
            return Err(Error::remote("create", status, "scripted failure"));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedSession {
            session_id: format!("session-{}", n),
            offer: NegotiationOffer {
                sdp: SessionDescription::offer(format!("v=0\r\no=mock {} 0 IN IP4 0.0.0.0\r\n", n)),
                ice_servers: Vec::new(),
            },
        })
    }

    async fn submit_answer(&self, session_id: &str, answer: &SessionDescription) -> Result<()> {
        self.record(ApiCall::Answer {
            session_id: session_id.to_string(),
            sdp: answer.sdp.clone(),
        });
        Ok(())
    }

    async fn submit_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        self.record(ApiCall::Ice {
            session_id: session_id.to_string(),
            candidate: candidate.candidate.clone(),
        });
        if self.fail_ice.load(Ordering::SeqCst) {
            return Err(Error::remote("ice", 500, "scripted failure"));
        }
        Ok(())
    }

    async fn request_speech(&self, session_id: &str, text: &str) -> Result<SpeechReceipt> {
        self.record(ApiCall::Speak {
            session_id: session_id.to_string(),
            text: text.to_string(),
        });
        let failure = *self.speech_failure.lock();
        if let Some(status) = failure {
            return Err(Error::remote("speak", status, "scripted failure"));
        }
        Ok(SpeechReceipt {
            duration_ms: *self.speech_duration_ms.lock(),
        })
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.record(ApiCall::Stop {
            session_id: session_id.to_string(),
        });
        let state = self.observer.lock().as_ref().map(|rx| *rx.borrow());
        if let Some(state) = state {
            self.stop_states.lock().push(state);
        }
        Ok(())
    }
}
