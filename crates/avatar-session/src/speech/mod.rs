//! Speech dispatch
//!
//! Sends text to the connected session for the avatar to vocalize. The
//! remote service reports an estimated duration with each task; there is no
//! "speech finished" event, so [`SpeechTask::finished`] is a scheduling hint
//! only and says nothing about whether audio actually stopped playing.

use crate::session::controller::Inner;
use crate::session::SessionLifecycleController;
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// One dispatched speech request
#[derive(Debug, Clone)]
pub struct SpeechTask {
    pub session_id: String,
    pub text: String,
    /// Expected speaking time
    pub duration: Duration,
    /// False when the remote omitted a duration and the fallback was used
    pub duration_reported: bool,
    dispatched_at: Instant,
}

impl SpeechTask {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Earliest instant a follow-up action should run
    pub fn deadline(&self) -> Instant {
        self.dispatched_at + self.duration
    }

    /// Resolves once the duration hint has elapsed since dispatch
    pub async fn finished(&self) {
        tokio::time::sleep_until(self.deadline()).await;
    }
}

/// Sends one speech task at a time into the controller's connected session
pub struct SpeechDispatcher {
    controller: Weak<Inner>,
    in_flight: tokio::sync::Mutex<()>,
}

impl SpeechDispatcher {
    pub fn new(controller: &SessionLifecycleController) -> Self {
        Self {
            controller: Arc::downgrade(controller.inner()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    fn controller(&self) -> Result<Arc<Inner>> {
        self.controller
            .upgrade()
            .ok_or_else(|| Error::SessionNotActive("controller dropped".to_string()))
    }

    /// Ask the avatar to say `text`
    ///
    /// # Errors
    ///
    /// `SessionNotActive` unless the session is connected; remote failures
    /// are returned as-is. Neither affects the session itself.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn speak(&self, text: &str) -> Result<SpeechTask> {
        let _in_flight = self.in_flight.lock().await;
        let controller = self.controller()?;
        let session_id = controller.connected_session_id()?;

        let receipt = match controller.api.request_speech(&session_id, text).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Speech request for session {} failed: {}", session_id, e);
                return Err(e);
            }
        };

        let dispatched_at = Instant::now();
        let (duration, duration_reported) = match receipt.duration_ms {
            Some(ms) => (Duration::from_millis(ms), true),
            None => (controller.config.speech.fallback_duration(), false),
        };
        debug!(
            "Speech dispatched to {} ({:?}, reported: {})",
            session_id, duration, duration_reported
        );

        Ok(SpeechTask {
            session_id,
            text: text.to_string(),
            duration,
            duration_reported,
            dispatched_at,
        })
    }

    /// Speak a closing line, wait for its duration hint, then stop the session
    ///
    /// The session is stopped even if the closing line could not be
    /// dispatched. A session replaced while waiting is left alone.
    pub async fn conclude(&self, text: &str) -> Result<SpeechTask> {
        let task = match self.speak(text).await {
            Ok(task) => task,
            Err(e) => {
                if let Ok(controller) = self.controller() {
                    controller.stop().await?;
                }
                return Err(e);
            }
        };

        task.finished().await;

        let controller = self.controller()?;
        if controller.stop_if_current(&task.session_id).await {
            info!("Conversation concluded; session {} stopped", task.session_id);
        } else {
            debug!(
                "Session {} already gone when conversation concluded",
                task.session_id
            );
        }
        Ok(task)
    }
}
