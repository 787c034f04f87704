//! Session lifecycle controller
//!
//! Sequences the negotiation client and the peer transport, owns the single
//! authoritative session record, and guarantees idempotent, best-effort
//! teardown on every terminal path.
//!
//! ## Concurrency
//!
//! - `start`, `stop` and failure-triggered teardown are serialized on one
//!   async mutex. A `stop` issued while `start` is still waiting on the
//!   network therefore lets the in-flight call finish and then tears down
//!   whatever session resulted, so no remote session is ever leaked.
//! - Every session attempt gets a generation number. Transport events and
//!   candidate forwarders are tagged with the generation they were created
//!   for and are ignored once that session is gone.
//! - Transport callbacks feed one ordered channel per session; state changes
//!   are handled in arrival order and never coalesced.

use super::retry::RetryPolicy;
use super::state::{Session, SessionState};
use crate::compositor::{FrameCompositor, RenderEpoch, RenderLoopHandle, SharedSurface};
use crate::config::AvatarSessionConfig;
use crate::media::FrameSource;
use crate::peer::{
    ConnectionState, PeerTransport, RemoteTrack, TrackKind, TransportFactory,
    WebRtcTransportFactory,
};
use crate::signaling::{
    CreateSessionParams, CreatedSession, HttpNegotiationClient, IceCandidate, NegotiationApi,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Capacity of the data-channel rebroadcast
const DATA_CHANNEL_CAPACITY: usize = 64;

/// Why a session is being torn down
#[derive(Debug, Clone)]
enum TeardownCause {
    /// Caller asked for stop()
    Requested,
    /// A new start() replaces the session
    Superseded,
    /// Creation, negotiation or the transport failed
    Failed(String),
}

/// Transport callbacks, funnelled into one ordered channel
enum TransportEvent {
    State(ConnectionState),
    Track(RemoteTrack),
    Data(Vec<u8>),
}

/// Sender side of the candidate queue; taken when teardown begins
type CandidateGate = Arc<Mutex<Option<mpsc::UnboundedSender<IceCandidate>>>>;

/// Everything owned by the live session
struct ActiveSession {
    generation: u64,
    session: Session,
    transport: Option<Arc<dyn PeerTransport>>,
    video: Option<Arc<dyn FrameSource>>,
    render: Option<RenderLoopHandle>,
    /// Closed as soon as teardown begins; later candidates are dropped
    candidate_gate: CandidateGate,
    /// Drains candidates queued before the gate closed
    forwarder: Option<JoinHandle<()>>,
    /// Flipped to true to stop the session's background tasks
    shutdown: watch::Sender<bool>,
}

impl ActiveSession {
    fn new(generation: u64) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            generation,
            session: Session::new(),
            transport: None,
            video: None,
            render: None,
            candidate_gate: Arc::new(Mutex::new(None)),
            forwarder: None,
            shutdown,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: AvatarSessionConfig,
    pub(crate) api: Arc<dyn NegotiationApi>,
    transports: Arc<dyn TransportFactory>,
    compositor: FrameCompositor,
    surface: SharedSurface,

    /// Serializes start/stop/teardown
    ops: tokio::sync::Mutex<()>,

    /// Never held across an await
    active: Mutex<Option<ActiveSession>>,

    generation: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    data_tx: broadcast::Sender<Vec<u8>>,
}

/// Drives one avatar session at a time through
/// `idle → creating → negotiating → connected → closing → closed`
///
/// Dropping the controller detaches all local media handles synchronously
/// and schedules remote cleanup on the current tokio runtime.
pub struct SessionLifecycleController {
    inner: Arc<Inner>,
}

impl SessionLifecycleController {
    /// Create a controller from its collaborators
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(
        config: AvatarSessionConfig,
        api: Arc<dyn NegotiationApi>,
        transports: Arc<dyn TransportFactory>,
        surface: SharedSurface,
    ) -> Result<Self> {
        config.validate()?;

        let compositor = FrameCompositor::new(config.compositor.clone(), RenderEpoch::new())?;
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (data_tx, _) = broadcast::channel(DATA_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                api,
                transports,
                compositor,
                surface,
                ops: tokio::sync::Mutex::new(()),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                state_tx,
                data_tx,
            }),
        })
    }

    /// Controller backed by the HTTP control API and webrtc-rs
    pub fn from_config(config: AvatarSessionConfig, surface: SharedSurface) -> Result<Self> {
        let api = Arc::new(HttpNegotiationClient::new(config.api.clone())?);
        let transports = Arc::new(WebRtcTransportFactory::new(config.transport.clone()));
        Self::new(config, api, transports, surface)
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    /// Open a new session, closing any existing one first
    ///
    /// Returns once the local answer has been submitted; the `connected`
    /// transition follows asynchronously (see [`Self::wait_for_state`]).
    ///
    /// # Errors
    ///
    /// Any failure leaves the controller in `closed` with every resource
    /// released.
    pub async fn start(&self) -> Result<Session> {
        self.inner.start().await
    }

    /// [`Self::start`], retrying failures that are worth a retry
    pub async fn start_with_retry(&self, policy: &RetryPolicy) -> Result<Session> {
        let mut attempt = 0;
        loop {
            match self.inner.start().await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.calculate_backoff(attempt);
                    warn!(
                        "Start attempt {} failed ({}); retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`Self::start`], then wait up to `transport.connect_timeout_secs`
    /// for the transport to connect. A session that does not connect in
    /// time is torn down.
    pub async fn start_and_wait_connected(&self) -> Result<Session> {
        self.inner.start().await?;
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let timeout = self.inner.config.transport.connect_timeout();

        let outcome = {
            let mut rx = self.inner.state_tx.subscribe();
            let waited = tokio::time::timeout(
                timeout,
                rx.wait_for(|s| *s == SessionState::Connected || !s.is_active()),
            )
            .await;
            match waited {
                Ok(Ok(state)) => Ok(Some(*state)),
                Ok(Err(_)) => Ok(None),
                Err(_) => Err(()),
            }
        };

        let reached = match outcome {
            Ok(reached) => reached,
            Err(()) => {
                warn!("Session did not connect within {:?}", timeout);
                let _ops = self.inner.ops.lock().await;
                self.inner
                    .teardown_locked(
                        TeardownCause::Failed("connect timeout".to_string()),
                        Some(generation),
                    )
                    .await;
                return Err(Error::Transport(format!(
                    "peer connection not established within {:?}",
                    timeout
                )));
            }
        };

        match (reached, self.inner.snapshot()) {
            (Some(SessionState::Connected), Some(session)) => Ok(session),
            _ => Err(Error::Transport(
                "session closed before the transport connected".to_string(),
            )),
        }
    }

    /// Tear down the current session. A no-op when there is none.
    pub async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Snapshot of the live session, None when idle/closed or tearing down
    pub fn session(&self) -> Option<Session> {
        self.inner.snapshot()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the controller reaches `target`
    ///
    /// # Errors
    ///
    /// `Error::Transport` if `target` is not reached within `timeout`.
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|s| *s == target)).await;
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Internal("state channel closed".to_string())),
            Err(_) => Err(Error::Transport(format!(
                "timed out after {:?} waiting for state {}",
                timeout, target
            ))),
        }
    }

    /// Whether a render loop is bound to the live session
    pub fn is_rendering(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|a| a.render.is_some())
    }

    /// Live render epoch
    pub fn render_epoch(&self) -> u64 {
        self.inner.compositor.epoch().current()
    }

    /// Data-channel payloads received from the remote side
    pub fn data_messages(&self) -> broadcast::Receiver<Vec<u8>> {
        self.inner.data_tx.subscribe()
    }
}

impl Drop for SessionLifecycleController {
    fn drop(&mut self) {
        let Some(mut active) = self.inner.active.lock().take() else {
            return;
        };

        // Detach everything local right now; the surface may be gone next
        active.candidate_gate.lock().take();
        let _ = active.shutdown.send(true);
        let forwarder = active.forwarder.take();
        self.inner.compositor.epoch().advance();
        if let Some(handle) = active.render.take() {
            self.inner.compositor.stop(handle);
        }

        let transport = active.transport.take();
        let session_id = active.session.session_id.clone();
        let api = Arc::clone(&self.inner.api);
        self.inner.transition(&mut active, SessionState::Closed);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(forwarder) = forwarder {
                        let _ = forwarder.await;
                    }
                    if let Some(transport) = transport {
                        if let Err(e) = transport.close().await {
                            warn!("Failed to close transport on drop: {}", e);
                        }
                    }
                    if let Some(id) = session_id {
                        if let Err(e) = api.stop_session(&id).await {
                            warn!("Failed to stop remote session {} on drop: {}", id, e);
                        }
                    }
                });
            }
            Err(_) => {
                if let Some(forwarder) = forwarder {
                    forwarder.abort();
                }
                warn!(
                    "Controller dropped outside a runtime; remote session {:?} not stopped",
                    session_id
                )
            }
        }
    }
}

impl Inner {
    #[instrument(skip(self))]
    async fn start(self: &Arc<Self>) -> Result<Session> {
        let _ops = self.ops.lock().await;

        if self.teardown_locked(TeardownCause::Superseded, None).await {
            info!("Closed previous session before starting a new one");
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = self.active.lock();
            let active = guard.insert(ActiveSession::new(generation));
            self.transition(active, SessionState::Creating);
        }

        let params = CreateSessionParams {
            quality: self.config.avatar.quality,
            avatar_id: self.config.avatar.avatar_id.clone(),
            voice_id: self.config.avatar.voice_id.clone(),
        };

        let created = match self.api.create_session(&params).await {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create remote session: {}", e);
                self.teardown_locked(TeardownCause::Failed(e.to_string()), Some(generation))
                    .await;
                return Err(e);
            }
        };
        info!("Remote session {} created", created.session_id);

        if let Err(e) = self.negotiate(generation, created).await {
            error!("Negotiation failed: {}", e);
            self.teardown_locked(TeardownCause::Failed(e.to_string()), Some(generation))
                .await;
            return Err(e);
        }

        self.snapshot()
            .ok_or_else(|| Error::Internal("session vanished during start".to_string()))
    }

    /// Build the transport, wire its callbacks and run offer/answer
    async fn negotiate(self: &Arc<Self>, generation: u64, created: CreatedSession) -> Result<()> {
        let session_id = created.session_id.clone();
        {
            let mut guard = self.active.lock();
            let active = guard
                .as_mut()
                .filter(|a| a.generation == generation)
                .ok_or_else(|| Error::Internal("session replaced during create".to_string()))?;
            active.session.session_id = Some(session_id.clone());
            self.transition(active, SessionState::Negotiating);
        }

        let transport = self.transports.create(&created.offer.ice_servers).await?;
        debug!(
            "Transport {} bound to session {}",
            transport.connection_id(),
            session_id
        );

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel::<IceCandidate>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let gate: CandidateGate = Arc::new(Mutex::new(Some(candidate_tx)));
        let sink = Arc::clone(&gate);
        transport.on_ice_candidate(Box::new(move |candidate| match sink.lock().as_ref() {
            Some(tx) => {
                let _ = tx.send(candidate);
            }
            None => trace!("Dropping ICE candidate gathered after teardown began"),
        }));
        let tx = event_tx.clone();
        transport.on_connection_state_change(Box::new(move |state| {
            let _ = tx.send(TransportEvent::State(state));
        }));
        let tx = event_tx.clone();
        transport.on_track_received(Box::new(move |track| {
            let _ = tx.send(TransportEvent::Track(track));
        }));
        transport.on_data_message(Box::new(move |payload| {
            let _ = event_tx.send(TransportEvent::Data(payload));
        }));

        let attached = {
            let mut guard = self.active.lock();
            match guard.as_mut().filter(|a| a.generation == generation) {
                Some(active) => {
                    active.transport = Some(Arc::clone(&transport));
                    active.candidate_gate = Arc::clone(&gate);
                    active.forwarder = Some(tokio::spawn(forward_candidates(
                        Arc::clone(&self.api),
                        session_id.clone(),
                        candidate_rx,
                    )));
                    tokio::spawn(pump_events(
                        Arc::downgrade(self),
                        generation,
                        event_rx,
                        active.shutdown.subscribe(),
                    ));
                    true
                }
                None => false,
            }
        };
        if !attached {
            gate.lock().take();
            let _ = transport.close().await;
            return Err(Error::Internal(
                "session replaced during negotiation".to_string(),
            ));
        }

        transport.apply_remote_offer(&created.offer).await?;
        let answer = transport.create_local_answer().await?;
        self.api.submit_answer(&session_id, &answer).await?;

        debug!("Answer submitted for session {}", session_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub(crate) async fn stop(&self) -> Result<()> {
        let _ops = self.ops.lock().await;
        if !self.teardown_locked(TeardownCause::Requested, None).await {
            debug!("stop() with no active session");
        }
        Ok(())
    }

    /// Stop the live session only if it is still `session_id`
    pub(crate) async fn stop_if_current(&self, session_id: &str) -> bool {
        let _ops = self.ops.lock().await;
        let generation = {
            let guard = self.active.lock();
            guard
                .as_ref()
                .filter(|a| a.session.session_id.as_deref() == Some(session_id))
                .map(|a| a.generation)
        };
        match generation {
            Some(generation) => {
                self.teardown_locked(TeardownCause::Requested, Some(generation))
                    .await
            }
            None => false,
        }
    }

    /// The single teardown path for stop, supersession and failure
    ///
    /// Must be called with `ops` held. Returns false when there was nothing
    /// to tear down (or the session is not generation `expected`).
    async fn teardown_locked(&self, cause: TeardownCause, expected: Option<u64>) -> bool {
        let mut active = {
            let mut guard = self.active.lock();
            let matches = guard
                .as_ref()
                .is_some_and(|a| expected.map_or(true, |g| g == a.generation));
            if !matches {
                return false;
            }
            let Some(mut active) = guard.take() else {
                return false;
            };
            let to = match cause {
                TeardownCause::Failed(_) => SessionState::Error,
                _ => SessionState::Closing,
            };
            self.transition(&mut active, to);
            active
        };

        let label = active.session.label().to_string();
        match &cause {
            TeardownCause::Requested => info!("Stopping session {}", label),
            TeardownCause::Superseded => info!("Session {} superseded", label),
            TeardownCause::Failed(reason) => {
                warn!("Tearing down session {} after failure: {}", label, reason)
            }
        }

        active.candidate_gate.lock().take();
        let _ = active.shutdown.send(true);

        // Each step is attempted regardless of the others
        self.compositor.epoch().advance();
        if let Some(handle) = active.render.take() {
            self.compositor.stop(handle);
        }

        // Candidates gathered before the gate closed still reach the service
        if let Some(forwarder) = active.forwarder.take() {
            if let Err(e) = forwarder.await {
                warn!("Candidate forwarder for {} ended abnormally: {}", label, e);
            }
        }

        if let Some(transport) = active.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Failed to close transport for session {}: {}", label, e);
            }
        }

        if let Some(session_id) = active.session.session_id.as_deref() {
            if let Err(e) = self.api.stop_session(session_id).await {
                warn!("Failed to stop remote session {}: {}", session_id, e);
            }
        }

        self.transition(&mut active, SessionState::Closed);
        true
    }

    fn transition(&self, active: &mut ActiveSession, to: SessionState) {
        let from = active.session.state;
        if from != to {
            debug!(
                "Session {} state transition: {} -> {}",
                active.session.label(),
                from,
                to
            );
            active.session.state = to;
        }
        self.state_tx.send_replace(to);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| a.generation == generation)
    }

    pub(crate) fn snapshot(&self) -> Option<Session> {
        self.active.lock().as_ref().map(|a| a.session.clone())
    }

    /// Session id of the live session if it is connected
    pub(crate) fn connected_session_id(&self) -> Result<String> {
        let guard = self.active.lock();
        match guard.as_ref() {
            Some(active) if active.session.state == SessionState::Connected => active
                .session
                .session_id
                .clone()
                .ok_or_else(|| Error::Internal("connected session without id".to_string())),
            Some(active) => Err(Error::SessionNotActive(format!(
                "session is {}",
                active.session.state
            ))),
            None => Err(Error::SessionNotActive("no session".to_string())),
        }
    }

    async fn on_transport_state(self: &Arc<Self>, generation: u64, state: ConnectionState) {
        match state {
            ConnectionState::Connected => self.mark_connected(generation),
            ConnectionState::Disconnected => {
                warn!("Transport disconnected; waiting for ICE to recover")
            }
            state if state.is_terminal() => {
                let reason = if state == ConnectionState::Failed {
                    "peer connection failed"
                } else {
                    "peer connection closed by remote"
                };
                error!("{}", reason);
                let _ops = self.ops.lock().await;
                self.teardown_locked(TeardownCause::Failed(reason.to_string()), Some(generation))
                    .await;
            }
            _ => trace!("Transport state {:?}", state),
        }
    }

    fn mark_connected(&self, generation: u64) {
        let mut guard = self.active.lock();
        let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
            return;
        };
        if active.session.state != SessionState::Negotiating {
            return;
        }
        self.transition(active, SessionState::Connected);
        info!("Session {} connected", active.session.label());
        self.ensure_rendering(active);
    }

    fn on_track(&self, generation: u64, track: RemoteTrack) {
        let mut guard = self.active.lock();
        let Some(active) = guard.as_mut().filter(|a| a.generation == generation) else {
            return;
        };

        match (track.kind, track.frames) {
            (TrackKind::Video, Some(frames)) => {
                debug!("Video track {} attached", track.id);
                active.video = Some(frames);
                // A replacement video track restarts the loop on the new source
                if let Some(handle) = active.render.take() {
                    self.compositor.stop(handle);
                }
                self.ensure_rendering(active);
            }
            (TrackKind::Video, None) => warn!("Video track {} carries no frames", track.id),
            (TrackKind::Audio, _) => debug!("Audio track {} attached", track.id),
        }
    }

    fn on_data(&self, payload: Vec<u8>) {
        trace!("Data channel message: {} bytes", payload.len());
        let _ = self.data_tx.send(payload);
    }

    /// Bind a render loop once the session is connected and has video
    fn ensure_rendering(&self, active: &mut ActiveSession) {
        if active.session.state != SessionState::Connected || active.render.is_some() {
            return;
        }
        let Some(source) = active.video.clone() else {
            return;
        };

        let epoch = self.compositor.epoch().advance();
        let handle = self
            .compositor
            .start(source, Arc::clone(&self.surface), epoch);
        active.session.render_epoch = epoch;
        active.render = Some(handle);
    }
}

/// Relay locally gathered candidates in emission order
///
/// Runs until the candidate gate is closed and every candidate queued before
/// that point has been submitted.
async fn forward_candidates(
    api: Arc<dyn NegotiationApi>,
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<IceCandidate>,
) {
    let mut forwarded: u64 = 0;
    while let Some(candidate) = rx.recv().await {
        match api.submit_ice_candidate(&session_id, &candidate).await {
            Ok(()) => forwarded += 1,
            // ICE falls back to the remaining candidates
            Err(e) => warn!("Failed to submit ICE candidate for {}: {}", session_id, e),
        }
    }
    debug!(
        "Candidate forwarding for {} finished ({} forwarded)",
        session_id, forwarded
    );
}

/// Apply transport events to the session they were registered for
async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            break;
        }
        match event {
            TransportEvent::State(state) => inner.on_transport_state(generation, state).await,
            TransportEvent::Track(track) => inner.on_track(generation, track),
            TransportEvent::Data(payload) => inner.on_data(payload),
        }
    }
    trace!("Event pump for generation {} exited", generation);
}
