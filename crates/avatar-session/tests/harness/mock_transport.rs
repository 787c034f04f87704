//! Mock peer transports

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_avatar_session::peer::{
    ConnectionStateCallback, DataMessageCallback, IceCandidateCallback, TrackCallback,
};
use remotemedia_avatar_session::signaling::{IceServerDescriptor, NegotiationOffer};
use remotemedia_avatar_session::{
    ConnectionState, Error, FrameSlot, PeerTransport, RemoteTrack, Result, SessionDescription,
    TrackKind, TransportFactory, VideoFrame,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared live-instance accounting
#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

pub struct MockTransport {
    id: String,
    counters: Arc<Counters>,
    auto_connect: bool,
    fail_offer: bool,
    frames: Arc<FrameSlot>,
    offer_applied: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    on_candidate: Mutex<Option<IceCandidateCallback>>,
    on_state: Mutex<Option<ConnectionStateCallback>>,
    on_track: Mutex<Option<TrackCallback>>,
    on_data: Mutex<Option<DataMessageCallback>>,
}

impl MockTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.frames)
    }

    /// Fire a candidate unless the transport is closed
    pub fn emit_candidate(&self, line: &str) {
        if !self.is_closed() {
            self.emit_candidate_unchecked(line);
        }
    }

    /// Fire a candidate even after close, as a late native callback would
    pub fn emit_candidate_unchecked(&self, line: &str) {
        if let Some(cb) = self.on_candidate.lock().as_ref() {
            cb(remotemedia_avatar_session::IceCandidate::new(line));
        }
    }

    pub fn emit_state(&self, state: ConnectionState) {
        if let Some(cb) = self.on_state.lock().as_ref() {
            cb(state);
        }
    }

    pub fn emit_video_track(&self) {
        if let Some(cb) = self.on_track.lock().as_ref() {
            cb(RemoteTrack {
                id: format!("{}-video", self.id),
                stream_id: "avatar".to_string(),
                kind: TrackKind::Video,
                frames: Some(self.frames.clone()),
            });
        }
    }

    pub fn emit_audio_track(&self) {
        if let Some(cb) = self.on_track.lock().as_ref() {
            cb(RemoteTrack {
                id: format!("{}-audio", self.id),
                stream_id: "avatar".to_string(),
                kind: TrackKind::Audio,
                frames: None,
            });
        }
    }

    pub fn emit_data(&self, payload: &[u8]) {
        if let Some(cb) = self.on_data.lock().as_ref() {
            cb(payload.to_vec());
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn apply_remote_offer(&self, offer: &NegotiationOffer) -> Result<()> {
        if self.fail_offer {
            return Err(Error::Negotiation("scripted offer rejection".to_string()));
        }
        if offer.sdp.sdp_type != "offer" {
            return Err(Error::Negotiation("not an offer".to_string()));
        }
        if self.offer_applied.swap(true, Ordering::SeqCst) {
            return Err(Error::Negotiation("remote offer already applied".to_string()));
        }
        Ok(())
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        if !self.offer_applied.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("no remote offer".to_string()));
        }

        if self.auto_connect {
            self.emit_state(ConnectionState::Connecting);
            self.emit_candidate("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host");
            self.emit_audio_track();
            self.emit_video_track();
            self.emit_state(ConnectionState::Connected);
        }

        Ok(SessionDescription::answer(format!("v=0\r\no=answer {}\r\n", self.id)))
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        *self.on_candidate.lock() = Some(callback);
    }

    fn on_track_received(&self, callback: TrackCallback) {
        *self.on_track.lock() = Some(callback);
    }

    fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        *self.on_state.lock() = Some(callback);
    }

    fn on_data_message(&self, callback: DataMessageCallback) {
        *self.on_data.lock() = Some(callback);
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.emit_state(ConnectionState::Closed);
        }
        Ok(())
    }
}

pub struct MockTransportFactory {
    counters: Arc<Counters>,
    created: Mutex<Vec<Arc<MockTransport>>>,
    auto_connect: bool,
    fail_create: AtomicBool,
    fail_offer: AtomicBool,
}

impl MockTransportFactory {
    pub fn new(auto_connect: bool) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            created: Mutex::new(Vec::new()),
            auto_connect,
            fail_create: AtomicBool::new(false),
            fail_offer: AtomicBool::new(false),
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_offer(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    /// Transports currently open
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of transports ever open at once
    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn get(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no transport created yet")
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(&self, _ice_servers: &[IceServerDescriptor]) -> Result<Arc<dyn PeerTransport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted transport failure".to_string()));
        }

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        let frames = Arc::new(FrameSlot::new());
        frames.publish(VideoFrame::filled(4, 4, [0, 255, 0, 255]));

        let transport = Arc::new(MockTransport {
            id: format!("mock-{}", self.created.lock().len() + 1),
            counters: Arc::clone(&self.counters),
            auto_connect: self.auto_connect,
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            frames,
            offer_applied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            on_candidate: Mutex::new(None),
            on_state: Mutex::new(None),
            on_track: Mutex::new(None),
            on_data: Mutex::new(None),
        });
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}
