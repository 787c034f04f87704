//! webrtc-rs backed peer transport

use super::transport::*;
use crate::config::TransportConfig;
use crate::media::{EncodedSample, FrameSlot, VideoDecoder, VideoDecoderFactory};
use crate::signaling::{IceCandidate, IceServerDescriptor, NegotiationOffer, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packetizer::Depacketizer;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Packets the sample builder may hold back waiting for reordering
const MAX_LATE_PACKETS: u16 = 256;

/// Registered sinks, shared with the webrtc-rs handlers
#[derive(Default)]
struct Sinks {
    ice_candidate: Mutex<Option<IceCandidateCallback>>,
    track: Mutex<Option<TrackCallback>>,
    state: Mutex<Option<ConnectionStateCallback>>,
    data: Mutex<Option<DataMessageCallback>>,
}

impl Sinks {
    fn clear(&self) {
        *self.ice_candidate.lock() = None;
        *self.track.lock() = None;
        *self.state.lock() = None;
        *self.data.lock() = None;
    }
}

/// [`PeerTransport`] over a webrtc-rs `RTCPeerConnection`
pub struct WebRtcPeerTransport {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    offer_applied: AtomicBool,

    /// Set on close; handlers stop dispatching once it is set
    closed: Arc<AtomicBool>,

    sinks: Arc<Sinks>,
}

impl WebRtcPeerTransport {
    /// Create a new peer connection
    ///
    /// # Arguments
    ///
    /// * `ice_servers` - ICE servers handed out by the avatar service
    /// * `config` - Local STUN/TURN additions
    /// * `decoder_factory` - Builds a decoder for each remote video track
    #[instrument(skip_all)]
    pub async fn new(
        ice_servers: &[IceServerDescriptor],
        config: &TransportConfig,
        decoder_factory: Option<VideoDecoderFactory>,
    ) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers, config),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::Transport(format!("Failed to create peer connection: {}", e))
            })?);

        let transport = Self {
            connection_id,
            peer_connection,
            offer_applied: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            sinks: Arc::new(Sinks::default()),
        };
        transport.install_handlers(decoder_factory);

        Ok(transport)
    }

    /// Wire webrtc-rs events to the registered sinks
    fn install_handlers(&self, decoder_factory: Option<VideoDecoderFactory>) {
        let sinks = Arc::clone(&self.sinks);
        let closed = Arc::clone(&self.closed);
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if !closed.load(Ordering::SeqCst) {
                    if let Some(candidate) = candidate.and_then(|c| to_ice_candidate(&c)) {
                        if let Some(sink) = sinks.ice_candidate.lock().as_ref() {
                            sink(candidate);
                        }
                    }
                }
                Box::pin(async {})
            }));

        let sinks = Arc::clone(&self.sinks);
        let closed = Arc::clone(&self.closed);
        let connection_id = self.connection_id.clone();
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state = match s {
                    RTCPeerConnectionState::New => Some(ConnectionState::New),
                    RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                    RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                    RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                    _ => None,
                };
                if let Some(state) = state {
                    debug!("Connection {} reported {:?}", connection_id, state);
                    if !closed.load(Ordering::SeqCst) {
                        if let Some(sink) = sinks.state.lock().as_ref() {
                            sink(state);
                        }
                    }
                }
                Box::pin(async {})
            },
        ));

        let sinks = Arc::clone(&self.sinks);
        let closed = Arc::clone(&self.closed);
        self.peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sinks = Arc::clone(&sinks);
            let closed = Arc::clone(&closed);
            let decoder_factory = decoder_factory.clone();

            Box::pin(async move {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                let remote = spawn_track_reader(track, decoder_factory, Arc::clone(&closed));
                info!("Remote track received: kind={:?}, id={}", remote.kind, remote.id);
                if let Some(sink) = sinks.track.lock().as_ref() {
                    sink(remote);
                }
            })
        }));

        let sinks = Arc::clone(&self.sinks);
        let closed = Arc::clone(&self.closed);
        self.peer_connection.on_data_channel(Box::new(move |data_channel| {
            let sinks = Arc::clone(&sinks);
            let closed = Arc::clone(&closed);

            Box::pin(async move {
                debug!("Data channel opened: label={}", data_channel.label());
                data_channel.on_message(Box::new(move |msg| {
                    if !closed.load(Ordering::SeqCst) {
                        if let Some(sink) = sinks.data.lock().as_ref() {
                            sink(msg.data.to_vec());
                        }
                    }
                    Box::pin(async {})
                }));
            })
        }));
    }

    /// Get the underlying WebRTC peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn apply_remote_offer(&self, offer: &NegotiationOffer) -> Result<()> {
        if self.offer_applied.swap(true, Ordering::SeqCst) {
            return Err(Error::Negotiation(
                "remote offer already applied to this connection".to_string(),
            ));
        }
        if offer.sdp.sdp_type != "offer" {
            return Err(Error::Negotiation(format!(
                "expected an offer, got {}",
                offer.sdp.sdp_type
            )));
        }

        let desc = RTCSessionDescription::offer(offer.sdp.sdp.clone())
            .map_err(|e| Error::Negotiation(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

        debug!("Applied remote offer on {}", self.connection_id);
        Ok(())
    }

    async fn create_local_answer(&self) -> Result<SessionDescription> {
        if !self.offer_applied.load(Ordering::SeqCst) {
            return Err(Error::Negotiation(
                "create_local_answer called before apply_remote_offer".to_string(),
            ));
        }

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::Negotiation("No local description after setting answer".to_string())
        })?;

        debug!("Created SDP answer on {}", self.connection_id);
        Ok(SessionDescription::answer(local_desc.sdp))
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        *self.sinks.ice_candidate.lock() = Some(callback);
    }

    fn on_track_received(&self, callback: TrackCallback) {
        *self.sinks.track.lock() = Some(callback);
    }

    fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        *self.sinks.state.lock() = Some(callback);
    }

    fn on_data_message(&self, callback: DataMessageCallback) {
        *self.sinks.data.lock() = Some(callback);
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing peer connection {}", self.connection_id);

        // Drop the sinks first so nothing fires while the connection unwinds
        self.sinks.clear();

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close connection: {}", e)))
    }
}

/// Builds [`WebRtcPeerTransport`]s
pub struct WebRtcTransportFactory {
    config: TransportConfig,
    decoder_factory: Option<VideoDecoderFactory>,
}

impl WebRtcTransportFactory {
    /// Uses the decoders compiled into this build, see
    /// [`default_decoder_factory`](crate::media::default_decoder_factory)
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            decoder_factory: crate::media::default_decoder_factory(),
        }
    }

    /// Decode remote video with decoders from `factory` instead
    pub fn with_decoder_factory(mut self, factory: VideoDecoderFactory) -> Self {
        self.decoder_factory = Some(factory);
        self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, ice_servers: &[IceServerDescriptor]) -> Result<Arc<dyn PeerTransport>> {
        let transport =
            WebRtcPeerTransport::new(ice_servers, &self.config, self.decoder_factory.clone())
                .await?;
        Ok(Arc::new(transport))
    }
}

/// Service-provided servers first, then the locally configured STUN/TURN
fn rtc_ice_servers(remote: &[IceServerDescriptor], config: &TransportConfig) -> Vec<RTCIceServer> {
    remote
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .chain(config.stun_servers.iter().map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        }))
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect()
}

fn to_ice_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }),
        Err(e) => {
            warn!("Failed to serialize local ICE candidate: {}", e);
            None
        }
    }
}

/// Start draining a remote track. Video tracks are depacketized and decoded
/// into a [`FrameSlot`]; audio is read and discarded so the interceptors
/// keep running.
fn spawn_track_reader(
    track: Arc<TrackRemote>,
    decoder_factory: Option<VideoDecoderFactory>,
    closed: Arc<AtomicBool>,
) -> RemoteTrack {
    let id = track.id();
    let stream_id = track.stream_id();

    if track.kind() != RTPCodecType::Video {
        tokio::spawn(drain_track(track, closed));
        return RemoteTrack {
            id,
            stream_id,
            kind: TrackKind::Audio,
            frames: None,
        };
    }

    let codec = track.codec();
    let mime_type = codec.capability.mime_type.clone();
    let clock_rate = codec.capability.clock_rate;
    let decoder = decoder_factory.as_ref().and_then(|factory| factory(&mime_type));
    if decoder.is_none() {
        warn!("No decoder for {} on track {}; video will not be composited", mime_type, id);
    }

    let slot = Arc::new(FrameSlot::new());
    let reader = VideoReader {
        track,
        mime_type: mime_type.clone(),
        decoder,
        slot: Arc::clone(&slot),
        closed,
    };

    if mime_type.eq_ignore_ascii_case("video/vp8") {
        tokio::spawn(reader.run(Vp8Packet::default(), clock_rate));
    } else if mime_type.eq_ignore_ascii_case("video/h264") {
        tokio::spawn(reader.run(H264Packet::default(), clock_rate));
    } else {
        warn!("Unsupported video codec {}; draining track {}", mime_type, id);
        tokio::spawn(drain_track(reader.track, reader.closed));
    }

    RemoteTrack {
        id,
        stream_id,
        kind: TrackKind::Video,
        frames: Some(slot),
    }
}

async fn drain_track(track: Arc<TrackRemote>, closed: Arc<AtomicBool>) {
    while !closed.load(Ordering::SeqCst) {
        if let Err(e) = track.read_rtp().await {
            debug!("Track {} ended: {}", track.id(), e);
            break;
        }
    }
}

struct VideoReader {
    track: Arc<TrackRemote>,
    mime_type: String,
    decoder: Option<Box<dyn VideoDecoder>>,
    slot: Arc<FrameSlot>,
    closed: Arc<AtomicBool>,
}

impl VideoReader {
    async fn run<D: Depacketizer + Send + 'static>(mut self, depacketizer: D, clock_rate: u32) {
        let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, depacketizer, clock_rate);

        while !self.closed.load(Ordering::SeqCst) {
            let packet = match self.track.read_rtp().await {
                Ok((packet, _)) => packet,
                Err(e) => {
                    debug!("Video track {} ended: {}", self.track.id(), e);
                    break;
                }
            };
            builder.push(packet);

            while let Some(sample) = builder.pop() {
                let Some(decoder) = self.decoder.as_mut() else {
                    continue;
                };
                let encoded = EncodedSample {
                    mime_type: self.mime_type.clone(),
                    data: sample.data.to_vec(),
                    duration: sample.duration,
                };
                match decoder.decode(&encoded) {
                    Ok(Some(frame)) => self.slot.publish(frame),
                    Ok(None) => {}
                    Err(e) => debug!("Dropping undecodable sample: {}", e),
                }
            }
        }

        self.slot.clear();
    }
}
