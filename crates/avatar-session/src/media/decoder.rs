//! Video decoding seam
//!
//! The WebRTC transport reassembles RTP packets into encoded samples; turning
//! those into RGBA frames is delegated to a [`VideoDecoder`]. The `h264`
//! feature bundles an OpenH264 decoder; other codecs are supplied by the
//! embedding application.

use super::VideoFrame;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// One reassembled, still-encoded video sample
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Codec MIME type as negotiated, e.g. "video/VP8"
    pub mime_type: String,
    pub data: Vec<u8>,
    pub duration: Duration,
}

/// Decodes encoded samples into RGBA frames
pub trait VideoDecoder: Send {
    /// Decode one sample; `Ok(None)` means the decoder needs more input
    fn decode(&mut self, sample: &EncodedSample) -> Result<Option<VideoFrame>>;
}

/// Builds one decoder per remote video track
pub type VideoDecoderFactory = Arc<dyn Fn(&str) -> Option<Box<dyn VideoDecoder>> + Send + Sync>;

/// Decoders compiled into this build, keyed by negotiated MIME type
///
/// With the `h264` feature this yields an OpenH264 decoder for H.264
/// tracks; otherwise `None`, and callers must supply their own factory.
pub fn default_decoder_factory() -> Option<VideoDecoderFactory> {
    #[cfg(feature = "h264")]
    {
        let factory: VideoDecoderFactory = Arc::new(|mime_type: &str| {
            if !mime_type.eq_ignore_ascii_case(super::h264::H264_MIME_TYPE) {
                return None;
            }
            match super::h264::H264Decoder::new() {
                Ok(decoder) => Some(Box::new(decoder) as Box<dyn VideoDecoder>),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            }
        });
        Some(factory)
    }

    #[cfg(not(feature = "h264"))]
    {
        None
    }
}
