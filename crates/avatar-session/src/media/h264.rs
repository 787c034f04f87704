//! Software H.264 decoding via OpenH264

use super::decoder::{EncodedSample, VideoDecoder};
use super::frame::{VideoFrame, BYTES_PER_PIXEL};
use crate::{Error, Result};
use openh264::decoder::Decoder;
use openh264::OpenH264API;

/// MIME type the decoder accepts
pub const H264_MIME_TYPE: &str = "video/H264";

/// Decodes Annex-B access units into RGBA frames
pub struct H264Decoder {
    decoder: Decoder,
    frames_decoded: u64,
}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        let decoder = Decoder::new(OpenH264API::from_source())
            .map_err(|e| Error::Internal(format!("Failed to create H.264 decoder: {}", e)))?;
        Ok(Self {
            decoder,
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl VideoDecoder for H264Decoder {
    fn decode(&mut self, sample: &EncodedSample) -> Result<Option<VideoFrame>> {
        let Some(yuv) = self
            .decoder
            .decode(&sample.data)
            .map_err(|e| Error::CompositorFrame(format!("H.264 decode failed: {}", e)))?
        else {
            return Ok(None);
        };

        let (width, height) = yuv.dimension_rgb();
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let mut rgba = vec![0u8; width * height * BYTES_PER_PIXEL];
        yuv.write_rgba8(&mut rgba);

        self.frames_decoded += 1;
        VideoFrame::new(width as u32, height as u32, rgba).map(Some)
    }
}
