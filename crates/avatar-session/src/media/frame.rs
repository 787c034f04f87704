//! RGBA video frames and latest-frame storage

use crate::{Error, Result};
use parking_lot::Mutex;

/// Bytes per RGBA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// One decoded video frame, tightly packed RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Wrap an RGBA buffer, checking its length against the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let frame = Self {
            width,
            height,
            data,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Frame filled with a single RGBA colour
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Expected buffer length for the frame's dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Check that the frame is drawable
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::CompositorFrame(format!(
                "zero-sized frame {}x{}",
                self.width, self.height
            )));
        }
        if self.data.len() != self.expected_len() {
            return Err(Error::CompositorFrame(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                self.data.len(),
                self.expected_len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Something the compositor can pull frames from
///
/// Dimensions are re-read every render tick; they change when the remote
/// stream switches resolution and may briefly be zero.
pub trait FrameSource: Send + Sync {
    /// Current frame dimensions, (0, 0) when nothing is available
    fn dimensions(&self) -> (u32, u32);

    /// Copy of the current frame
    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Holds the most recently decoded frame of a remote video track
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<VideoFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn publish(&self, frame: VideoFrame) {
        *self.latest.lock() = Some(frame);
    }

    /// Drop the current frame (source detached)
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }
}

impl FrameSource for FrameSlot {
    fn dimensions(&self) -> (u32, u32) {
        self.latest
            .lock()
            .as_ref()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0))
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_buffer_length() {
        assert!(VideoFrame::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            VideoFrame::new(2, 2, vec![0; 15]),
            Err(Error::CompositorFrame(_))
        ));
        assert!(VideoFrame::new(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn test_frame_slot_tracks_latest() {
        let slot = FrameSlot::new();
        assert_eq!(slot.dimensions(), (0, 0));
        assert!(slot.current_frame().is_none());

        slot.publish(VideoFrame::filled(4, 2, [0, 0, 0, 255]));
        assert_eq!(slot.dimensions(), (4, 2));

        slot.publish(VideoFrame::filled(8, 6, [0, 0, 0, 255]));
        assert_eq!(slot.dimensions(), (8, 6));

        slot.clear();
        assert_eq!(slot.dimensions(), (0, 0));
    }
}
