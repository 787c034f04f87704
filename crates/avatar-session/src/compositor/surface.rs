//! Presentation surfaces

use crate::media::VideoFrame;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// A drawable 2D target with pixel access, sized to the incoming video
pub trait PresentationSurface: Send {
    /// Current (width, height)
    fn size(&self) -> (u32, u32);

    /// Resize the surface; existing contents are discarded
    fn resize(&mut self, width: u32, height: u32);

    /// Replace the surface contents with `frame`. Frame and surface
    /// dimensions must match.
    fn draw(&mut self, frame: &VideoFrame) -> Result<()>;
}

/// Surface shared between the controller and the render loop
pub type SharedSurface = Arc<Mutex<dyn PresentationSurface>>;

/// In-memory RGBA surface
#[derive(Debug, Default)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    frames_drawn: u64,
}

impl PixelSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into a [`SharedSurface`] while keeping a typed handle
    pub fn shared() -> (Arc<Mutex<PixelSurface>>, SharedSurface) {
        let typed = Arc::new(Mutex::new(PixelSurface::new()));
        let shared: SharedSurface = typed.clone();
        (typed, shared)
    }

    /// Number of successful draws
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Option<VideoFrame> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        Some(VideoFrame {
            width: self.width,
            height: self.height,
            data: self.pixels.clone(),
        })
    }
}

impl PresentationSurface for PixelSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * 4];
    }

    fn draw(&mut self, frame: &VideoFrame) -> Result<()> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(Error::CompositorFrame(format!(
                "frame {}x{} does not match surface {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        frame.validate()?;
        self.pixels.copy_from_slice(&frame.data);
        self.frames_drawn += 1;
        Ok(())
    }
}
