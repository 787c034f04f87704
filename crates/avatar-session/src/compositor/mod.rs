//! Frame compositing
//!
//! A render loop pulls the current decoded frame from a [`FrameSource`] on a
//! fixed display cadence, applies the chroma key and draws the result on a
//! [`PresentationSurface`].
//!
//! Loops are invalidated through a [`RenderEpoch`]: every loop captures the
//! epoch it was started with and stops as soon as the live value differs.
//! Rapid stop/start sequences therefore can never leave an old loop drawing
//! over a new one.

mod chroma;
mod surface;

pub use chroma::apply_chroma_key;
pub use surface::{PixelSurface, PresentationSurface, SharedSurface};

use crate::config::{ChromaKeyConfig, CompositorConfig};
use crate::media::FrameSource;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Monotonic render-loop generation counter
///
/// Only the session controller advances it; the compositor reads it.
#[derive(Debug, Clone, Default)]
pub struct RenderEpoch {
    value: Arc<AtomicU64>,
}

impl RenderEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live epoch value
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Invalidate every running loop and return the new epoch
    pub(crate) fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Token for one running render loop
#[derive(Debug)]
pub struct RenderLoopHandle {
    epoch: u64,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RenderLoopHandle {
    /// Epoch the loop was started with
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs render loops against a shared epoch
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    config: CompositorConfig,
    epoch: RenderEpoch,
}

impl FrameCompositor {
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the frame interval is out of range.
    pub fn new(config: CompositorConfig, epoch: RenderEpoch) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, epoch })
    }

    pub fn epoch(&self) -> &RenderEpoch {
        &self.epoch
    }

    /// Start a render loop bound to `render_epoch`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use remotemedia_avatar_session::{
    ///     CompositorConfig, FrameCompositor, FrameSlot, PixelSurface, RenderEpoch, VideoFrame,
    /// };
    /// use std::sync::Arc;
    ///
    /// let compositor =
    ///     FrameCompositor::new(CompositorConfig::default(), RenderEpoch::new()).unwrap();
    /// let source = Arc::new(FrameSlot::new());
    /// source.publish(VideoFrame::filled(2, 2, [0, 255, 0, 255]));
    ///
    /// let (_surface, shared) = PixelSurface::shared();
    /// let handle = compositor.start(source, shared, compositor.epoch().current());
    /// compositor.stop(handle);
    /// # });
    /// ```
    pub fn start(
        &self,
        source: Arc<dyn FrameSource>,
        surface: SharedSurface,
        render_epoch: u64,
    ) -> RenderLoopHandle {
        let stopped = Arc::new(AtomicBool::new(false));
        let render_loop = RenderLoop {
            source,
            surface,
            live: self.epoch.clone(),
            epoch: render_epoch,
            stopped: Arc::clone(&stopped),
            interval: self.config.frame_interval(),
            chroma_key: self.config.chroma_key,
        };

        debug!("Starting render loop for epoch {}", render_epoch);
        RenderLoopHandle {
            epoch: render_epoch,
            stopped,
            task: tokio::spawn(render_loop.run()),
        }
    }

    /// Stop a render loop. Safe on loops that already exited.
    pub fn stop(&self, handle: RenderLoopHandle) {
        handle.stopped.store(true, Ordering::SeqCst);
        handle.task.abort();
        debug!("Stopped render loop for epoch {}", handle.epoch);
    }
}

struct RenderLoop {
    source: Arc<dyn FrameSource>,
    surface: SharedSurface,
    live: RenderEpoch,
    epoch: u64,
    stopped: Arc<AtomicBool>,
    interval: Duration,
    chroma_key: ChromaKeyConfig,
}

impl RenderLoop {
    fn is_current(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.live.current() == self.epoch
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames: u64 = 0;

        loop {
            ticker.tick().await;
            if !self.is_current() {
                break;
            }
            match self.composite() {
                Ok(()) => frames += 1,
                // Transient: the source is detached or mid resolution change
                Err(e) => trace!("Skipping frame for epoch {}: {}", self.epoch, e),
            }
        }

        debug!(
            "Render loop for epoch {} exited after {} frames",
            self.epoch, frames
        );
    }

    /// Draw one frame
    fn composite(&self) -> Result<()> {
        let (width, height) = self.source.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::CompositorFrame(format!(
                "source has no drawable frame ({}x{})",
                width, height
            )));
        }

        let mut frame = self
            .source
            .current_frame()
            .ok_or_else(|| Error::CompositorFrame("source detached".to_string()))?;
        frame.validate()?;
        apply_chroma_key(&mut frame.data, &self.chroma_key);

        let mut surface = self.surface.lock();
        if surface.size() != (frame.width, frame.height) {
            surface.resize(frame.width, frame.height);
        }
        // The epoch may have moved while the frame was being filtered
        if !self.is_current() {
            return Err(Error::CompositorFrame("render loop superseded".to_string()));
        }
        surface.draw(&frame)
    }
}
