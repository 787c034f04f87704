//! Decoded video frames and the sources that hold them
//!
//! The peer transport publishes decoded frames into a [`FrameSlot`]; the
//! compositor reads whatever frame is current on each render tick.

pub mod decoder;
pub mod frame;
#[cfg(feature = "h264")]
pub mod h264;

pub use decoder::{default_decoder_factory, EncodedSample, VideoDecoder, VideoDecoderFactory};
#[cfg(feature = "h264")]
pub use h264::H264Decoder;
pub use frame::{FrameSlot, FrameSource, VideoFrame};
