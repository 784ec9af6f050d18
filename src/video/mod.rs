//! Video: capture pacing, encoder/decoder adapters, and the backend
//! contracts hosts implement with their platform codecs.

mod capture;
mod decode;
mod encode;

pub use capture::{CaptureError, Surface, SurfaceData, VideoCaptureSource};
pub(crate) use capture::CapturePipeline;
pub use decode::{DecodeError, DecodeOutput, DecodedImage, PixelLayout, VideoDecoderBackend};
pub(crate) use decode::H264Decoder;
pub use encode::{EncodeError, KeyframeRequest, VideoEncoderBackend};
pub(crate) use encode::H264Encoder;

use crate::config::{VideoConfig, VideoSourceConfig};

/// Factory for the platform video collaborators of one host.
///
/// Encoders are expected to target H.264 Baseline with CBR rate control and
/// low-latency output; decoders accept Annex-B access units.
pub trait MediaBackend: Send + Sync {
    /// Opens the configured capture surface.
    fn open_video_source(
        &self,
        source: &VideoSourceConfig,
    ) -> Result<Box<dyn VideoCaptureSource>, CaptureError>;

    /// Creates an encoder for one outgoing stream.
    fn create_encoder(
        &self,
        config: &VideoConfig,
    ) -> Result<Box<dyn VideoEncoderBackend>, EncodeError>;

    /// Creates a decoder for one viewed stream.
    fn create_decoder(&self) -> Result<Box<dyn VideoDecoderBackend>, DecodeError>;
}
