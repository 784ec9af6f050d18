//! Contracts for the injected OS audio collaborators.
//!
//! The engine never talks to a sound API directly: hosts hand it an
//! [`AudioBackend`] and the engine drives capture/playback through the
//! callback contracts below. Device identifiers are opaque byte blobs minted
//! by the backend and round-tripped verbatim.

use std::sync::Arc;

/// One selectable device, as enumerated by the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Backend-specific identifier blob; reinterpreted only by the backend.
    pub id: Vec<u8>,
}

/// Format of the PCM a capture source delivers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamSpec {
    #[allow(missing_docs)]
    pub sample_rate: u32,
    #[allow(missing_docs)]
    pub channels: u16,
}

/// Receives interleaved `i16` PCM on the backend's capture thread.
pub type CaptureSink = Arc<dyn Fn(&[i16]) + Send + Sync>;

/// Fills a zero-initialized interleaved `f32` buffer on the backend's
/// playback thread.
pub type PlaybackSource = Arc<dyn Fn(&mut [f32]) + Send + Sync>;

/// A started-on-demand PCM capture stream.
///
/// Microphone sources must deliver s16 stereo 48 kHz in 480-frame periods;
/// loopback sources may deliver any [`StreamSpec`] and are resampled by the
/// caller.
pub trait CaptureSource: Send {
    /// The format frames will be delivered in.
    fn spec(&self) -> StreamSpec;

    /// Starts delivery into `sink`. Idempotent once started.
    fn start(&mut self, sink: CaptureSink) -> Result<(), DeviceError>;

    /// Stops delivery. No callbacks run after this returns.
    fn stop(&mut self);
}

/// A started-on-demand PCM playback stream: f32 stereo 48 kHz.
pub trait PlaybackSink: Send {
    /// Starts pulling from `source`. Idempotent once started.
    fn start(&mut self, source: PlaybackSource) -> Result<(), DeviceError>;

    /// Stops pulling. No callbacks run after this returns.
    fn stop(&mut self);
}

/// Factory for the OS audio streams of one host platform.
pub trait AudioBackend: Send + Sync {
    /// Enumerates capture devices.
    fn capture_devices(&self) -> Vec<DeviceInfo>;

    /// Enumerates playback devices.
    fn playback_devices(&self) -> Vec<DeviceInfo>;

    /// Opens a microphone stream on `device` (`None` = default): s16 stereo
    /// 48 kHz, 480-frame periods.
    fn open_capture(&self, device: Option<&[u8]>) -> Result<Box<dyn CaptureSource>, DeviceError>;

    /// Opens a playback stream on `device` (`None` = default): f32 stereo
    /// 48 kHz.
    fn open_playback(&self, device: Option<&[u8]>) -> Result<Box<dyn PlaybackSink>, DeviceError>;

    /// Opens a loopback stream of the default render device, in whatever
    /// format the OS mixes at.
    fn open_loopback(&self) -> Result<Box<dyn CaptureSource>, DeviceError>;
}

/// A denoiser run over capture audio before the voice gate.
///
/// `frame` is one 480-sample mono frame at 48 kHz, scaled to
/// `[-32768, 32768]`, processed in place.
pub trait Denoiser: Send {
    #[allow(missing_docs)]
    fn process(&mut self, frame: &mut [f32]);
}

/// Errors raised by audio backends.
#[derive(Debug)]
pub enum DeviceError {
    /// The requested device id matched nothing.
    NotFound,
    /// The backend has no stream of the requested kind.
    Unsupported,
    /// Any other backend failure, with its own description.
    Backend(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such audio device"),
            Self::Unsupported => f.write_str("stream kind not supported by this backend"),
            Self::Backend(msg) => write!(f, "audio backend failure: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A backend with no devices at all.
///
/// Lets the rest of a session run on machines without audio hardware, and
/// anchors engine tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAudioBackend;

impl AudioBackend for NullAudioBackend {
    fn capture_devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn playback_devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn open_capture(&self, _device: Option<&[u8]>) -> Result<Box<dyn CaptureSource>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn open_playback(&self, _device: Option<&[u8]>) -> Result<Box<dyn PlaybackSink>, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn open_loopback(&self) -> Result<Box<dyn CaptureSource>, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}
