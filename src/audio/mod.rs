//! Audio: device contracts, the capture/playback engine, and the loopback
//! (soundshare) pipeline.

mod backend;
mod engine;
mod loopback;

pub use backend::{
    AudioBackend,
    CaptureSink,
    CaptureSource,
    Denoiser,
    DeviceError,
    DeviceInfo,
    NullAudioBackend,
    PlaybackSink,
    PlaybackSource,
    StreamSpec,
};
pub use engine::AudioEngine;
pub(crate) use loopback::LoopbackPipeline;

use std::sync::atomic::{AtomicU64, Ordering};

/// Errors raised while building or driving the audio engine.
#[derive(Debug)]
pub enum AudioError {
    /// A device could not be opened or started.
    Device(DeviceError),
    /// The Opus coder rejected its configuration or input.
    Opus(audiopus::Error),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(e) => write!(f, "audio device error: {e}"),
            Self::Opus(e) => write!(f, "opus coder error: {e}"),
        }
    }
}

impl std::error::Error for AudioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Opus(e) => Some(e),
        }
    }
}

impl From<DeviceError> for AudioError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<audiopus::Error> for AudioError {
    fn from(e: audiopus::Error) -> Self {
        Self::Opus(e)
    }
}

/// `f64` with atomic load/store, for scalar settings touched from device
/// callback threads.
#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
