//! The H.264 encoder adapter.
//!
//! The codec itself is injected; this layer owns its configuration and the
//! forced-IDR latch behind [`KeyframeRequest`]. Backends emit Annex-B byte
//! streams (`00 00 00 01`-delimited NALs), one access unit per call.

use super::capture::Surface;
use crate::config::VideoConfig;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Errors raised by encoder backends.
#[derive(Debug)]
pub enum EncodeError {
    /// The backend rejected its configuration.
    Configuration(String),
    /// The backend failed while encoding.
    Backend(String),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "encoder rejected configuration: {msg}"),
            Self::Backend(msg) => write!(f, "encoder failure: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// An injected H.264 encoder.
///
/// Expected codec posture: Baseline profile, CBR at the configured bitrate,
/// low-latency (no frame reordering). `encode` may return `None` while the
/// codec buffers its first frames.
pub trait VideoEncoderBackend: Send {
    /// Applies dimensions, bitrate, FPS, and keyframe interval.
    fn configure(&mut self, config: &VideoConfig) -> Result<(), EncodeError>;

    /// Encodes one surface to an Annex-B access unit. `force_keyframe`
    /// demands an IDR in this (or the next emitted) access unit.
    fn encode(
        &mut self,
        surface: &Surface,
        force_keyframe: bool,
    ) -> Result<Option<Vec<u8>>, EncodeError>;
}

/// Requests an IDR from outside the capture thread.
#[derive(Clone, Debug, Default)]
pub struct KeyframeRequest(Arc<AtomicBool>);

impl KeyframeRequest {
    /// Forces the next encoded frame to be a keyframe.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Configured encoder plus the keyframe latch.
pub(crate) struct H264Encoder {
    backend: Box<dyn VideoEncoderBackend>,
    keyframe: KeyframeRequest,
}

impl H264Encoder {
    pub(crate) fn new(
        mut backend: Box<dyn VideoEncoderBackend>,
        config: VideoConfig,
    ) -> Result<Self, EncodeError> {
        backend.configure(&config)?;
        Ok(Self {
            backend,
            keyframe: KeyframeRequest::default(),
        })
    }

    /// Handle for keyframe demands from other threads.
    pub(crate) fn keyframe_request(&self) -> KeyframeRequest {
        self.keyframe.clone()
    }

    pub(crate) fn encode(&mut self, surface: &Surface) -> Result<Option<Vec<u8>>, EncodeError> {
        let force = self.keyframe.take();
        self.backend.encode(surface, force)
    }
}

#[cfg(test)]
mod test {
    use super::{super::capture::SurfaceData, *};

    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Record {
        configured: Arc<Mutex<Option<VideoConfig>>>,
        forced: Arc<Mutex<Vec<bool>>>,
    }

    struct RecordingBackend(Record);

    impl VideoEncoderBackend for RecordingBackend {
        fn configure(&mut self, config: &VideoConfig) -> Result<(), EncodeError> {
            *self.0.configured.lock().unwrap() = Some(*config);
            Ok(())
        }

        fn encode(
            &mut self,
            _surface: &Surface,
            force_keyframe: bool,
        ) -> Result<Option<Vec<u8>>, EncodeError> {
            self.0.forced.lock().unwrap().push(force_keyframe);
            Ok(Some(vec![0, 0, 0, 1, 0x61]))
        }
    }

    fn surface() -> Surface {
        Surface {
            width: 2,
            height: 2,
            data: SurfaceData::Bgra(vec![0; 16]),
        }
    }

    #[test]
    fn keyframe_request_latches_exactly_one_frame() {
        let record = Record::default();
        let mut encoder = H264Encoder::new(
            Box::new(RecordingBackend(record.clone())),
            VideoConfig::default(),
        )
        .unwrap();
        let handle = encoder.keyframe_request();

        encoder.encode(&surface()).unwrap();
        handle.request();
        encoder.encode(&surface()).unwrap();
        encoder.encode(&surface()).unwrap();

        assert_eq!(*record.forced.lock().unwrap(), vec![false, true, false]);
        assert!(record.configured.lock().unwrap().is_some());
    }
}
