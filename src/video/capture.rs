//! Frame capture pacing.
//!
//! A capture source produces surfaces as fast as the OS offers them; the
//! pipeline thread samples it at the target FPS, stamps each frame with a
//! 90 kHz RTP timestamp derived from steady-clock elapsed time, and drops
//! frames instead of queueing when the encoder lags.

use super::encode::H264Encoder;
use crate::constants::VIDEO_CLOCK_RATE;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// One captured frame.
pub struct Surface {
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
    /// Pixel storage, possibly still GPU-side.
    pub data: SurfaceData,
}

/// Storage forms a capture source may deliver.
pub enum SurfaceData {
    /// Top-down interleaved BGRA.
    Bgra(Vec<u8>),
    /// NV12 with the given row stride.
    Nv12 {
        #[allow(missing_docs)]
        data: Vec<u8>,
        #[allow(missing_docs)]
        stride: u32,
    },
    /// A backend-native handle (GPU texture etc.); only meaningful to the
    /// encoder backend of the same host.
    Native(Box<dyn Any + Send>),
}

/// Errors raised by capture sources.
#[derive(Debug)]
pub enum CaptureError {
    /// The OS revoked access (desktop switch, UAC prompt). Recoverable by
    /// [`VideoCaptureSource::reset`].
    AccessLost,
    /// The captured window is gone; the pipeline ends.
    SourceClosed,
    /// Any other failure, with its own description.
    Backend(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessLost => f.write_str("capture access lost"),
            Self::SourceClosed => f.write_str("capture source closed"),
            Self::Backend(msg) => write!(f, "capture backend failure: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// A display or window surface producer.
pub trait VideoCaptureSource: Send {
    /// Current source dimensions.
    fn dimensions(&self) -> (u32, u32);

    /// Waits briefly for the next frame. `Ok(None)` means nothing new yet.
    fn next_frame(&mut self) -> Result<Option<Surface>, CaptureError>;

    /// Rebuilds the capture after [`CaptureError::AccessLost`].
    fn reset(&mut self) -> Result<(), CaptureError>;
}

/// Receives `(annex_b, rtp_timestamp)` access units on the capture thread.
pub(crate) type AccessUnitSink = Box<dyn FnMut(&[u8], u32) + Send>;

/// Invoked once if the source terminates on its own.
pub(crate) type EndSink = Box<dyn FnOnce() + Send>;

/// The capture thread: source → encoder → access-unit sink.
pub(crate) struct CapturePipeline {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub(crate) fn start(
        mut source: Box<dyn VideoCaptureSource>,
        mut encoder: H264Encoder,
        mut sink: AccessUnitSink,
        fps: u32,
        on_end: EndSink,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let fps = u64::from(fps.max(1));

        let flag = running.clone();
        let thread = thread::spawn(move || {
            let start = Instant::now();
            let mut frame_count: u64 = 0;
            let mut on_end = Some(on_end);

            info!("Video capture pipeline started.");

            while flag.load(Ordering::Acquire) {
                let surface = match source.next_frame() {
                    Ok(Some(surface)) => surface,
                    Ok(None) => continue,
                    Err(CaptureError::AccessLost) => {
                        debug!("Capture access lost; recreating.");
                        if source.reset().is_err() {
                            thread::sleep(Duration::from_secs(1));
                        }
                        continue;
                    },
                    Err(CaptureError::SourceClosed) => {
                        info!("Capture source closed; ending pipeline.");
                        if let Some(f) = on_end.take() {
                            f();
                        }
                        break;
                    },
                    Err(CaptureError::Backend(msg)) => {
                        warn!("Capture failure: {msg}");
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    },
                };

                let timestamp = video_timestamp(start.elapsed());

                match encoder.encode(&surface) {
                    Ok(Some(annex_b)) if !annex_b.is_empty() => sink(&annex_b, timestamp),
                    Ok(_) => {},
                    Err(e) => warn!("Video encode failed: {e}"),
                }

                frame_count += 1;

                // Frame-count pacing against the steady clock; a lagging
                // source simply skips ahead rather than queueing.
                let elapsed = start.elapsed();
                let expected = Duration::from_millis(frame_count * 1000 / fps);
                if expected > elapsed {
                    thread::sleep(expected - elapsed);
                }
            }

            info!("Video capture pipeline stopped.");
        });

        Self {
            running,
            thread: Some(thread),
        }
    }

    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 90 kHz RTP timestamp for a frame captured `elapsed` after session start.
pub(crate) fn video_timestamp(elapsed: Duration) -> u32 {
    (elapsed.as_micros() as u64 * VIDEO_CLOCK_RATE / 1_000_000) as u32
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::VideoConfig,
        video::encode::{EncodeError, VideoEncoderBackend},
    };
    use std::sync::Mutex;

    #[test]
    fn timestamps_follow_the_90khz_clock() {
        assert_eq!(video_timestamp(Duration::ZERO), 0);
        assert_eq!(video_timestamp(Duration::from_millis(1000 / 30)), 2970);
        assert_eq!(video_timestamp(Duration::from_secs(1)), 90_000);
        assert_eq!(video_timestamp(Duration::from_micros(1500)), 135);
    }

    #[test]
    fn timestamps_are_monotone_in_elapsed_time() {
        let mut last = 0;
        for ms in (0..2000).step_by(33) {
            let ts = video_timestamp(Duration::from_millis(ms));
            assert!(ts >= last);
            last = ts;
        }
    }

    /// Source that produces a fixed number of frames, then closes.
    struct CountedSource {
        remaining: u32,
        fail_at: Option<u32>,
        resets: Arc<Mutex<u32>>,
    }

    impl VideoCaptureSource for CountedSource {
        fn dimensions(&self) -> (u32, u32) {
            (64, 64)
        }

        fn next_frame(&mut self) -> Result<Option<Surface>, CaptureError> {
            if self.fail_at == Some(self.remaining) {
                self.fail_at = None;
                return Err(CaptureError::AccessLost);
            }

            if self.remaining == 0 {
                return Err(CaptureError::SourceClosed);
            }
            self.remaining -= 1;

            Ok(Some(Surface {
                width: 64,
                height: 64,
                data: SurfaceData::Bgra(vec![0u8; 64 * 64 * 4]),
            }))
        }

        fn reset(&mut self) -> Result<(), CaptureError> {
            *self.resets.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Encoder backend that emits one tiny NAL per surface.
    struct StubEncoder;

    impl VideoEncoderBackend for StubEncoder {
        fn configure(&mut self, _config: &VideoConfig) -> Result<(), EncodeError> {
            Ok(())
        }

        fn encode(
            &mut self,
            _surface: &Surface,
            force_keyframe: bool,
        ) -> Result<Option<Vec<u8>>, EncodeError> {
            let nal_type: u8 = if force_keyframe { 0x65 } else { 0x61 };
            Ok(Some(vec![0, 0, 0, 1, nal_type, 0xAA]))
        }
    }

    #[test]
    fn pipeline_recovers_from_access_loss_and_signals_close() {
        let resets = Arc::new(Mutex::new(0));
        let source = CountedSource {
            remaining: 5,
            fail_at: Some(3),
            resets: resets.clone(),
        };

        let encoder = H264Encoder::new(Box::new(StubEncoder), VideoConfig::default()).unwrap();

        let units = Arc::new(Mutex::new(Vec::new()));
        let sink_units = units.clone();
        let ended = Arc::new(Mutex::new(false));
        let ended_flag = ended.clone();

        let mut pipeline = CapturePipeline::start(
            Box::new(source),
            encoder,
            Box::new(move |au, ts| sink_units.lock().unwrap().push((au.to_vec(), ts))),
            1000,
            Box::new(move || *ended_flag.lock().unwrap() = true),
        );

        // The source closes itself after five frames.
        while !*ended.lock().unwrap() {
            std::thread::sleep(Duration::from_millis(5));
        }
        pipeline.stop();

        assert_eq!(units.lock().unwrap().len(), 5);
        assert_eq!(*resets.lock().unwrap(), 1);

        let units = units.lock().unwrap();
        for pair in units.windows(2) {
            assert!(pair[1].1 >= pair[0].1, "timestamps must not regress");
        }
    }
}
