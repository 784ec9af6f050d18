//! Loopback (soundshare) audio: the OS mix stream, encoded and sent
//! alongside a screen share.
//!
//! The loopback source delivers whatever format the OS mixes at; frames are
//! nearest-neighbor resampled to 48 kHz stereo, accumulated into 20 ms
//! Opus frames, and sent on the session's audio SSRC with the sender's own
//! sequence/nonce counters. The RTP timestamp advances by 960 per frame.

use super::{backend::{AudioBackend, CaptureSource, StreamSpec}, AtomicF64, AudioError};
use crate::{constants::*, driver::sender::OpusRtpSender};
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate, Signal};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

struct Shared {
    encoder: Mutex<Encoder>,
    sender: Mutex<OpusRtpSender>,
    pending: Mutex<Vec<i16>>,
    rtp_timestamp: Mutex<u32>,
    gain: AtomicF64,
    spec: StreamSpec,
}

/// A running loopback capture → Opus → RTP pipeline.
pub(crate) struct LoopbackPipeline {
    source: Box<dyn CaptureSource>,
    shared: Arc<Shared>,
}

impl LoopbackPipeline {
    /// Opens the loopback stream and starts encoding. Music-signal Opus at
    /// the configured (higher) bitrate.
    pub(crate) fn start(
        backend: &dyn AudioBackend,
        bitrate: i32,
        sender: OpusRtpSender,
    ) -> Result<Self, AudioError> {
        let mut source = backend.open_loopback()?;
        let spec = source.spec();

        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(bitrate))?;
        encoder.set_signal(Signal::Music)?;

        let shared = Arc::new(Shared {
            encoder: Mutex::new(encoder),
            sender: Mutex::new(sender),
            pending: Mutex::new(Vec::new()),
            rtp_timestamp: Mutex::new(0),
            gain: AtomicF64::new(1.0),
            spec,
        });

        let sink_state = shared.clone();
        source.start(Arc::new(move |pcm: &[i16]| sink_state.on_pcm(pcm)))?;

        info!(
            "Loopback capture started ({} Hz, {} ch).",
            spec.sample_rate, spec.channels
        );

        Ok(Self { source, shared })
    }

    pub(crate) fn set_gain(&self, gain: f64) {
        self.shared.gain.store(gain);
    }

    pub(crate) fn stop(&mut self) {
        self.source.stop();
    }
}

impl Drop for LoopbackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn on_pcm(&self, pcm: &[i16]) {
        let converted = resample_nearest(pcm, self.spec.channels, self.spec.sample_rate);

        let gain = self.gain.load();
        let mut pending = self.pending.lock().unwrap();
        if (gain - 1.0).abs() > f64::EPSILON {
            pending.extend(converted.iter().map(|&s| {
                (f64::from(s) * gain).clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
            }));
        } else {
            pending.extend_from_slice(&converted);
        }

        let frame_samples = LOOPBACK_FRAME_SIZE * CHANNEL_COUNT;
        while pending.len() >= frame_samples {
            let frame: Vec<i16> = pending.drain(..frame_samples).collect();
            drop(pending);

            self.encode_and_send(&frame);

            pending = self.pending.lock().unwrap();
        }
    }

    fn encode_and_send(&self, frame: &[i16]) {
        let mut opus = [0u8; OPUS_MAX_PACKET_SIZE];
        let len = {
            let mut encoder = self.encoder.lock().unwrap();
            match encoder.encode(frame, &mut opus) {
                Ok(len) => len,
                Err(e) => {
                    warn!("Loopback Opus encode failed: {e}");
                    return;
                },
            }
        };

        let mut timestamp = self.rtp_timestamp.lock().unwrap();
        if len > 0 {
            self.sender.lock().unwrap().send_opus(&opus[..len], *timestamp);
        }
        *timestamp += LOOPBACK_FRAME_SIZE as u32;
    }
}

/// Nearest-neighbor resample of interleaved `i16` PCM to 48 kHz stereo.
///
/// Mono input is duplicated to both channels; extra channels are ignored.
pub(crate) fn resample_nearest(input: &[i16], channels: u16, src_rate: u32) -> Vec<i16> {
    let channels = usize::from(channels.max(1));
    let in_frames = input.len() / channels;
    if in_frames == 0 {
        return Vec::new();
    }

    let out_frames = if src_rate == SAMPLE_RATE_RAW as u32 {
        in_frames
    } else {
        (in_frames as u64 * SAMPLE_RATE_RAW as u64 / u64::from(src_rate)) as usize
    };

    let mut out = Vec::with_capacity(out_frames * CHANNEL_COUNT);
    for i in 0..out_frames {
        let src_idx = if src_rate == SAMPLE_RATE_RAW as u32 {
            i
        } else {
            ((i as u64 * u64::from(src_rate) / SAMPLE_RATE_RAW as u64) as usize)
                .min(in_frames - 1)
        };

        for ch in 0..CHANNEL_COUNT {
            let src_ch = ch.min(channels - 1);
            out.push(input[src_idx * channels + src_ch]);
        }
    }

    out
}
