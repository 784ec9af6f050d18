//! The capture → encode and decode → mix engine.
//!
//! The wire format is fixed: Opus, 48 kHz, stereo. Capture arrives as s16
//! stereo in 480-frame periods and leaves as one Opus packet per period;
//! the engine's RTP clock advances by 480 per period whether or not the
//! frame survives the voice gate, so remote jitter buffers stay time-aligned
//! when speech resumes. Each remote SSRC gets a decoder and a PCM FIFO,
//! drained and mixed on the playback callback.

use super::{
    backend::{AudioBackend, CaptureSource, Denoiser, DeviceError, DeviceInfo, PlaybackSink},
    AtomicF64,
    AudioError,
};
use crate::constants::*;
use audiopus::{
    coder::{Decoder, Encoder},
    Application,
    Bitrate,
    Channels,
    SampleRate,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
        Arc,
        Mutex,
        Weak,
    },
};
use tracing::{debug, info, warn};

/// Receives `(opus_packet, rtp_timestamp)` pairs on the capture thread.
pub(crate) type OpusSink = Box<dyn FnMut(&[u8], u32) + Send>;

/// Per-update decay applied to peak meters before taking the new maximum.
const METER_DECAY: f64 = 0.92;

/// FIFO cap per SSRC: one second of stereo audio. Overflow drops the oldest
/// samples rather than queueing unbounded latency.
const MAX_FIFO_SAMPLES: usize = SAMPLE_RATE_RAW * CHANNEL_COUNT;

struct SsrcSource {
    decoder: Decoder,
    fifo: VecDeque<i16>,
    volume: f64,
    muted: bool,
}

struct Inner {
    backend: Arc<dyn AudioBackend>,

    capture: Mutex<Option<Box<dyn CaptureSource>>>,
    playback: Mutex<Option<Box<dyn PlaybackSink>>>,
    capture_device: Mutex<Option<Vec<u8>>>,
    playback_device: Mutex<Option<Vec<u8>>>,

    encoder: Mutex<Encoder>,
    denoiser: Mutex<Option<Box<dyn Denoiser>>>,
    opus_sink: Mutex<Option<OpusSink>>,
    pending: Mutex<Vec<i16>>,

    sources: Mutex<HashMap<u32, SsrcSource>>,
    meters: Mutex<HashMap<u32, f64>>,

    capture_gain: AtomicF64,
    capture_gate: AtomicF64,
    playback_gain: AtomicF64,
    mix_mono: AtomicBool,
    noise_suppress: AtomicBool,
    capture_enabled: AtomicBool,
    playback_enabled: AtomicBool,
    playback_running: AtomicBool,
    bitrate: AtomicI32,
    capture_peak: AtomicU32,
    rtp_timestamp: AtomicU32,
}

/// Shared handle to one audio engine. Cheap to clone; all methods are
/// callable from any thread.
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<Inner>,
}

impl AudioEngine {
    /// Builds an engine over the given backend. Devices are not opened
    /// until capture/playback start.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Result<Self, AudioError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Voip)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(DEFAULT_VOICE_BITRATE))?;

        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                capture: Mutex::new(None),
                playback: Mutex::new(None),
                capture_device: Mutex::new(None),
                playback_device: Mutex::new(None),
                encoder: Mutex::new(encoder),
                denoiser: Mutex::new(None),
                opus_sink: Mutex::new(None),
                pending: Mutex::new(Vec::new()),
                sources: Mutex::new(HashMap::new()),
                meters: Mutex::new(HashMap::new()),
                capture_gain: AtomicF64::new(1.0),
                capture_gate: AtomicF64::new(0.0),
                playback_gain: AtomicF64::new(1.0),
                mix_mono: AtomicBool::new(false),
                noise_suppress: AtomicBool::new(false),
                capture_enabled: AtomicBool::new(true),
                playback_enabled: AtomicBool::new(true),
                playback_running: AtomicBool::new(false),
                bitrate: AtomicI32::new(DEFAULT_VOICE_BITRATE),
                capture_peak: AtomicU32::new(0),
                rtp_timestamp: AtomicU32::new(0),
            }),
        })
    }

    // --- device lifecycle ---

    /// Lists selectable capture devices.
    #[must_use]
    pub fn capture_devices(&self) -> Vec<DeviceInfo> {
        self.inner.backend.capture_devices()
    }

    /// Lists selectable playback devices.
    #[must_use]
    pub fn playback_devices(&self) -> Vec<DeviceInfo> {
        self.inner.backend.playback_devices()
    }

    /// Opens (if needed) and starts the capture stream.
    pub fn start_capture(&self) -> Result<(), DeviceError> {
        let mut slot = self.inner.capture.lock().unwrap();
        if slot.is_none() {
            let device = self.inner.capture_device.lock().unwrap().clone();
            *slot = Some(self.inner.backend.open_capture(device.as_deref())?);
        }

        let weak = Arc::downgrade(&self.inner);
        let sink: super::CaptureSink = Arc::new(move |pcm: &[i16]| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_captured_pcm(pcm);
            }
        });

        slot.as_mut()
            .expect("slot filled above")
            .start(sink)
            .map(|()| info!("Capture started."))
    }

    /// Stops the capture stream, if open.
    pub fn stop_capture(&self) {
        if let Some(capture) = self.inner.capture.lock().unwrap().as_mut() {
            capture.stop();
            info!("Capture stopped.");
        }
        self.inner.pending.lock().unwrap().clear();
    }

    /// Opens (if needed) and starts the playback stream.
    pub fn start_playback(&self) -> Result<(), DeviceError> {
        let mut slot = self.inner.playback.lock().unwrap();
        if slot.is_none() {
            let device = self.inner.playback_device.lock().unwrap().clone();
            *slot = Some(self.inner.backend.open_playback(device.as_deref())?);
        }

        let weak = Arc::downgrade(&self.inner);
        let source: super::PlaybackSource = Arc::new(move |out: &mut [f32]| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_playback_requested(out);
            }
        });

        slot.as_mut()
            .expect("slot filled above")
            .start(source)
            .map(|()| {
                self.inner.playback_running.store(true, Ordering::Release);
                info!("Playback started.");
            })
    }

    /// Stops the playback stream, if open.
    pub fn stop_playback(&self) {
        self.inner.playback_running.store(false, Ordering::Release);
        if let Some(playback) = self.inner.playback.lock().unwrap().as_mut() {
            playback.stop();
        }
    }

    /// Switches the capture stream onto another device.
    pub fn set_capture_device(&self, id: Option<&[u8]>) -> Result<(), DeviceError> {
        *self.inner.capture_device.lock().unwrap() = id.map(<[u8]>::to_vec);

        let was_open = {
            let mut slot = self.inner.capture.lock().unwrap();
            match slot.take() {
                Some(mut old) => {
                    old.stop();
                    true
                },
                None => false,
            }
        };

        if was_open {
            self.start_capture()?;
        }
        Ok(())
    }

    /// Switches the playback stream onto another device.
    pub fn set_playback_device(&self, id: Option<&[u8]>) -> Result<(), DeviceError> {
        *self.inner.playback_device.lock().unwrap() = id.map(<[u8]>::to_vec);

        let was_open = {
            let mut slot = self.inner.playback.lock().unwrap();
            match slot.take() {
                Some(mut old) => {
                    old.stop();
                    self.inner.playback_running.store(false, Ordering::Release);
                    true
                },
                None => false,
            }
        };

        if was_open {
            self.start_playback()?;
        }
        Ok(())
    }

    /// Installs the denoiser run when noise suppression is enabled.
    pub fn set_denoiser(&self, denoiser: Option<Box<dyn Denoiser>>) {
        *self.inner.denoiser.lock().unwrap() = denoiser;
    }

    // --- session wiring ---

    pub(crate) fn set_opus_sink(&self, sink: Option<OpusSink>) {
        *self.inner.opus_sink.lock().unwrap() = sink;
    }

    /// Decodes one received Opus packet and queues it for mixing.
    pub(crate) fn feed_opus(&self, ssrc: u32, data: &[u8]) {
        let inner = &self.inner;
        if !inner.playback_enabled.load(Ordering::Acquire)
            || !inner.playback_running.load(Ordering::Acquire)
        {
            return;
        }

        let mut pcm = vec![0i16; DECODE_BUFFER_SIZE];
        let decoded = {
            let mut sources = inner.sources.lock().unwrap();
            let Some(source) = Self::source_entry(&mut sources, ssrc) else {
                return;
            };
            if source.muted {
                return;
            }

            let samples = match source.decoder.decode(Some(data), &mut pcm, false) {
                Ok(n) => n,
                Err(e) => {
                    debug!("Opus decode failed for SSRC {ssrc}: {e}");
                    return;
                },
            };

            let total = samples * CHANNEL_COUNT;
            source.fifo.extend(&pcm[..total]);
            while source.fifo.len() > MAX_FIFO_SAMPLES {
                source.fifo.pop_front();
            }
            total
        };

        if decoded > 0 {
            inner.update_receive_meter(ssrc, &pcm[..decoded]);
        }
    }

    /// Ensures decoder state exists for `ssrc`.
    pub fn add_ssrc(&self, ssrc: u32) {
        let mut sources = self.inner.sources.lock().unwrap();
        Self::source_entry(&mut sources, ssrc);
    }

    /// Frees decoder state for one SSRC.
    pub fn remove_ssrc(&self, ssrc: u32) {
        self.inner.sources.lock().unwrap().remove(&ssrc);
        self.inner.meters.lock().unwrap().remove(&ssrc);
    }

    /// Frees all per-SSRC state. Part of session teardown.
    pub fn remove_all_ssrcs(&self) {
        self.inner.sources.lock().unwrap().clear();
        self.inner.meters.lock().unwrap().clear();
    }

    fn source_entry<'a>(
        sources: &'a mut HashMap<u32, SsrcSource>,
        ssrc: u32,
    ) -> Option<&'a mut SsrcSource> {
        use std::collections::hash_map::Entry;

        match sources.entry(ssrc) {
            Entry::Occupied(e) => Some(e.into_mut()),
            Entry::Vacant(v) => match Decoder::new(SampleRate::Hz48000, Channels::Stereo) {
                Ok(decoder) => Some(v.insert(SsrcSource {
                    decoder,
                    fifo: VecDeque::new(),
                    volume: 1.0,
                    muted: false,
                })),
                Err(e) => {
                    warn!("Failed to create Opus decoder for SSRC {ssrc}: {e}");
                    None
                },
            },
        }
    }

    // --- runtime-mutable settings ---

    /// Scalar gain applied to captured PCM before anything else.
    pub fn set_capture_gain(&self, gain: f64) {
        self.inner.capture_gain.store(gain);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn capture_gain(&self) -> f64 {
        self.inner.capture_gain.load()
    }

    /// Voice gate threshold, relative to full scale (0.0–1.0). Frames whose
    /// peak does not exceed it are dropped.
    pub fn set_capture_gate(&self, gate: f64) {
        self.inner.capture_gate.store(gate);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn capture_gate(&self) -> f64 {
        self.inner.capture_gate.load()
    }

    /// Master playback gain multiplied into every mixed source.
    pub fn set_playback_gain(&self, gain: f64) {
        self.inner.playback_gain.store(gain);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn playback_gain(&self) -> f64 {
        self.inner.playback_gain.load()
    }

    /// Averages L/R into both channels before encoding.
    pub fn set_mix_mono(&self, value: bool) {
        self.inner.mix_mono.store(value, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn mix_mono(&self) -> bool {
        self.inner.mix_mono.load(Ordering::Relaxed)
    }

    /// Runs the injected denoiser over each capture frame.
    pub fn set_noise_suppress(&self, value: bool) {
        self.inner.noise_suppress.store(value, Ordering::Relaxed);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn noise_suppress(&self) -> bool {
        self.inner.noise_suppress.load(Ordering::Relaxed)
    }

    /// Self-mute: capture frames are consumed (and the clock advanced) but
    /// never encoded while disabled.
    pub fn set_capture_enabled(&self, value: bool) {
        self.inner.capture_enabled.store(value, Ordering::Relaxed);
    }

    /// Self-deafen: received packets are discarded while disabled.
    pub fn set_playback_enabled(&self, value: bool) {
        self.inner.playback_enabled.store(value, Ordering::Relaxed);
    }

    /// Per-SSRC playback volume multiplier.
    pub fn set_ssrc_volume(&self, ssrc: u32, volume: f64) {
        let mut sources = self.inner.sources.lock().unwrap();
        if let Some(source) = Self::source_entry(&mut sources, ssrc) {
            source.volume = volume;
        }
    }

    /// Per-SSRC mute.
    pub fn set_ssrc_mute(&self, ssrc: u32, muted: bool) {
        let mut sources = self.inner.sources.lock().unwrap();
        if let Some(source) = Self::source_entry(&mut sources, ssrc) {
            source.muted = muted;
        }
    }

    /// Reconfigures the Opus encoder bitrate.
    pub fn set_bitrate(&self, bitrate: i32) {
        let mut encoder = self.inner.encoder.lock().unwrap();
        match encoder.set_bitrate(Bitrate::BitsPerSecond(bitrate)) {
            Ok(()) => self.inner.bitrate.store(bitrate, Ordering::Relaxed),
            Err(e) => warn!("Failed to set bitrate {bitrate}: {e}"),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn bitrate(&self) -> i32 {
        self.inner.bitrate.load(Ordering::Relaxed)
    }

    // --- meters and clocks ---

    /// Capture peak level, normalized to `[0, 1]`.
    #[must_use]
    pub fn capture_level(&self) -> f64 {
        f64::from(self.inner.capture_peak.load(Ordering::Relaxed)) / 32768.0
    }

    /// Receive peak level for one SSRC, normalized to `[0, 1]`.
    #[must_use]
    pub fn ssrc_level(&self, ssrc: u32) -> f64 {
        self.inner
            .meters
            .lock()
            .unwrap()
            .get(&ssrc)
            .copied()
            .unwrap_or(0.0)
    }

    /// Current value of the capture RTP clock.
    #[must_use]
    pub fn rtp_timestamp(&self) -> u32 {
        self.inner.rtp_timestamp.load(Ordering::Relaxed)
    }

    /// Resets per-session counters. Called between sessions so a fresh
    /// start observes a fresh clock.
    pub(crate) fn reset_clock(&self) {
        self.inner.rtp_timestamp.store(0, Ordering::Relaxed);
        self.inner.pending.lock().unwrap().clear();
    }
}

impl Inner {
    /// Entry point from the backend's capture thread.
    fn on_captured_pcm(&self, pcm: &[i16]) {
        let mut pending = self.pending.lock().unwrap();
        pending.extend_from_slice(pcm);

        while pending.len() >= STEREO_FRAME_SIZE {
            let mut frame: Vec<i16> = pending.drain(..STEREO_FRAME_SIZE).collect();
            // Don't hold the accumulator across the codec call.
            drop(pending);

            let timestamp = self.rtp_timestamp.load(Ordering::Relaxed);
            if self.capture_enabled.load(Ordering::Relaxed) {
                self.process_capture_frame(&mut frame, timestamp);
            }
            // Clock continuity: advance even for gated/muted frames.
            self.rtp_timestamp
                .fetch_add(MONO_FRAME_SIZE as u32, Ordering::Relaxed);

            pending = self.pending.lock().unwrap();
        }
    }

    fn process_capture_frame(&self, frame: &mut [i16], timestamp: u32) {
        let gain = self.capture_gain.load();
        if (gain - 1.0).abs() > f64::EPSILON {
            for sample in frame.iter_mut() {
                let scaled = (f64::from(*sample) * gain)
                    .clamp(f64::from(i16::MIN), f64::from(i16::MAX));
                *sample = scaled as i16;
            }
        }

        if self.mix_mono.load(Ordering::Relaxed) {
            for pair in frame.chunks_exact_mut(2) {
                let mixed = ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16;
                pair[0] = mixed;
                pair[1] = mixed;
            }
        }

        if self.noise_suppress.load(Ordering::Relaxed) {
            self.denoise(frame);
        }

        self.update_capture_meter(frame);

        if self.capture_level_raw() <= self.capture_gate.load() {
            return;
        }

        let mut opus = [0u8; OPUS_MAX_PACKET_SIZE];
        let len = {
            let mut encoder = self.encoder.lock().unwrap();
            match encoder.encode(frame, &mut opus) {
                Ok(len) => len,
                Err(e) => {
                    warn!("Opus encode failed: {e}");
                    return;
                },
            }
        };

        if len > 0 {
            if let Some(sink) = self.opus_sink.lock().unwrap().as_mut() {
                sink(&opus[..len], timestamp);
            }
        }
    }

    /// Mono float denoise pass over one 480-frame period, written back to
    /// both channels. Runs only when a denoiser is installed and the frame
    /// has the expected size.
    fn denoise(&self, frame: &mut [i16]) {
        let mut guard = self.denoiser.lock().unwrap();
        let Some(denoiser) = guard.as_mut() else {
            return;
        };
        if frame.len() != STEREO_FRAME_SIZE {
            return;
        }

        let mut mono = [0.0f32; MONO_FRAME_SIZE];
        for (i, sample) in mono.iter_mut().enumerate() {
            *sample = (f32::from(frame[i * 2]) + f32::from(frame[i * 2 + 1])) / 2.0;
        }

        denoiser.process(&mut mono);

        for (i, sample) in mono.iter().enumerate() {
            let value = sample.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            frame[i * 2] = value;
            frame[i * 2 + 1] = value;
        }
    }

    /// Entry point from the backend's playback thread. `out` arrives
    /// zero-initialized; sources sum into it.
    fn on_playback_requested(&self, out: &mut [f32]) {
        if !self.playback_enabled.load(Ordering::Relaxed) {
            return;
        }

        let playback_gain = self.playback_gain.load();
        let mut sources = self.sources.lock().unwrap();

        for source in sources.values_mut() {
            if source.muted {
                continue;
            }

            let volume = playback_gain * source.volume;
            let n = source.fifo.len().min(out.len());
            for slot in out.iter_mut().take(n) {
                let sample = source.fifo.pop_front().expect("len checked above");
                *slot += (volume * f64::from(sample) / 32768.0) as f32;
            }
        }
    }

    fn capture_level_raw(&self) -> f64 {
        f64::from(self.capture_peak.load(Ordering::Relaxed)) / 32768.0
    }

    fn update_capture_meter(&self, frame: &[i16]) {
        let mut peak = 0u32;
        for sample in frame.iter().step_by(2) {
            peak = peak.max(u32::from(sample.unsigned_abs()));
        }

        let decayed = (f64::from(self.capture_peak.load(Ordering::Relaxed)) * METER_DECAY) as u32;
        self.capture_peak.store(peak.max(decayed), Ordering::Relaxed);
    }

    fn update_receive_meter(&self, ssrc: u32, pcm: &[i16]) {
        let mut peak = 0.0f64;
        for sample in pcm.iter().step_by(2) {
            peak = peak.max(f64::from(sample.unsigned_abs()) / 32768.0);
        }

        let mut meters = self.meters.lock().unwrap();
        let meter = meters.entry(ssrc).or_insert(0.0);
        *meter = (*meter * METER_DECAY).max(peak);
    }
}

#[cfg(test)]
mod test {
    use super::{super::backend::*, *};

    /// Backend that hands the engine's callbacks back to the test.
    #[derive(Clone, Default)]
    struct TestBackend {
        capture_sink: Arc<Mutex<Option<super::super::CaptureSink>>>,
        playback_source: Arc<Mutex<Option<super::super::PlaybackSource>>>,
    }

    struct TestCapture(Arc<Mutex<Option<super::super::CaptureSink>>>);

    impl CaptureSource for TestCapture {
        fn spec(&self) -> StreamSpec {
            StreamSpec {
                sample_rate: 48_000,
                channels: 2,
            }
        }

        fn start(&mut self, sink: super::super::CaptureSink) -> Result<(), DeviceError> {
            *self.0.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            *self.0.lock().unwrap() = None;
        }
    }

    struct TestPlayback(Arc<Mutex<Option<super::super::PlaybackSource>>>);

    impl PlaybackSink for TestPlayback {
        fn start(&mut self, source: super::super::PlaybackSource) -> Result<(), DeviceError> {
            *self.0.lock().unwrap() = Some(source);
            Ok(())
        }

        fn stop(&mut self) {
            *self.0.lock().unwrap() = None;
        }
    }

    impl AudioBackend for TestBackend {
        fn capture_devices(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                name: "test-mic".into(),
                id: vec![1],
            }]
        }

        fn playback_devices(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                name: "test-speakers".into(),
                id: vec![2],
            }]
        }

        fn open_capture(
            &self,
            _device: Option<&[u8]>,
        ) -> Result<Box<dyn CaptureSource>, DeviceError> {
            Ok(Box::new(TestCapture(self.capture_sink.clone())))
        }

        fn open_playback(
            &self,
            _device: Option<&[u8]>,
        ) -> Result<Box<dyn PlaybackSink>, DeviceError> {
            Ok(Box::new(TestPlayback(self.playback_source.clone())))
        }

        fn open_loopback(&self) -> Result<Box<dyn CaptureSource>, DeviceError> {
            Err(DeviceError::Unsupported)
        }
    }

    fn engine() -> (AudioEngine, TestBackend) {
        let backend = TestBackend::default();
        let engine = AudioEngine::new(Arc::new(backend.clone())).unwrap();
        (engine, backend)
    }

    fn loud_period() -> Vec<i16> {
        (0..STEREO_FRAME_SIZE)
            .map(|i| if i % 2 == 0 { 12_000 } else { -12_000 })
            .collect()
    }

    fn captured_packets(engine: &AudioEngine) -> Arc<Mutex<Vec<(usize, u32)>>> {
        let packets = Arc::new(Mutex::new(Vec::new()));
        let record = packets.clone();
        engine.set_opus_sink(Some(Box::new(move |opus, ts| {
            record.lock().unwrap().push((opus.len(), ts));
        })));
        packets
    }

    #[test]
    fn capture_period_becomes_one_packet() {
        let (engine, backend) = engine();
        let packets = captured_packets(&engine);
        engine.start_capture().unwrap();

        let sink = backend.capture_sink.lock().unwrap().clone().unwrap();
        sink(&loud_period());

        let packets = packets.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1, 0);
        assert_eq!(engine.rtp_timestamp(), 480);
    }

    #[test]
    fn short_capture_periods_accumulate() {
        let (engine, backend) = engine();
        let packets = captured_packets(&engine);
        engine.start_capture().unwrap();

        let sink = backend.capture_sink.lock().unwrap().clone().unwrap();
        let period = loud_period();
        sink(&period[..STEREO_FRAME_SIZE / 2]);
        assert!(packets.lock().unwrap().is_empty());
        assert_eq!(engine.rtp_timestamp(), 0);

        sink(&period[STEREO_FRAME_SIZE / 2..]);
        assert_eq!(packets.lock().unwrap().len(), 1);
        assert_eq!(engine.rtp_timestamp(), 480);
    }

    #[test]
    fn gated_frames_are_dropped_but_clock_advances() {
        let (engine, backend) = engine();
        let packets = captured_packets(&engine);
        engine.set_capture_gate(1.0);
        engine.start_capture().unwrap();

        let sink = backend.capture_sink.lock().unwrap().clone().unwrap();
        sink(&loud_period());

        assert!(packets.lock().unwrap().is_empty());
        assert_eq!(engine.rtp_timestamp(), 480);
    }

    #[test]
    fn self_mute_suppresses_packets_but_not_the_clock() {
        let (engine, backend) = engine();
        let packets = captured_packets(&engine);
        engine.set_capture_enabled(false);
        engine.start_capture().unwrap();

        let sink = backend.capture_sink.lock().unwrap().clone().unwrap();
        sink(&loud_period());

        assert!(packets.lock().unwrap().is_empty());
        assert_eq!(engine.rtp_timestamp(), 480);
    }

    #[test]
    fn capture_meter_rises_on_loud_input() {
        let (engine, backend) = engine();
        captured_packets(&engine);
        engine.start_capture().unwrap();

        let sink = backend.capture_sink.lock().unwrap().clone().unwrap();
        sink(&loud_period());

        assert!(engine.capture_level() > 0.3);
    }

    fn encode_tone() -> Vec<u8> {
        let mut encoder =
            Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio).unwrap();
        let pcm: Vec<i16> = (0..STEREO_FRAME_SIZE)
            .map(|i| {
                let t = (i / 2) as f32 / 48_000.0;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 16_000.0) as i16
            })
            .collect();
        let mut out = vec![0u8; OPUS_MAX_PACKET_SIZE];
        let len = encoder.encode(&pcm, &mut out).unwrap();
        out.truncate(len);
        out
    }

    #[test]
    fn received_opus_mixes_into_playback() {
        let (engine, backend) = engine();
        engine.start_playback().unwrap();

        engine.add_ssrc(0xAAAA);
        engine.feed_opus(0xAAAA, &encode_tone());

        let source = backend.playback_source.lock().unwrap().clone().unwrap();
        let mut out = vec![0.0f32; STEREO_FRAME_SIZE];
        source(&mut out);

        assert!(out.iter().any(|s| s.abs() > 0.0));
        assert!(engine.ssrc_level(0xAAAA) > 0.0);
    }

    #[test]
    fn muted_ssrc_contributes_silence() {
        let (engine, backend) = engine();
        engine.start_playback().unwrap();

        engine.add_ssrc(0xAAAA);
        engine.set_ssrc_mute(0xAAAA, true);
        engine.feed_opus(0xAAAA, &encode_tone());

        let source = backend.playback_source.lock().unwrap().clone().unwrap();
        let mut out = vec![0.0f32; STEREO_FRAME_SIZE];
        source(&mut out);

        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn feed_without_playback_running_is_dropped() {
        let (engine, _backend) = engine();
        engine.add_ssrc(0xAAAA);
        engine.feed_opus(0xAAAA, &encode_tone());
        assert_eq!(engine.ssrc_level(0xAAAA), 0.0);
    }

    #[test]
    fn remove_all_ssrcs_clears_state() {
        let (engine, _backend) = engine();
        engine.add_ssrc(1);
        engine.add_ssrc(2);
        engine.remove_all_ssrcs();
        assert_eq!(engine.ssrc_level(1), 0.0);
        assert!(engine.inner.sources.lock().unwrap().is_empty());
    }
}
