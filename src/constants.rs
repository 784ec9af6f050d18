//! Constants governing the media clocks, wire formats, and task cadence.

use discortp::rtp::RtpType;
use std::time::Duration;

/// The voice gateway version spoken by this crate.
pub const VOICE_GATEWAY_VERSION: u8 = 7;

/// Sample rate of all audio on the wire.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of channels of all audio on the wire.
pub const CHANNEL_COUNT: usize = 2;

/// Samples per channel delivered by one capture period (10 ms at 48 kHz).
///
/// The OS capture device is opened with this period size, and the RTP
/// timestamp advances by this amount per period whether or not the frame
/// passes the voice gate.
pub const MONO_FRAME_SIZE: usize = 480;

/// Interleaved sample count of one capture period.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Samples per channel in one loopback (soundshare) Opus frame (20 ms).
pub const LOOPBACK_FRAME_SIZE: usize = 960;

/// Largest possible Opus packet produced by the encoder.
pub const OPUS_MAX_PACKET_SIZE: usize = 1275;

/// Largest PCM buffer a single Opus packet may decode into: 120 ms of
/// stereo audio at 48 kHz.
pub const DECODE_BUFFER_SIZE: usize = 120 * 48 * CHANNEL_COUNT;

/// Default Opus bitrate for microphone audio.
pub const DEFAULT_VOICE_BITRATE: i32 = 64_000;

/// Default Opus bitrate for loopback (music/system) audio.
pub const DEFAULT_LOOPBACK_BITRATE: i32 = 128_000;

/// Opus silent frame, sent once after key install to traverse NAT.
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Dynamic payload type carrying Opus audio.
pub const RTP_AUDIO_TYPE: RtpType = RtpType::Dynamic(120);

/// Dynamic payload type carrying H.264 video.
pub const RTP_VIDEO_TYPE: RtpType = RtpType::Dynamic(101);

/// Numeric payload type values, as placed in gateway codec descriptions.
pub const VIDEO_PAYLOAD_TYPE: u8 = 101;

/// Payload type advertised (never transmitted) for H.264 RTX.
pub const VIDEO_RTX_PAYLOAD_TYPE: u8 = 102;

/// MTU-safe RTP payload budget for video packets.
///
/// NALs larger than this are FU-A fragmented; path-MTU discovery is not
/// attempted.
pub const MAX_RTP_PAYLOAD: usize = 1200;

/// The 90 kHz RTP clock rate used for video timestamps.
pub const VIDEO_CLOCK_RATE: u64 = 90_000;

/// Largest UDP datagram accepted from the voice server.
pub const VOICE_PACKET_MAX: usize = 4096;

/// Fixed datagram contents of the UDP keepalive.
pub const UDP_KEEPALIVE: [u8; 2] = [0x13, 0x37];

/// Delay between sends of UDP keepalive frames.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_secs(10);

/// Poll budget of the UDP receive loop, bounding shutdown latency.
pub const UDP_RECV_POLL: Duration = Duration::from_secs(1);

/// Number of datagrams inspected before IP discovery is abandoned.
pub const IP_DISCOVERY_TRIES: usize = 100;

/// The AEAD mode this crate negotiates.
pub const CRYPTO_MODE: &str = "aead_xchacha20_poly1305_rtpsize";

/// WebSocket close code used for client-initiated disconnects.
pub const CLOSE_CODE_DISCONNECT: u16 = 4014;

/// Default frames per second requested from video capture sources.
pub const DEFAULT_VIDEO_FPS: u32 = 30;
