//! Configuration for sessions and their media pipelines.

use crate::{
    constants::*,
    ws::{TlsConnector, WsConnector},
};
use std::{fmt, sync::Arc, time::Duration};

/// Configuration shared by every session a manager creates.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Factory for the gateway's text-frame transport.
    ///
    /// Defaults to a TLS WebSocket; tests inject scripted transports here.
    pub ws_connector: Arc<dyn WsConnector>,
    /// Opus bitrate for microphone audio.
    pub voice_bitrate: i32,
    /// Opus bitrate for loopback (soundshare) audio.
    pub loopback_bitrate: i32,
    /// Encoder settings for outgoing video.
    pub video: VideoConfig,
    /// Which surface outgoing video is captured from.
    pub video_source: VideoSourceConfig,
    /// Maximum time a connection attempt may take before it is abandoned.
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_connector: Arc::new(TlsConnector),
            voice_bitrate: DEFAULT_VOICE_BITRATE,
            loopback_bitrate: DEFAULT_LOOPBACK_BITRATE,
            video: VideoConfig::default(),
            video_source: VideoSourceConfig::default(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("voice_bitrate", &self.voice_bitrate)
            .field("loopback_bitrate", &self.loopback_bitrate)
            .field("video", &self.video)
            .field("video_source", &self.video_source)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Sets this `Config`'s WebSocket transport factory.
    #[must_use]
    pub fn ws_connector(mut self, ws_connector: Arc<dyn WsConnector>) -> Self {
        self.ws_connector = ws_connector;
        self
    }

    /// Sets this `Config`'s microphone Opus bitrate.
    #[must_use]
    pub fn voice_bitrate(mut self, voice_bitrate: i32) -> Self {
        self.voice_bitrate = voice_bitrate;
        self
    }

    /// Sets this `Config`'s loopback Opus bitrate.
    #[must_use]
    pub fn loopback_bitrate(mut self, loopback_bitrate: i32) -> Self {
        self.loopback_bitrate = loopback_bitrate;
        self
    }

    /// Sets this `Config`'s video encoder parameters.
    #[must_use]
    pub fn video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }

    /// Sets this `Config`'s video capture source.
    #[must_use]
    pub fn video_source(mut self, video_source: VideoSourceConfig) -> Self {
        self.video_source = video_source;
        self
    }

    /// Sets this `Config`'s connection attempt timeout.
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Parameters handed to the H.264 encoder when a stream starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoConfig {
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
    /// Target frames per second for capture and encode.
    pub fps: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Distance between forced keyframes, in frames.
    pub keyframe_interval: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: DEFAULT_VIDEO_FPS,
            bitrate: 2_500_000,
            keyframe_interval: 60,
        }
    }
}

/// Selection of the capture surface for outgoing video.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VideoSourceConfig {
    /// A whole display, addressed by adapter and output index.
    Display {
        #[allow(missing_docs)]
        adapter: u32,
        #[allow(missing_docs)]
        output: u32,
    },
    /// A single window, addressed by a host-provided native handle.
    Window {
        #[allow(missing_docs)]
        handle: u64,
    },
}

impl Default for VideoSourceConfig {
    fn default() -> Self {
        Self::Display {
            adapter: 0,
            output: 0,
        }
    }
}
