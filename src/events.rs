//! Callbacks from the core to its host.

use crate::{id::UserId, model::payload::SpeakingState};
use std::{fmt, sync::Arc};

/// Lifecycle of one voice/stream session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No transport exists. Terminal until the next start.
    #[default]
    Disconnected = 0,
    /// WebSocket open in progress.
    Connecting = 1,
    /// WebSocket open; waiting for the session key.
    Establishing = 2,
    /// Key installed and the UDP reader running.
    Connected = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Establishing,
            3 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// A remote participant's transmission state changed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpeakingEvent {
    /// The participant, when the gateway included it.
    pub user_id: Option<UserId>,
    /// The RTP source their audio arrives under.
    pub ssrc: u32,
    #[allow(missing_docs)]
    pub flags: SpeakingState,
}

/// One decoded viewer-side video frame: top-down BGRA.
#[derive(Clone, Eq, PartialEq)]
pub struct VideoFrame {
    /// `width * height * 4` bytes of BGRA pixels.
    pub data: Vec<u8>,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

type StateFn = dyn Fn(ConnectionState) + Send + Sync;
type SpeakingFn = dyn Fn(SpeakingEvent) + Send + Sync;
type FrameFn = dyn Fn(VideoFrame) + Send + Sync;

/// Host callbacks fired by a session.
///
/// All callbacks run on core threads; hosts must not block in them.
#[derive(Clone, Default)]
pub struct SessionHooks {
    state_change: Option<Arc<StateFn>>,
    speaking: Option<Arc<SpeakingFn>>,
    video_frame: Option<Arc<FrameFn>>,
}

impl SessionHooks {
    /// Registers the state-transition callback.
    #[must_use]
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.state_change = Some(Arc::new(f));
        self
    }

    /// Registers the speaking-map callback.
    #[must_use]
    pub fn on_speaking<F>(mut self, f: F) -> Self
    where
        F: Fn(SpeakingEvent) + Send + Sync + 'static,
    {
        self.speaking = Some(Arc::new(f));
        self
    }

    /// Registers the decoded-frame callback for viewed streams.
    #[must_use]
    pub fn on_video_frame<F>(mut self, f: F) -> Self
    where
        F: Fn(VideoFrame) + Send + Sync + 'static,
    {
        self.video_frame = Some(Arc::new(f));
        self
    }

    pub(crate) fn dispatch_state(&self, state: ConnectionState) {
        if let Some(f) = &self.state_change {
            f(state);
        }
    }

    pub(crate) fn dispatch_speaking(&self, evt: SpeakingEvent) {
        if let Some(f) = &self.speaking {
            f(evt);
        }
    }

    pub(crate) fn dispatch_video_frame(&self, frame: VideoFrame) {
        if let Some(f) = &self.video_frame {
            f(frame);
        }
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("state_change", &self.state_change.is_some())
            .field("speaking", &self.speaking.is_some())
            .field("video_frame", &self.video_frame.is_some())
            .finish()
    }
}
