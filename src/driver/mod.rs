//! Runner for one voice or stream session.
//!
//! A [`Session`] owns the background tasks of a single connection: the
//! gateway WebSocket (with its heartbeat), the UDP transmit task (with its
//! keepalive), and the UDP receive loop. Control messages flow through a
//! core runner task; media flows through the sender/receiver modules.

pub(crate) mod connection;
pub(crate) mod crypto;
pub(crate) mod receive;
pub(crate) mod sender;
pub(crate) mod tasks;

use crate::{
    audio::AudioEngine,
    config::Config,
    events::{ConnectionState, SessionHooks},
    id::UserId,
    info::ConnectionInfo,
    video::{KeyframeRequest, MediaBackend},
};
use flume::Sender;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
        Mutex,
    },
};
use tasks::message::CoreMessage;
use tracing::instrument;

/// What a session is for; decides its handshake extras and pipelines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionKind {
    /// A voice-channel member: microphone out, mixed audio in.
    Voice,
    /// A screen-share sender: video + loopback audio out.
    StreamSender,
    /// A screen-share viewer: video in.
    StreamViewer,
}

/// State observable from any thread, shared between the session's tasks.
pub(crate) struct SessionShared {
    state: AtomicU8,
    pub(crate) hooks: SessionHooks,
    /// user → SSRC, learned from Speaking events.
    user_ssrc: Mutex<HashMap<UserId, u32>>,
    /// Volumes staged before the user's SSRC is known.
    user_volumes: Mutex<HashMap<UserId, f64>>,
}

impl SessionShared {
    fn new(hooks: SessionHooks) -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            hooks,
            user_ssrc: Mutex::new(HashMap::new()),
            user_volumes: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            self.hooks.dispatch_state(state);
        }
    }

    pub(crate) fn ssrc_of_user(&self, user: UserId) -> Option<u32> {
        self.user_ssrc.lock().unwrap().get(&user).copied()
    }

    /// Stages a volume; applies it immediately when the SSRC is known.
    pub(crate) fn set_user_volume(&self, user: UserId, volume: f64, engine: Option<&AudioEngine>) {
        self.user_volumes.lock().unwrap().insert(user, volume);
        if let (Some(ssrc), Some(engine)) = (self.ssrc_of_user(user), engine) {
            engine.set_ssrc_volume(ssrc, volume);
        }
    }

    /// Records a Speaking mapping; returns a staged volume to apply if this
    /// SSRC was previously unmapped.
    pub(crate) fn map_user_ssrc(&self, user: UserId, ssrc: u32) -> Option<f64> {
        let mut map = self.user_ssrc.lock().unwrap();
        let staged = if map.contains_key(&user) {
            None
        } else {
            self.user_volumes.lock().unwrap().get(&user).copied()
        };
        map.insert(user, ssrc);
        staged
    }

    /// Drops the mapping for a departed user, returning their SSRC.
    pub(crate) fn unmap_user(&self, user: UserId) -> Option<u32> {
        self.user_ssrc.lock().unwrap().remove(&user)
    }

    pub(crate) fn clear_mappings(&self) {
        self.user_ssrc.lock().unwrap().clear();
    }
}

/// Everything a connection attempt needs beyond the wire parameters.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub config: Config,
    pub kind: SessionKind,
    pub engine: Option<AudioEngine>,
    pub audio_backend: Option<Arc<dyn crate::audio::AudioBackend>>,
    pub media: Option<Arc<dyn MediaBackend>>,
    pub shared: Arc<SessionShared>,
}

/// Handle to one session's core runner.
///
/// Must be created inside a tokio runtime; the runner and the network tasks
/// are spawned onto it.
pub(crate) struct Session {
    core: Sender<CoreMessage>,
    shared: Arc<SessionShared>,
    keyframe: Arc<Mutex<Option<KeyframeRequest>>>,
}

impl Session {
    pub(crate) fn new(
        handle: &tokio::runtime::Handle,
        config: Config,
        kind: SessionKind,
        engine: Option<AudioEngine>,
        audio_backend: Option<Arc<dyn crate::audio::AudioBackend>>,
        media: Option<Arc<dyn MediaBackend>>,
        hooks: SessionHooks,
    ) -> Self {
        let shared = Arc::new(SessionShared::new(hooks));
        let keyframe = Arc::new(Mutex::new(None));

        let ctx = SessionContext {
            config,
            kind,
            engine,
            audio_backend,
            media,
            shared: shared.clone(),
        };

        let (tx, rx) = flume::unbounded();
        tasks::start(handle, ctx, keyframe.clone(), rx, tx.clone());

        Self {
            core: tx,
            shared,
            keyframe,
        }
    }

    /// Starts connecting with the given parameters. Progress is observable
    /// through the state hook.
    #[instrument(skip(self))]
    pub(crate) fn connect(&self, info: ConnectionInfo) {
        let (tx, _rx) = flume::bounded(1);
        drop(self.core.send(CoreMessage::ConnectWithResult(info, tx)));
    }

    /// Tears the current connection down without killing the runner.
    pub(crate) fn disconnect(&self) {
        drop(self.core.send(CoreMessage::Disconnect));
    }

    /// Forces the next outgoing video frame to be an IDR.
    pub(crate) fn request_keyframe(&self) {
        drop(self.core.send(CoreMessage::RequestKeyframe));
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        drop(self.core.send(CoreMessage::Poison));
    }
}
