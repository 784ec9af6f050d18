//! The session orchestrator.
//!
//! A [`Waxwing`] owns at most one voice session and one stream
//! (screen-share) session. Both follow a two-phase connect: the primary
//! chat gateway delivers transport info and session identity as separate
//! dispatches, in either order, and a connection attempt starts only once
//! both are in hand. A dispatch arriving while a session is live tears the
//! live session down first.

use crate::{
    audio::{AudioBackend, AudioEngine, AudioError},
    config::Config,
    driver::{Session, SessionKind},
    events::{ConnectionState, SessionHooks},
    id::{ChannelId, GuildId, UserId},
    info::{ConnectionInfo, ConnectionProgress, StreamKey, StreamProgress},
    video::MediaBackend,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct VoiceSlot {
    progress: Option<ConnectionProgress>,
    session: Option<Session>,
}

#[derive(Default)]
struct StreamSlot {
    role: Option<SessionKind>,
    progress: StreamProgress,
    session: Option<Session>,
}

struct Inner {
    runtime: Handle,
    config: Config,
    hooks: SessionHooks,
    user_id: UserId,
    engine: AudioEngine,
    audio_backend: Arc<dyn AudioBackend>,
    media: Option<Arc<dyn MediaBackend>>,
    voice: Mutex<VoiceSlot>,
    stream: Mutex<StreamSlot>,
    user_volumes: Mutex<HashMap<UserId, f64>>,
}

/// The public face of the crate: consumes primary-gateway dispatches,
/// produces live sessions.
///
/// Must be constructed inside a tokio runtime; session tasks are spawned
/// onto the runtime that was current at construction.
#[derive(Clone)]
pub struct Waxwing {
    inner: Arc<Inner>,
}

impl Waxwing {
    /// Builds the orchestrator for one logged-in user.
    ///
    /// `media` may be `None` on hosts without video codecs; stream sessions
    /// then negotiate but move no video.
    pub fn new(
        user_id: UserId,
        config: Config,
        audio_backend: Arc<dyn AudioBackend>,
        media: Option<Arc<dyn MediaBackend>>,
        hooks: SessionHooks,
    ) -> Result<Self, AudioError> {
        let engine = AudioEngine::new(audio_backend.clone())?;

        Ok(Self {
            inner: Arc::new(Inner {
                runtime: Handle::current(),
                config,
                hooks,
                user_id,
                engine,
                audio_backend,
                media,
                voice: Mutex::new(VoiceSlot::default()),
                stream: Mutex::new(StreamSlot::default()),
                user_volumes: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The audio engine, for device selection and runtime audio settings.
    #[must_use]
    pub fn engine(&self) -> &AudioEngine {
        &self.inner.engine
    }

    // --- primary-gateway dispatches: voice ---

    /// `VoiceStateUpdate` for our own user. `channel_id` of 0 means we were
    /// disconnected from voice.
    pub fn on_voice_state_update(
        &self,
        session_id: &str,
        user_id: UserId,
        channel_id: ChannelId,
    ) {
        if user_id != self.inner.user_id {
            return;
        }

        let mut slot = self.inner.voice.lock().unwrap();

        if channel_id.get() == 0 {
            info!("Voice state update: disconnected from voice.");
            slot.progress = None;
            if let Some(session) = &slot.session {
                session.disconnect();
            }
            return;
        }

        let progress = slot
            .progress
            .get_or_insert_with(|| ConnectionProgress::new(user_id));

        if progress.apply_state_update(session_id.to_owned(), channel_id) {
            self.connect_voice(&mut slot);
        }
    }

    /// `VoiceServerUpdate`: the assigned endpoint and token.
    pub fn on_voice_server_update(&self, endpoint: &str, token: &str, guild_id: GuildId) {
        let mut slot = self.inner.voice.lock().unwrap();

        let user_id = self.inner.user_id;
        let progress = slot
            .progress
            .get_or_insert_with(|| ConnectionProgress::new(user_id));

        if progress.apply_server_update(endpoint.to_owned(), token.to_owned(), guild_id) {
            self.connect_voice(&mut slot);
        }
    }

    fn connect_voice(&self, slot: &mut VoiceSlot) {
        let Some(info) = slot.progress.as_ref().and_then(ConnectionProgress::info) else {
            return;
        };

        debug!("Voice connection info complete: {info:?}");

        let inner = &self.inner;
        let session = slot.session.get_or_insert_with(|| {
            Session::new(
                &inner.runtime,
                inner.config.clone(),
                SessionKind::Voice,
                Some(inner.engine.clone()),
                Some(inner.audio_backend.clone()),
                inner.media.clone(),
                inner.hooks.clone(),
            )
        });

        // Volumes staged before the session existed still apply.
        for (user, volume) in inner.user_volumes.lock().unwrap().iter() {
            session
                .shared()
                .set_user_volume(*user, *volume, Some(&inner.engine));
        }

        session.connect(info);
    }

    // --- primary-gateway dispatches: stream ---

    /// `StreamCreate`: we are the stream's sender.
    pub fn on_stream_create(&self, stream_key: &str) {
        let Some(key) = StreamKey::parse(stream_key) else {
            warn!("Ignoring malformed stream key: {stream_key}");
            return;
        };

        let mut slot = self.inner.stream.lock().unwrap();
        slot.role = Some(SessionKind::StreamSender);

        if let Some(info) = slot.progress.apply_create(key, self.inner.user_id) {
            self.connect_stream(&mut slot, info);
        }
    }

    /// Primes a viewer session for someone else's stream. The follow-up
    /// [`Self::on_stream_server_update`] completes the connect.
    pub fn watch_stream(&self, stream_key: &str) {
        let Some(key) = StreamKey::parse(stream_key) else {
            warn!("Ignoring malformed stream key: {stream_key}");
            return;
        };

        let mut slot = self.inner.stream.lock().unwrap();
        slot.role = Some(SessionKind::StreamViewer);

        if let Some(info) = slot.progress.apply_create(key, self.inner.user_id) {
            self.connect_stream(&mut slot, info);
        }
    }

    /// `StreamServerUpdate`: transport info for a pending stream session.
    pub fn on_stream_server_update(&self, stream_key: &str, endpoint: &str, token: &str) {
        let mut slot = self.inner.stream.lock().unwrap();

        if slot.role.is_none() {
            slot.role = Some(SessionKind::StreamSender);
        }

        if let Some(info) = slot.progress.apply_server_update(
            stream_key,
            endpoint.to_owned(),
            token.to_owned(),
            self.inner.user_id,
        ) {
            self.connect_stream(&mut slot, info);
        } else if !slot.progress.matches(stream_key) {
            debug!("Stream server update for foreign key {stream_key}; ignored.");
        }
    }

    /// `StreamDelete`: the stream ended (ours or the watched one).
    pub fn on_stream_delete(&self, stream_key: &str) {
        let mut slot = self.inner.stream.lock().unwrap();

        if !slot.progress.matches(stream_key) {
            return;
        }

        info!("Stream {stream_key} deleted.");
        if let Some(session) = &slot.session {
            session.disconnect();
        }
        *slot = StreamSlot::default();
    }

    fn connect_stream(&self, slot: &mut StreamSlot, info: ConnectionInfo) {
        let kind = slot.role.unwrap_or(SessionKind::StreamSender);
        debug!("Stream connection info complete ({kind:?}): {info:?}");

        let inner = &self.inner;

        // Stream sessions are rebuilt per connect: their kind can change
        // between shares.
        if let Some(old) = slot.session.take() {
            old.disconnect();
            drop(old);
        }

        let session = Session::new(
            &inner.runtime,
            inner.config.clone(),
            kind,
            None,
            Some(inner.audio_backend.clone()),
            inner.media.clone(),
            inner.hooks.clone(),
        );
        session.connect(info);
        slot.session = Some(session);
    }

    // --- user-facing controls ---

    /// Current state of the voice session.
    #[must_use]
    pub fn voice_state(&self) -> ConnectionState {
        self.inner
            .voice
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map_or(ConnectionState::Disconnected, Session::state)
    }

    /// Current state of the stream session.
    #[must_use]
    pub fn stream_state(&self) -> ConnectionState {
        self.inner
            .stream
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map_or(ConnectionState::Disconnected, Session::state)
    }

    /// Per-user playback volume. Staged until the user's SSRC is learned
    /// through a Speaking event.
    pub fn set_user_volume(&self, user: UserId, volume: f64) {
        self.inner.user_volumes.lock().unwrap().insert(user, volume);

        let slot = self.inner.voice.lock().unwrap();
        if let Some(session) = &slot.session {
            session
                .shared()
                .set_user_volume(user, volume, Some(&self.inner.engine));
        }
    }

    /// The stored per-user volume (1.0 when unset).
    #[must_use]
    pub fn user_volume(&self, user: UserId) -> f64 {
        self.inner
            .user_volumes
            .lock()
            .unwrap()
            .get(&user)
            .copied()
            .unwrap_or(1.0)
    }

    /// The SSRC a user transmits under, once a Speaking event mapped it.
    #[must_use]
    pub fn ssrc_of_user(&self, user: UserId) -> Option<u32> {
        self.inner
            .voice
            .lock()
            .unwrap()
            .session
            .as_ref()
            .and_then(|s| s.shared().ssrc_of_user(user))
    }

    /// Self-mute: stop transmitting without leaving the channel.
    pub fn set_self_mute(&self, mute: bool) {
        self.inner.engine.set_capture_enabled(!mute);
    }

    /// Self-deafen: stop playing received audio.
    pub fn set_self_deaf(&self, deaf: bool) {
        self.inner.engine.set_playback_enabled(!deaf);
    }

    /// Asks the stream encoder for an IDR on the next frame.
    pub fn request_keyframe(&self) {
        if let Some(session) = &self.inner.stream.lock().unwrap().session {
            session.request_keyframe();
        }
    }

    /// Tears down every session. The orchestrator stays usable; the next
    /// dispatch pair starts fresh sessions with reset counters.
    pub fn stop(&self) {
        {
            let mut slot = self.inner.voice.lock().unwrap();
            slot.progress = None;
            slot.session = None;
        }
        {
            let mut slot = self.inner.stream.lock().unwrap();
            *slot = StreamSlot::default();
        }
    }
}

impl std::fmt::Debug for Waxwing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waxwing")
            .field("user_id", &self.inner.user_id)
            .field("voice_state", &self.voice_state())
            .field("stream_state", &self.stream_state())
            .finish()
    }
}
