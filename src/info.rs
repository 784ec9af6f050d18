use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Accumulates the two primary-gateway dispatches needed to open a voice
/// session, in either arrival order: `VoiceStateUpdate` carries the session
/// id and channel, `VoiceServerUpdate` the endpoint, token, and guild.
#[derive(Clone, Debug)]
pub(crate) enum ConnectionProgress {
    Complete(ConnectionInfo),
    Incomplete(Partial),
}

impl ConnectionProgress {
    pub(crate) fn new(user_id: UserId) -> Self {
        ConnectionProgress::Incomplete(Partial {
            user_id,
            guild_id: None,
            channel_id: None,
            session_id: None,
            endpoint: None,
            token: None,
        })
    }

    pub(crate) fn info(&self) -> Option<ConnectionInfo> {
        if let Self::Complete(c) = self {
            Some(c.clone())
        } else {
            None
        }
    }

    /// Folds in a `VoiceStateUpdate`; returns whether a (re)connect is due.
    pub(crate) fn apply_state_update(&mut self, session_id: String, channel_id: ChannelId) -> bool {
        match self {
            Self::Complete(c) => {
                if c.channel_id != Some(channel_id) {
                    // Moved to another channel: the old endpoint/token are
                    // void, and a fresh server update is on its way.
                    *self = ConnectionProgress::Incomplete(Partial {
                        user_id: c.user_id,
                        guild_id: Some(c.guild_id),
                        channel_id: Some(channel_id),
                        session_id: Some(session_id),
                        endpoint: None,
                        token: None,
                    });
                    return false;
                }

                let should_reconn = c.session_id != session_id;
                c.session_id = session_id;
                should_reconn
            },
            Self::Incomplete(i) => i
                .apply_state_update(session_id, channel_id)
                .map(|info| {
                    *self = Self::Complete(info);
                })
                .is_some(),
        }
    }

    /// Folds in a `VoiceServerUpdate`; returns whether a (re)connect is due.
    pub(crate) fn apply_server_update(
        &mut self,
        endpoint: String,
        token: String,
        guild_id: GuildId,
    ) -> bool {
        match self {
            Self::Complete(c) => {
                let should_reconn =
                    c.endpoint != endpoint || c.token != token || c.guild_id != guild_id;

                c.endpoint = endpoint;
                c.token = token;
                c.guild_id = guild_id;

                should_reconn
            },
            Self::Incomplete(i) => i
                .apply_server_update(endpoint, token, guild_id)
                .map(|info| {
                    *self = Self::Complete(info);
                })
                .is_some(),
        }
    }
}

/// Parameters needed to start communicating with a voice server.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if known. Book-keeping only.
    pub channel_id: Option<ChannelId>,
    /// Hostname of the assigned voice gateway.
    pub endpoint: String,
    /// ID of the target channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string identifying this session. Stream sessions carry their
    /// stream key here.
    pub session_id: String,
    /// Ephemeral secret used to validate the session.
    pub token: String,
    /// ID of the connecting user.
    pub user_id: UserId,
    /// Whether this session negotiates as video-capable.
    pub video: bool,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .field("video", &self.video)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct Partial {
    pub user_id: UserId,
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub session_id: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("user_id", &self.user_id)
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("token_is_some", &self.token.is_some())
            .finish()
    }
}

impl Partial {
    fn finalise(&mut self) -> Option<ConnectionInfo> {
        if self.guild_id.is_some()
            && self.session_id.is_some()
            && self.endpoint.is_some()
            && self.token.is_some()
        {
            let endpoint = self.endpoint.take().unwrap();
            let session_id = self.session_id.take().unwrap();
            let token = self.token.take().unwrap();

            Some(ConnectionInfo {
                channel_id: self.channel_id,
                endpoint,
                session_id,
                token,
                guild_id: self.guild_id.unwrap(),
                user_id: self.user_id,
                video: false,
            })
        } else {
            None
        }
    }

    fn apply_state_update(
        &mut self,
        session_id: String,
        channel_id: ChannelId,
    ) -> Option<ConnectionInfo> {
        if self.channel_id.is_some() && self.channel_id != Some(channel_id) {
            self.endpoint = None;
            self.token = None;
        }

        self.channel_id = Some(channel_id);
        self.session_id = Some(session_id);

        self.finalise()
    }

    fn apply_server_update(
        &mut self,
        endpoint: String,
        token: String,
        guild_id: GuildId,
    ) -> Option<ConnectionInfo> {
        self.endpoint = Some(endpoint);
        self.token = Some(token);
        self.guild_id = Some(guild_id);

        self.finalise()
    }
}

/// A screen-share stream identity: `guild:<server>:<channel>:<user>`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StreamKey {
    raw: String,
    /// Guild parsed out of the key.
    pub guild_id: GuildId,
    /// Channel parsed out of the key.
    pub channel_id: ChannelId,
    /// Streaming user parsed out of the key.
    pub user_id: UserId,
}

impl StreamKey {
    /// Parses a Discord-assigned stream key.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        if parts.next()? != "guild" {
            return None;
        }

        let guild_id = GuildId(parts.next()?.parse().ok()?);
        let channel_id = ChannelId(parts.next()?.parse().ok()?);
        let user_id = UserId(parts.next()?.parse().ok()?);

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            raw: raw.to_owned(),
            guild_id,
            channel_id,
            user_id,
        })
    }

    /// The key exactly as the gateway issued it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Two-phase accumulator for stream (screen-share) sessions: the stream key
/// and the server info arrive as separate dispatches.
#[derive(Clone, Debug, Default)]
pub(crate) struct StreamProgress {
    pub key: Option<StreamKey>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

impl StreamProgress {
    pub(crate) fn apply_create(
        &mut self,
        key: StreamKey,
        user_id: UserId,
    ) -> Option<ConnectionInfo> {
        self.key = Some(key);
        self.finalise(user_id)
    }

    pub(crate) fn apply_server_update(
        &mut self,
        key: &str,
        endpoint: String,
        token: String,
        user_id: UserId,
    ) -> Option<ConnectionInfo> {
        match &self.key {
            // Server info can land first; adopt the key it names.
            None => {
                self.key = StreamKey::parse(key);
                self.key.as_ref()?;
            },
            Some(have) if have.as_str() != key => return None,
            Some(_) => {},
        }

        self.endpoint = Some(endpoint);
        self.token = Some(token);
        self.finalise(user_id)
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        self.key.as_ref().is_some_and(|k| k.as_str() == key)
    }

    fn finalise(&mut self, user_id: UserId) -> Option<ConnectionInfo> {
        let key = self.key.as_ref()?;
        if self.endpoint.is_none() || self.token.is_none() {
            return None;
        }

        let endpoint = self.endpoint.take().unwrap();
        let token = self.token.take().unwrap();

        Some(ConnectionInfo {
            channel_id: Some(key.channel_id),
            endpoint,
            guild_id: key.guild_id,
            session_id: key.as_str().to_owned(),
            token,
            user_id,
            video: true,
        })
    }
}
