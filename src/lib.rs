#![warn(missing_docs)]
//! Waxwing is the real-time voice and screen-streaming core of a
//! Discord-style chat client, written in Rust. The library covers:
//!  * The voice-gateway handshake over an injected WebSocket transport,
//!    with its heartbeat cadence and opcode set.
//!  * A single encrypted UDP media flow: IP discovery, keepalives, and
//!    `aead_xchacha20_poly1305_rtpsize` packet sealing for every substream.
//!  * Opus audio both directions: capture → gate → encode on the way out,
//!    per-SSRC decode → mix on the way in.
//!  * H.264 screen-share video over RTP (RFC 6184): Annex-B packetization
//!    with FU-A fragmentation on send, single/STAP-A/FU-A reassembly on
//!    receive, and encoder/decoder adapters around injected codecs.
//!  * A session orchestrator gluing the above to the two-phase connect
//!    dispatches of the primary chat gateway.
//!
//! OS concerns — sound devices, screen capture, H.264 codecs, and the
//! WebSocket itself — are injected through small traits
//! ([`audio::AudioBackend`], [`video::MediaBackend`], [`ws::WsConnector`]),
//! so the core stays platform-neutral and testable.
//!
//! ## Getting started
//!
//! Construct a [`Waxwing`] inside a tokio runtime, then feed it the voice
//! dispatches your chat-gateway connection receives:
//!
//! ```no_run
//! use std::sync::Arc;
//! use waxwing::{audio::NullAudioBackend, Config, SessionHooks, UserId, Waxwing};
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let core = Waxwing::new(
//!     UserId(5),
//!     Config::default(),
//!     Arc::new(NullAudioBackend),
//!     None,
//!     SessionHooks::default().on_state_change(|state| println!("-> {state:?}")),
//! )?;
//!
//! // From the chat gateway, in either order:
//! core.on_voice_server_update("voice.example", "t1", waxwing::GuildId(10));
//! core.on_voice_state_update("session-id", UserId(5), waxwing::ChannelId(7));
//! # Ok(()) }
//! ```

pub mod audio;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub(crate) mod info;
mod manager;
pub mod model;
pub mod video;
pub mod ws;

pub use audiopus::{self as opus, Bitrate};
pub use discortp as packet;

pub use crate::{
    config::{Config, VideoConfig, VideoSourceConfig},
    events::{ConnectionState, SessionHooks, SpeakingEvent, VideoFrame},
    id::{ChannelId, GuildId, UserId},
    info::{ConnectionInfo, StreamKey},
    manager::Waxwing,
};
