//! Payload bodies for each voice gateway opcode.

use super::id::{GuildId, UserId};
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::IpAddr;

/// Opcode 0: opens a new voice session.
///
/// Snowflakes are string-encoded on the wire; `video` marks the session as
/// video-capable (always set for stream sessions).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identify {
    /// Guild the voice channel belongs to.
    pub server_id: GuildId,
    /// The connecting user.
    pub user_id: UserId,
    /// Session identity from `VoiceStateUpdate` (or the stream key).
    pub session_id: String,
    /// Ephemeral token from `VoiceServerUpdate`.
    pub token: String,
    /// Whether this session is video-capable.
    pub video: bool,
}

/// Opcode 1: selects UDP + encryption mode after IP discovery.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SelectProtocol {
    /// Always `"udp"`.
    pub protocol: String,
    /// Address, port, and mode being selected.
    pub data: ProtocolData,
}

/// Transport parameters carried inside [`SelectProtocol`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProtocolData {
    /// The public address learned through IP discovery.
    pub address: IpAddr,
    /// The public port learned through IP discovery.
    pub port: u16,
    /// Negotiated encryption scheme name.
    pub mode: String,
}

/// Opcode 2: server-assigned transport parameters.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ready {
    /// Our assigned base (audio) SSRC.
    pub ssrc: u32,
    /// Voice server UDP address.
    pub ip: String,
    /// Voice server UDP port.
    pub port: u16,
    /// Encryption modes the server offers.
    pub modes: Vec<String>,
}

/// Opcode 3: keeps the WebSocket alive.
///
/// The body is a bare integer on the wire (milliseconds since the epoch);
/// the server echoes it back in [`HeartbeatAck`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Heartbeat {
    /// Milliseconds since the epoch at send time.
    pub nonce: u64,
}

/// Opcode 4: delivers the session's symmetric key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    /// The encryption mode the server settled on.
    pub mode: String,
    /// The session's 32-byte symmetric key.
    pub secret_key: Vec<u8>,
}

/// Opcode 5: sent to signal our own transmission state, received to map a
/// remote user to their SSRC.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Speaking {
    /// Flag set describing the transmission.
    pub speaking: SpeakingState,
    /// Delay field, always zero for clients. Absent on received events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    /// The SSRC the flags apply to.
    pub ssrc: u32,
    /// Present on received events: the user transmitting on `ssrc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Opcode 6: heartbeat acknowledgement, echoing the sent value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeartbeatAck {
    /// The value carried by the acknowledged heartbeat.
    pub nonce: u64,
}

/// Opcode 7: resumes a dropped WebSocket without a full re-identify.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resume {
    /// Guild the dropped session belonged to.
    pub server_id: GuildId,
    /// Identity of the session being resumed.
    pub session_id: String,
    /// Token of the session being resumed.
    pub token: String,
}

/// Opcode 8: first message on a fresh socket.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Hello {
    /// Heartbeat cadence in milliseconds. Discord sends this as a float.
    pub heartbeat_interval: f64,
}

/// Opcode 12: declares the SSRC family and video streams for this session.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Video {
    /// The base SSRC carrying audio.
    pub audio_ssrc: u32,
    /// `audio_ssrc + 1`, or zero for receive-only parties.
    pub video_ssrc: u32,
    /// `audio_ssrc + 2`; advertised but never transmitted on.
    pub rtx_ssrc: u32,
    /// Declared video substreams (one, for senders).
    pub streams: Vec<VideoStream>,
    /// Codec preferences.
    pub codecs: Vec<VideoCodec>,
}

/// One declared substream within a [`Video`] payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoStream {
    /// Always `"video"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Restriction id; `"100"` for the sole stream.
    pub rid: String,
    /// SSRC this substream transmits on.
    pub ssrc: u32,
    /// Whether the substream is currently live.
    pub active: bool,
    /// Relative quality, 0–100.
    pub quality: u16,
    /// Upper bitrate bound in bits per second.
    pub max_bitrate: u32,
    /// Upper frame-rate bound.
    pub max_framerate: u32,
    /// Upper resolution bound.
    pub max_resolution: Resolution,
}

/// Resolution bound attached to a [`VideoStream`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resolution {
    /// Always `"fixed"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

/// One codec description within a [`Video`] payload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoCodec {
    /// Codec name, e.g. `"H264"`.
    pub name: String,
    /// `"video"` or `"audio"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Preference weight; higher wins.
    pub priority: u32,
    /// RTP payload type carrying this codec.
    pub payload_type: u8,
    /// RTP payload type of the codec's retransmission stream, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx_payload_type: Option<u8>,
}

/// Opcode 13: a user left the call.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientDisconnect {
    /// The departed user.
    pub user_id: UserId,
}

bitflags! {
    /// Flag set describing how/whether a client is transmitting audio.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct SpeakingState: u8 {
        /// Normal (microphone) transmission.
        const MICROPHONE = 1;
        /// Context (soundshare/music) audio; no speaking indicator.
        const SOUNDSHARE = 1 << 1;
        /// Lowers the volume of other speakers while set.
        const PRIORITY = 1 << 2;
    }
}

impl SpeakingState {
    #[allow(missing_docs)]
    #[must_use]
    pub fn microphone(self) -> bool {
        self.contains(Self::MICROPHONE)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn soundshare(self) -> bool {
        self.contains(Self::SOUNDSHARE)
    }
}

impl Serialize for SpeakingState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for SpeakingState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits as u8))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identify_writes_string_snowflakes() {
        let identify = Identify {
            server_id: GuildId(10),
            user_id: UserId(5),
            session_id: "S".into(),
            token: "t1".into(),
            video: true,
        };

        let v = serde_json::to_value(&identify).unwrap();
        assert_eq!(v["server_id"], "10");
        assert_eq!(v["user_id"], "5");
        assert_eq!(v["video"], true);
    }

    #[test]
    fn speaking_state_round_trips_as_integer() {
        let flags = SpeakingState::MICROPHONE | SpeakingState::PRIORITY;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, "5");

        let back: SpeakingState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn unknown_speaking_bits_are_dropped() {
        let parsed: SpeakingState = serde_json::from_str("255").unwrap();
        assert_eq!(
            parsed,
            SpeakingState::MICROPHONE | SpeakingState::SOUNDSHARE | SpeakingState::PRIORITY
        );
    }
}
