//! JSON protocol model for the voice gateway.
//!
//! Every message is an `{"op": <int>, "d": <body>}` envelope. [`Event`]
//! covers the opcodes this crate sends or reacts to; anything else is
//! surfaced as [`Event::from_value`] returning `None` so callers can log and
//! drop it.

pub mod id;
pub mod payload;

use payload::*;
use serde::{
    ser::{SerializeStruct, Serializer},
    Deserialize,
    Serialize,
};
use serde_json::{Error as JsonError, Value};

/// Numeric opcodes of the voice gateway.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OpCode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    Resumed = 9,
    Video = 12,
    ClientDisconnect = 13,
}

impl OpCode {
    /// Maps a wire opcode back to its variant, if known.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Identify,
            1 => Self::SelectProtocol,
            2 => Self::Ready,
            3 => Self::Heartbeat,
            4 => Self::SessionDescription,
            5 => Self::Speaking,
            6 => Self::HeartbeatAck,
            7 => Self::Resume,
            8 => Self::Hello,
            9 => Self::Resumed,
            12 => Self::Video,
            13 => Self::ClientDisconnect,
            _ => return None,
        })
    }
}

/// A complete gateway message, tagged by opcode.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    Heartbeat(Heartbeat),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(HeartbeatAck),
    Resume(Resume),
    Hello(Hello),
    Resumed,
    Video(Video),
    ClientDisconnect(ClientDisconnect),
}

impl Event {
    /// The opcode this event is carried under.
    #[must_use]
    pub fn kind(&self) -> OpCode {
        match self {
            Self::Identify(_) => OpCode::Identify,
            Self::SelectProtocol(_) => OpCode::SelectProtocol,
            Self::Ready(_) => OpCode::Ready,
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::SessionDescription(_) => OpCode::SessionDescription,
            Self::Speaking(_) => OpCode::Speaking,
            Self::HeartbeatAck(_) => OpCode::HeartbeatAck,
            Self::Resume(_) => OpCode::Resume,
            Self::Hello(_) => OpCode::Hello,
            Self::Resumed => OpCode::Resumed,
            Self::Video(_) => OpCode::Video,
            Self::ClientDisconnect(_) => OpCode::ClientDisconnect,
        }
    }

    /// Parses one gateway envelope.
    ///
    /// Returns `Ok(None)` for structurally valid messages carrying an opcode
    /// this crate does not model; the caller logs and drops those.
    pub fn from_value(value: Value) -> Result<Option<Self>, JsonError> {
        #[derive(Deserialize)]
        struct Envelope {
            op: u8,
            #[serde(default)]
            d: Value,
        }

        let env: Envelope = serde_json::from_value(value)?;
        let Some(op) = OpCode::from_u8(env.op) else {
            return Ok(None);
        };

        Ok(Some(match op {
            OpCode::Identify => Self::Identify(serde_json::from_value(env.d)?),
            OpCode::SelectProtocol => Self::SelectProtocol(serde_json::from_value(env.d)?),
            OpCode::Ready => Self::Ready(serde_json::from_value(env.d)?),
            OpCode::Heartbeat => Self::Heartbeat(Heartbeat {
                nonce: serde_json::from_value(env.d)?,
            }),
            OpCode::SessionDescription =>
                Self::SessionDescription(serde_json::from_value(env.d)?),
            OpCode::Speaking => Self::Speaking(serde_json::from_value(env.d)?),
            OpCode::HeartbeatAck => Self::HeartbeatAck(HeartbeatAck {
                nonce: serde_json::from_value(env.d)?,
            }),
            OpCode::Resume => Self::Resume(serde_json::from_value(env.d)?),
            OpCode::Hello => Self::Hello(serde_json::from_value(env.d)?),
            OpCode::Resumed => Self::Resumed,
            OpCode::Video => Self::Video(serde_json::from_value(env.d)?),
            OpCode::ClientDisconnect => Self::ClientDisconnect(serde_json::from_value(env.d)?),
        }))
    }

    /// Parses one gateway envelope from message text.
    pub fn from_json_str(text: &str) -> Result<Option<Self>, JsonError> {
        Self::from_value(serde_json::from_str(text)?)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut env = serializer.serialize_struct("Event", 2)?;
        env.serialize_field("op", &(self.kind() as u8))?;

        match self {
            Self::Identify(d) => env.serialize_field("d", d)?,
            Self::SelectProtocol(d) => env.serialize_field("d", d)?,
            Self::Ready(d) => env.serialize_field("d", d)?,
            Self::Heartbeat(d) => env.serialize_field("d", &d.nonce)?,
            Self::SessionDescription(d) => env.serialize_field("d", d)?,
            Self::Speaking(d) => env.serialize_field("d", d)?,
            Self::HeartbeatAck(d) => env.serialize_field("d", &d.nonce)?,
            Self::Resume(d) => env.serialize_field("d", d)?,
            Self::Hello(d) => env.serialize_field("d", d)?,
            Self::Resumed => env.serialize_field("d", &Value::Null)?,
            Self::Video(d) => env.serialize_field("d", d)?,
            Self::ClientDisconnect(d) => env.serialize_field("d", d)?,
        }

        env.end()
    }
}

macro_rules! impl_from_payload {
    ($($Payload:ident),+) => {
        $(
            impl From<$Payload> for Event {
                fn from(p: $Payload) -> Self {
                    Self::$Payload(p)
                }
            }
        )+
    };
}

impl_from_payload!(
    Identify,
    SelectProtocol,
    Ready,
    Heartbeat,
    SessionDescription,
    Speaking,
    HeartbeatAck,
    Resume,
    Hello,
    Video,
    ClientDisconnect
);
