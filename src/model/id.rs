//! Wire forms of snowflake IDs.
//!
//! The voice gateway writes snowflakes as JSON strings, but some payloads
//! have historically carried them as bare integers; deserialization accepts
//! both.

use serde::{
    de::{Error as DeError, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::fmt;

macro_rules! wire_id {
    ($(#[$attr:meta])* $Id:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $Id(pub u64);

        impl fmt::Display for $Id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl Serialize for $Id {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $Id {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl<'de> Visitor<'de> for IdVisitor {
                    type Value = $Id;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a snowflake as a string or integer")
                    }

                    fn visit_u64<E: DeError>(self, v: u64) -> Result<Self::Value, E> {
                        Ok($Id(v))
                    }

                    fn visit_str<E: DeError>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map($Id).map_err(DeError::custom)
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }

        impl From<u64> for $Id {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

wire_id! {
    /// Guild ("server") id as transmitted to the voice gateway.
    GuildId
}

wire_id! {
    /// User id as transmitted to the voice gateway.
    UserId
}

impl From<crate::id::GuildId> for GuildId {
    fn from(id: crate::id::GuildId) -> Self {
        Self(id.get())
    }
}

impl From<crate::id::UserId> for UserId {
    fn from(id: crate::id::UserId) -> Self {
        Self(id.get())
    }
}
