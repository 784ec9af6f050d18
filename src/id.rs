//! Newtypes around Discord snowflake IDs.

use std::fmt::{Display, Formatter, Result as FmtResult};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

/// ID of a voice/text channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ChannelId(pub u64);

/// ID of a guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct GuildId(pub u64);

/// ID of a user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct UserId(pub u64);

impl_id!(ChannelId);
impl_id!(GuildId);
impl_id!(UserId);
