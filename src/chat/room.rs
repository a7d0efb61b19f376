use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

pub const MAX_ROOM_LEN: usize = 64;

/// A room name that is safe to use as a file stem.
///
/// Only ASCII letters, digits, `-` and `_` are accepted, so a `RoomId` can
/// never carry a path separator, a `..` segment or a reserved character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<RoomId, ChatError> {
        if raw.is_empty() {
            return Err(ChatError::Validation("room name is empty".to_owned()));
        }
        if raw.len() > MAX_ROOM_LEN {
            return Err(ChatError::Validation(format!(
                "room name is longer than {MAX_ROOM_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ChatError::Validation(format!(
                "room name contains forbidden character {bad:?}"
            )));
        }

        Ok(RoomId(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomId::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
