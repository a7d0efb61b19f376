use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ChatError;

pub const MAX_SENDER_LEN: usize = 64;

/// The bare identity token a client presents in its `user` cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Identity, ChatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ChatError::Validation("sender is empty".to_owned()));
        }
        if raw.chars().count() > MAX_SENDER_LEN {
            return Err(ChatError::Validation(format!(
                "sender is longer than {MAX_SENDER_LEN} characters"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(ChatError::Validation(
                "sender contains control characters".to_owned(),
            ));
        }

        Ok(Identity(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Message {
    /// Stamps a new message with a fresh v7 id and the current time.
    pub fn new(sender: &Identity, body: &str) -> Result<Message, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::Validation("message body is empty".to_owned()));
        }

        Ok(Message {
            id: Uuid::now_v7(),
            sender: sender.as_str().to_owned(),
            body: body.to_owned(),
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}
