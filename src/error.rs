use thiserror::Error;

use crate::chat::RoomId;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("message queue is full (capacity {capacity}), retry later")]
    QueueFull { capacity: usize },

    #[error("message queue is closed")]
    QueueClosed,

    #[error("storage error in room {room}: {source}")]
    Storage {
        room: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode message: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("no messages in room {0}")]
    NoMessages(RoomId),
}

impl ChatError {
    pub(crate) fn storage(room: impl ToString, source: std::io::Error) -> Self {
        ChatError::Storage {
            room: room.to_string(),
            source,
        }
    }

    /// Whether the caller can expect the same request to succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::QueueFull { .. })
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
