mod directory;
mod room_log;

pub use directory::{RoomDirectory, LOG_EXTENSION};
pub use room_log::FileRoomLog;

use async_trait::async_trait;

use crate::{
    chat::{Message, RoomId},
    error::ChatResult,
};

/// Persistent per-room message history.
///
/// Appends for one room are never issued concurrently by the chat pipeline,
/// but reads may overlap any append or clear and must only ever see whole
/// records.
#[async_trait]
pub trait RoomStore: Send + Sync + 'static {
    /// Durably adds `message` at the end of the room's log, creating it on
    /// first use.
    async fn append(&self, room: &RoomId, message: &Message) -> ChatResult<()>;

    /// Every message in append order; empty for a room never written to.
    async fn read_all(&self, room: &RoomId) -> ChatResult<Vec<Message>>;

    /// The most recent message, if any.
    async fn read_last(&self, room: &RoomId) -> ChatResult<Option<Message>>;

    /// Truncates the room's log. The room keeps existing.
    async fn clear(&self, room: &RoomId) -> ChatResult<()>;

    /// Rooms that have a log, in no particular order.
    async fn list_rooms(&self) -> ChatResult<Vec<RoomId>>;
}
