//! Message ingestion: the bounded queue between request handlers and the
//! room logs, the worker draining it, and the service tying both together.

mod gate;
mod message;
mod queue;
mod room;
mod service;
mod worker;

pub use message::{Identity, MAX_SENDER_LEN, Message};
pub use queue::{DEFAULT_CAPACITY, Envelope, FullPolicy, MessageQueue, QueueReceiver};
pub use room::{MAX_ROOM_LEN, RoomId};
pub use service::{ChatService, ShutdownReport};
pub use worker::{IngestionWorker, LossReason, LostMessage, WorkerReport};
