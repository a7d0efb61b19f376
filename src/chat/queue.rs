use std::{
    fmt,
    str::FromStr,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{ChatError, ChatResult};

use super::{Message, RoomId};

pub const DEFAULT_CAPACITY: usize = 10;

/// What `enqueue` does when the buffer already holds `capacity` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullPolicy {
    /// Reject with [`ChatError::QueueFull`] so the client can retry.
    #[default]
    FailFast,
    /// Wait for the worker to free a slot. Only sound when the HTTP layer
    /// bounds the request with its own timeout.
    Block,
}

impl FromStr for FullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(FullPolicy::FailFast),
            "block" => Ok(FullPolicy::Block),
            other => Err(format!("unknown queue policy {other:?}, expected fail-fast or block")),
        }
    }
}

impl fmt::Display for FullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FullPolicy::FailFast => f.write_str("fail-fast"),
            FullPolicy::Block => f.write_str("block"),
        }
    }
}

/// A message on its way to a room log.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Position in global acceptance order, starting at 1.
    pub seq: u64,
    pub room: RoomId,
    pub message: Message,
}

/// Producer side of the bounded FIFO between request handlers and the
/// ingestion worker.
pub struct MessageQueue {
    tx: RwLock<Option<mpsc::Sender<Envelope>>>,
    capacity: usize,
    policy: FullPolicy,
    last_seq: AtomicU64,
    // Numbering and sending happen under this lock, so sequence order is
    // channel order.
    ordering: Mutex<()>,
}

/// Consumer side, owned by the single ingestion worker.
pub struct QueueReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl MessageQueue {
    pub fn bounded(capacity: usize, policy: FullPolicy) -> (MessageQueue, QueueReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let queue = MessageQueue {
            tx: RwLock::new(Some(tx)),
            capacity,
            policy,
            last_seq: AtomicU64::new(0),
            ordering: Mutex::new(()),
        };

        (queue, QueueReceiver { rx })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> FullPolicy {
        self.policy
    }

    /// Messages accepted but not yet taken by the worker.
    pub fn len(&self) -> usize {
        self.sender()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Highest sequence number handed out so far.
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Accepts a message for `room`, returning its sequence number.
    pub async fn enqueue(&self, room: RoomId, message: Message) -> ChatResult<u64> {
        let tx = self.sender().ok_or(ChatError::QueueClosed)?;

        match self.policy {
            FullPolicy::FailFast => {
                let permit = tx.try_reserve().map_err(|e| match e {
                    TrySendError::Full(()) => ChatError::QueueFull {
                        capacity: self.capacity,
                    },
                    TrySendError::Closed(()) => ChatError::QueueClosed,
                })?;
                Ok(self.admit(permit, room, message))
            }
            FullPolicy::Block => {
                let permit = tx.reserve().await.map_err(|_| ChatError::QueueClosed)?;
                Ok(self.admit(permit, room, message))
            }
        }
    }

    /// Stops accepting messages. Anything already buffered stays for the
    /// worker to drain.
    pub fn close(&self) {
        let mut tx = self.tx.write().unwrap_or_else(|e| e.into_inner());
        tx.take();
    }

    fn sender(&self) -> Option<mpsc::Sender<Envelope>> {
        self.tx.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn admit(&self, permit: mpsc::Permit<'_, Envelope>, room: RoomId, message: Message) -> u64 {
        let _order = self.ordering.lock().unwrap_or_else(|e| e.into_inner());
        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        permit.send(Envelope { seq, room, message });
        seq
    }
}

impl QueueReceiver {
    /// Waits for the next envelope. `None` once the queue is closed and empty.
    pub async fn dequeue(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Refuses further sends and hands back everything still buffered,
    /// including sends that already hold a reserved slot.
    pub async fn close_and_drain(&mut self) -> Vec<Envelope> {
        self.rx.close();
        let mut left = Vec::new();
        while let Some(envelope) = self.rx.recv().await {
            left.push(envelope);
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::Identity;

    fn msg(body: &str) -> Message {
        Message::new(&Identity::parse("tester").unwrap(), body).unwrap()
    }

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn fail_fast_rejects_beyond_capacity() {
        let (queue, mut rx) = MessageQueue::bounded(2, FullPolicy::FailFast);

        assert_eq!(queue.enqueue(room("lobby"), msg("A")).await.unwrap(), 1);
        assert_eq!(queue.enqueue(room("lobby"), msg("B")).await.unwrap(), 2);
        assert!(matches!(
            queue.enqueue(room("lobby"), msg("C")).await,
            Err(ChatError::QueueFull { capacity: 2 })
        ));
        assert_eq!(queue.len(), 2);

        let first = rx.dequeue().await.unwrap();
        assert_eq!(first.message.body, "A");

        assert_eq!(queue.enqueue(room("lobby"), msg("C")).await.unwrap(), 3);
        let rest: Vec<_> = rx
            .close_and_drain()
            .await
            .into_iter()
            .map(|e| e.message.body)
            .collect();
        assert_eq!(rest, ["B", "C"]);
    }

    #[tokio::test]
    async fn fifo_across_rooms() {
        let (queue, mut rx) = MessageQueue::bounded(8, FullPolicy::FailFast);
        for (i, name) in ["a", "b", "a", "c", "b"].iter().enumerate() {
            queue.enqueue(room(name), msg(&i.to_string())).await.unwrap();
        }
        queue.close();

        let mut order = Vec::new();
        while let Some(envelope) = rx.dequeue().await {
            order.push((envelope.seq, envelope.room.to_string(), envelope.message.body));
        }
        let expected: Vec<_> = ["a", "b", "a", "c", "b"]
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u64 + 1, name.to_string(), i.to_string()))
            .collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn close_rejects_new_but_keeps_buffered() {
        let (queue, mut rx) = MessageQueue::bounded(4, FullPolicy::FailFast);
        queue.enqueue(room("lobby"), msg("kept")).await.unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(room("lobby"), msg("late")).await,
            Err(ChatError::QueueClosed)
        ));
        assert_eq!(rx.dequeue().await.unwrap().message.body, "kept");
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn block_policy_waits_for_space() {
        let (queue, mut rx) = MessageQueue::bounded(1, FullPolicy::Block);
        let queue = std::sync::Arc::new(queue);
        queue.enqueue(room("lobby"), msg("first")).await.unwrap();

        let blocked = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(room("lobby"), msg("second")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.dequeue().await.unwrap().message.body, "first");
        assert_eq!(blocked.await.unwrap().unwrap(), 2);
        assert_eq!(rx.dequeue().await.unwrap().message.body, "second");
    }

    #[test]
    fn policy_parses() {
        assert_eq!("fail-fast".parse::<FullPolicy>().unwrap(), FullPolicy::FailFast);
        assert_eq!("BLOCK".parse::<FullPolicy>().unwrap(), FullPolicy::Block);
        assert!("drop".parse::<FullPolicy>().is_err());
    }
}
