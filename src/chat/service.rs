use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ChatError, ChatResult},
    store::RoomStore,
};

use super::{
    FullPolicy, Identity, IngestionWorker, LostMessage, Message, MessageQueue, RoomId,
    WorkerReport, gate::WriteGates,
};

/// How long a stopped worker gets to hand back its report before it is
/// aborted. It only has to drain the channel, which does not touch storage.
const STOP_GRACE: Duration = Duration::from_millis(250);

enum WorkerState {
    Idle(IngestionWorker),
    Running(JoinHandle<WorkerReport>),
    Finished,
}

/// Outcome of [`ChatService::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every accepted message was handed to the room logs before the deadline.
    pub drained: bool,
    /// Accepted messages that were never written, with the reason.
    pub lost: Vec<LostMessage>,
}

impl ShutdownReport {
    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}

/// Front door of the chat core.
///
/// Sends go through a bounded queue to a single ingestion worker; reads go
/// straight to the store. A read issued right after a send may therefore
/// miss that message until the worker has written it: the lag is at most
/// the messages currently queued.
pub struct ChatService {
    queue: MessageQueue,
    store: Arc<dyn RoomStore>,
    gates: Arc<WriteGates>,
    stop: watch::Sender<bool>,
    worker: Mutex<WorkerState>,
    /// `Some(drained)` once the first shutdown has finished.
    finished: watch::Sender<Option<bool>>,
}

impl ChatService {
    /// Builds the service with its worker idle. Sends are buffered (up to
    /// `capacity`) until [`ChatService::start`] is called.
    pub fn new(store: Arc<dyn RoomStore>, capacity: usize, policy: FullPolicy) -> ChatService {
        let (queue, rx) = MessageQueue::bounded(capacity, policy);
        let gates = Arc::new(WriteGates::default());
        let (stop, stop_rx) = watch::channel(false);
        let worker = IngestionWorker::new(rx, store.clone(), gates.clone(), stop_rx);
        let (finished, _) = watch::channel(None);

        ChatService {
            queue,
            store,
            gates,
            stop,
            worker: Mutex::new(WorkerState::Idle(worker)),
            finished,
        }
    }

    /// Spawns the ingestion worker. Does nothing if it already runs or the
    /// service has been shut down. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut state = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, WorkerState::Finished) {
            WorkerState::Idle(worker) => {
                *state = WorkerState::Running(tokio::spawn(worker.run()));
                info!(
                    capacity = self.queue.capacity(),
                    policy = %self.queue.policy(),
                    "chat service started"
                );
            }
            other => *state = other,
        }
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn policy(&self) -> FullPolicy {
        self.queue.policy()
    }

    /// Messages accepted but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Validates and queues a message. On success the message will reach the
    /// room log after every message accepted before it.
    pub async fn send(&self, room: &str, identity: &str, body: &str) -> ChatResult<Message> {
        let room = RoomId::parse(room)?;
        let sender = Identity::parse(identity)?;
        let message = Message::new(&sender, body)?;

        let seq = self.queue.enqueue(room.clone(), message.clone()).await?;
        debug!(%room, id = %message.id, seq, "message queued");
        Ok(message)
    }

    /// Rooms with a log, in no particular order.
    pub async fn rooms(&self) -> ChatResult<Vec<RoomId>> {
        self.store.list_rooms().await
    }

    /// Rooms with a log, in lexical order.
    pub async fn sorted_rooms(&self) -> ChatResult<Vec<RoomId>> {
        let mut rooms = self.store.list_rooms().await?;
        rooms.sort();
        Ok(rooms)
    }

    pub async fn messages(&self, room: &str) -> ChatResult<Vec<Message>> {
        let room = RoomId::parse(room)?;
        self.store.read_all(&room).await
    }

    pub async fn last_message(&self, room: &str) -> ChatResult<Message> {
        let room = RoomId::parse(room)?;
        self.store
            .read_last(&room)
            .await?
            .ok_or(ChatError::NoMessages(room))
    }

    /// Empties the room's log.
    ///
    /// Every message accepted before this call is superseded: whether it was
    /// already written or still queued, it will not appear in the room
    /// afterwards. Messages sent concurrently with the clear may land on
    /// either side of it.
    pub async fn clear(&self, room: &str) -> ChatResult<()> {
        let room = RoomId::parse(room)?;
        let cleared = self.clear_under_gate(&room).await;
        self.gates.sweep();
        cleared
    }

    async fn clear_under_gate(&self, room: &RoomId) -> ChatResult<()> {
        let gate = self.gates.gate(room);
        let mut cleared_through = gate.lock().await;

        let fence = self.queue.last_seq();
        self.store.clear(room).await?;
        *cleared_through = (*cleared_through).max(fence);

        info!(%room, fence, "room cleared");
        Ok(())
    }

    /// Stops accepting sends and waits for the worker to write what is
    /// queued, for at most `deadline`.
    ///
    /// When the deadline passes first, the append in progress is abandoned
    /// and it, along with everything still queued, is reported as lost.
    /// Messages whose append failed are reported as lost as well.
    ///
    /// Only the first call drains. Later calls wait (within their own
    /// deadline) for the first to finish and echo its `drained` flag with an
    /// empty `lost` list.
    pub async fn shutdown(&self, deadline: Duration) -> ShutdownReport {
        self.queue.close();

        let previous = {
            let mut state = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, WorkerState::Finished)
        };
        let mut handle = match previous {
            WorkerState::Idle(worker) => tokio::spawn(worker.run()),
            WorkerState::Running(handle) => handle,
            WorkerState::Finished => return self.await_first_shutdown(deadline).await,
        };

        let joined = match tokio::time::timeout(deadline, &mut handle).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                warn!(?deadline, "shutdown deadline elapsed, stopping ingestion worker");
                self.stop.send_replace(true);
                match tokio::time::timeout(STOP_GRACE, &mut handle).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        handle.abort();
                        None
                    }
                }
            }
        };

        let report = match joined {
            Some(Ok(report)) => ShutdownReport {
                drained: report.drained,
                lost: report.lost,
            },
            Some(Err(e)) => {
                error!(error = %e, "ingestion worker did not finish cleanly");
                ShutdownReport {
                    drained: false,
                    lost: Vec::new(),
                }
            }
            None => {
                error!(grace = ?STOP_GRACE, "ingestion worker ignored the stop request, aborted it");
                ShutdownReport {
                    drained: false,
                    lost: Vec::new(),
                }
            }
        };

        if report.drained && report.lost.is_empty() {
            info!("message queue drained");
        } else {
            for lost in &report.lost {
                warn!(id = %lost.id, room = %lost.room, reason = ?lost.reason, "message lost");
            }
            warn!(
                drained = report.drained,
                lost = report.lost_count(),
                "shutdown finished with unwritten messages"
            );
        }

        self.finished.send_replace(Some(report.drained));
        report
    }

    async fn await_first_shutdown(&self, deadline: Duration) -> ShutdownReport {
        let mut finished = self.finished.subscribe();
        let drained = match tokio::time::timeout(deadline, finished.wait_for(Option::is_some)).await
        {
            Ok(Ok(done)) => done.unwrap_or(false),
            _ => false,
        };

        ShutdownReport {
            drained,
            lost: Vec::new(),
        }
    }
}
