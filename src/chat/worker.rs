use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{error::ChatError, store::RoomStore};

use super::{Envelope, QueueReceiver, RoomId, gate::WriteGates};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    /// Still queued, or mid-append, when the shutdown deadline passed.
    Deadline,
    /// The room log rejected the append.
    Storage,
}

/// An accepted message that never reached its room log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostMessage {
    pub id: Uuid,
    pub room: RoomId,
    pub reason: LossReason,
}

impl LostMessage {
    fn new(envelope: &Envelope, reason: LossReason) -> LostMessage {
        LostMessage {
            id: envelope.message.id,
            room: envelope.room.clone(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkerReport {
    pub written: usize,
    /// Dropped because a later clear of their room covered them.
    pub superseded: usize,
    pub lost: Vec<LostMessage>,
    /// True when the queue was closed and emptied before any stop request.
    pub drained: bool,
}

/// The single consumer of the message queue.
///
/// Appends envelopes strictly in dequeue order, one at a time. A failed
/// append is logged and counted as lost; nothing is retried or requeued.
pub struct IngestionWorker {
    rx: QueueReceiver,
    store: Arc<dyn RoomStore>,
    gates: Arc<WriteGates>,
    stop: watch::Receiver<bool>,
}

enum Outcome {
    Written,
    Superseded,
    Failed(ChatError),
}

impl IngestionWorker {
    pub(crate) fn new(
        rx: QueueReceiver,
        store: Arc<dyn RoomStore>,
        gates: Arc<WriteGates>,
        stop: watch::Receiver<bool>,
    ) -> IngestionWorker {
        IngestionWorker {
            rx,
            store,
            gates,
            stop,
        }
    }

    /// Runs until the queue is closed and empty, or until a stop is
    /// requested. A stop that arrives mid-append abandons that append: the
    /// envelope is reported lost right away, though the write itself may
    /// still land afterwards.
    pub async fn run(mut self) -> WorkerReport {
        info!("ingestion worker started");
        let mut report = WorkerReport::default();

        report.drained = loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => break false,
                next = self.rx.dequeue() => match next {
                    Some(envelope) => {
                        if !self.persist(envelope, &mut report).await {
                            break false;
                        }
                    }
                    None => break true,
                },
            }
        };

        if !report.drained {
            let left = self.rx.close_and_drain().await;
            report
                .lost
                .extend(left.iter().map(|e| LostMessage::new(e, LossReason::Deadline)));
        }

        info!(
            written = report.written,
            superseded = report.superseded,
            lost = report.lost.len(),
            drained = report.drained,
            "ingestion worker stopped"
        );
        report
    }

    /// Handles one envelope. Returns false if a stop request cut it short.
    async fn persist(&mut self, envelope: Envelope, report: &mut WorkerReport) -> bool {
        let append = tokio::spawn(append_unless_cleared(
            self.store.clone(),
            self.gates.clone(),
            envelope.clone(),
        ));

        let outcome = tokio::select! {
            biased;
            joined = append => joined,
            _ = stop_requested(&mut self.stop) => {
                warn!(
                    room = %envelope.room,
                    id = %envelope.message.id,
                    "stop requested mid-append, abandoning it"
                );
                report.lost.push(LostMessage::new(&envelope, LossReason::Deadline));
                return false;
            }
        };

        match outcome {
            Ok(Outcome::Written) => report.written += 1,
            Ok(Outcome::Superseded) => {
                debug!(
                    room = %envelope.room,
                    id = %envelope.message.id,
                    seq = envelope.seq,
                    "message superseded by clear"
                );
                report.superseded += 1;
            }
            Ok(Outcome::Failed(e)) => {
                error!(
                    room = %envelope.room,
                    id = %envelope.message.id,
                    error = %e,
                    "failed to persist message, it is lost"
                );
                report.lost.push(LostMessage::new(&envelope, LossReason::Storage));
            }
            Err(e) => {
                error!(
                    room = %envelope.room,
                    id = %envelope.message.id,
                    error = %e,
                    "append task died, message is lost"
                );
                report.lost.push(LostMessage::new(&envelope, LossReason::Storage));
            }
        }

        self.gates.settle(envelope.seq);
        true
    }
}

/// Appends under the room's gate unless a clear already covers the envelope.
async fn append_unless_cleared(
    store: Arc<dyn RoomStore>,
    gates: Arc<WriteGates>,
    envelope: Envelope,
) -> Outcome {
    let gate = gates.gate(&envelope.room);
    let cleared_through = gate.lock().await;

    if envelope.seq <= *cleared_through {
        return Outcome::Superseded;
    }

    match store.append(&envelope.room, &envelope.message).await {
        Ok(()) => Outcome::Written,
        Err(e) => Outcome::Failed(e),
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let sender_gone = stop.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        // Nobody can ask us to stop any more; run until the queue closes.
        std::future::pending::<()>().await;
    }
}
