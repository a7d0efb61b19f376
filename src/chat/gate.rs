use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::Mutex as AsyncMutex;

use super::RoomId;

/// Per-room write serialisation between the ingestion worker and `clear`.
///
/// Each gate holds the room's clear fence: the highest queue sequence number
/// that a clear has superseded. Envelopes at or below the fence are never
/// appended.
///
/// Once every envelope up to a fence has been handled the fence can no longer
/// match anything, so a gate nobody holds is forgotten and recreated at zero
/// on next use.
#[derive(Default)]
pub(crate) struct WriteGates {
    gates: Mutex<HashMap<RoomId, Arc<AsyncMutex<u64>>>>,
    settled: AtomicU64,
}

impl WriteGates {
    pub(crate) fn gate(&self, room: &RoomId) -> Arc<AsyncMutex<u64>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(room.clone()).or_default().clone()
    }

    /// Records that every envelope up to `seq` has been handled, then sweeps.
    pub(crate) fn settle(&self, seq: u64) {
        self.settled.fetch_max(seq, Ordering::SeqCst);
        self.sweep();
    }

    /// Drops gates that are neither held nor guarding an unhandled envelope.
    pub(crate) fn sweep(&self) {
        let settled = self.settled.load(Ordering::SeqCst);
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only made under the map lock, so a count of one means
        // nobody else can reach the gate.
        gates.retain(|_, gate| {
            Arc::strong_count(gate) > 1 || gate.try_lock().map_or(true, |fence| *fence > settled)
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn same_room_shares_a_fence() {
        let gates = WriteGates::default();
        let lobby = room("lobby");

        let held = gates.gate(&lobby);
        *held.lock().await = 7;
        assert_eq!(*gates.gate(&lobby).lock().await, 7);
        assert_eq!(*gates.gate(&room("other")).lock().await, 0);
    }

    #[tokio::test]
    async fn settled_fences_are_forgotten() {
        let gates = WriteGates::default();
        for i in 0..500 {
            *gates.gate(&room(&format!("r{i}"))).lock().await = 5;
        }
        gates.sweep();
        assert_eq!(gates.len(), 500);

        gates.settle(4);
        assert_eq!(gates.len(), 500);

        gates.settle(5);
        assert_eq!(gates.len(), 0);
    }

    #[tokio::test]
    async fn held_gates_survive_a_sweep() {
        let gates = WriteGates::default();
        let busy = gates.gate(&room("busy"));
        drop(gates.gate(&room("idle")));

        gates.settle(10);
        assert_eq!(gates.len(), 1);

        *busy.lock().await = 3;
        drop(busy);
        gates.sweep();
        assert_eq!(gates.len(), 0);
    }
}
