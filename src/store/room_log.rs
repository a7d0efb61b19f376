use std::{
    collections::HashMap,
    io::{ErrorKind, SeekFrom},
    ops::Deref,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::RwLock,
};
use tracing::{debug, warn};

use crate::{
    chat::{Message, RoomId},
    error::{ChatError, ChatResult},
};

use super::{RoomDirectory, RoomStore};

/// Room logs stored as JSON Lines, one file per room.
///
/// Every record is a single `\n`-terminated JSON object. Readers only trust
/// terminated lines, so a record cut short by a crash is never returned, and
/// the next append terminates the torn tail before writing so earlier records
/// stay readable. An append that fails is rolled back to the previous length.
pub struct FileRoomLog {
    dir: RoomDirectory,
    locks: LockTable,
}

impl FileRoomLog {
    pub fn open(root: impl AsRef<Path>) -> std::io::Result<FileRoomLog> {
        Ok(FileRoomLog {
            dir: RoomDirectory::open(root)?,
            locks: LockTable::default(),
        })
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.dir
    }

    async fn load(&self, room: &RoomId) -> ChatResult<Vec<Message>> {
        let path = self.dir.path_for(room);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ChatError::storage(room, e)),
        };

        Ok(decode_records(&path, &data))
    }
}

/// Per-room reader/writer locks, kept only while someone holds them.
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<RoomId, Arc<RwLock<()>>>>,
}

impl LockTable {
    fn hold(&self, room: &RoomId) -> RoomLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        RoomLock {
            table: self,
            room: room.clone(),
            lock: locks.entry(room.clone()).or_default().clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct RoomLock<'a> {
    table: &'a LockTable,
    room: RoomId,
    lock: Arc<RwLock<()>>,
}

impl Deref for RoomLock<'_> {
    type Target = RwLock<()>;

    fn deref(&self) -> &RwLock<()> {
        &self.lock
    }
}

impl Drop for RoomLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.table.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Ours plus the table's: nobody else is waiting on it.
        let unused = locks
            .get(&self.room)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if unused {
            locks.remove(&self.room);
        }
    }
}

#[async_trait]
impl RoomStore for FileRoomLog {
    async fn append(&self, room: &RoomId, message: &Message) -> ChatResult<()> {
        let mut record = serde_json::to_vec(message)?;
        record.push(b'\n');

        let lock = self.locks.hold(room);
        let _guard = lock.write().await;

        let path = self.dir.path_for(room);
        let existed = fs::try_exists(&path).await.unwrap_or(true);
        if let Err(e) = write_record(&path, record).await {
            if !existed {
                discard_if_empty(&path).await;
            }
            return Err(ChatError::storage(room, e));
        }

        debug!(%room, id = %message.id, "appended message");
        Ok(())
    }

    async fn read_all(&self, room: &RoomId) -> ChatResult<Vec<Message>> {
        let lock = self.locks.hold(room);
        let _guard = lock.read().await;
        self.load(room).await
    }

    async fn read_last(&self, room: &RoomId) -> ChatResult<Option<Message>> {
        let lock = self.locks.hold(room);
        let _guard = lock.read().await;
        Ok(self.load(room).await?.pop())
    }

    async fn clear(&self, room: &RoomId) -> ChatResult<()> {
        let lock = self.locks.hold(room);
        let _guard = lock.write().await;

        let path = self.dir.path_for(room);
        let file = match OpenOptions::new().write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ChatError::storage(room, e)),
        };
        file.set_len(0)
            .await
            .map_err(|e| ChatError::storage(room, e))?;
        file.sync_all()
            .await
            .map_err(|e| ChatError::storage(room, e))?;

        debug!(%room, "cleared room log");
        Ok(())
    }

    async fn list_rooms(&self) -> ChatResult<Vec<RoomId>> {
        self.dir.list().await
    }
}

async fn write_record(path: &Path, mut record: Vec<u8>) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await?;

    let len = file.metadata().await?.len();
    if len > 0 {
        file.seek(SeekFrom::Start(len - 1)).await?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            warn!(path = %path.display(), "terminating torn record before append");
            record.insert(0, b'\n');
        }
    }

    if let Err(e) = commit(&mut file, &record).await {
        if let Err(undo) = file.set_len(len).await {
            warn!(path = %path.display(), error = %undo, "could not roll back failed append");
        }
        return Err(e);
    }
    Ok(())
}

async fn commit(file: &mut File, record: &[u8]) -> std::io::Result<()> {
    file.write_all(record).await?;
    file.flush().await?;
    #[cfg(test)]
    tests::injected_sync_failure()?;
    file.sync_data().await
}

async fn discard_if_empty(path: &Path) {
    if let Ok(meta) = fs::metadata(path).await {
        if meta.len() == 0 {
            let _ = fs::remove_file(path).await;
        }
    }
}

fn decode_records(path: &Path, data: &[u8]) -> Vec<Message> {
    let mut lines: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    // The piece after the last newline is either empty or an unfinished record.
    lines.pop();

    lines
        .into_iter()
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_slice::<Message>(line) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, io::Write};

    use super::*;
    use crate::chat::Identity;

    thread_local! {
        static FAIL_SYNC: Cell<bool> = const { Cell::new(false) };
    }

    pub(super) fn injected_sync_failure() -> std::io::Result<()> {
        if FAIL_SYNC.with(Cell::get) {
            Err(std::io::Error::other("injected sync failure"))
        } else {
            Ok(())
        }
    }

    /// Runs `f` with every append on this thread failing after its write.
    async fn with_failing_sync<F: Future>(f: F) -> F::Output {
        FAIL_SYNC.with(|fail| fail.set(true));
        let out = f.await;
        FAIL_SYNC.with(|fail| fail.set(false));
        out
    }

    fn msg(sender: &str, body: &str) -> Message {
        Message::new(&Identity::parse(sender).unwrap(), body).unwrap()
    }

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn appends_are_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let sent: Vec<Message> = (0..5).map(|i| msg("alice", &format!("m{i}"))).collect();
        for m in &sent {
            log.append(&lobby, m).await.unwrap();
        }

        assert_eq!(log.read_all(&lobby).await.unwrap(), sent);
        assert_eq!(log.read_last(&lobby).await.unwrap(), sent.last().cloned());
    }

    #[tokio::test]
    async fn unknown_room_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let ghost = room("ghost");

        assert!(log.read_all(&ghost).await.unwrap().is_empty());
        assert!(log.read_last(&ghost).await.unwrap().is_none());
        log.clear(&ghost).await.unwrap();
        assert!(log.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_but_keeps_room_listed() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let general = room("general");

        log.append(&general, &msg("bob", "hello")).await.unwrap();
        log.clear(&general).await.unwrap();

        assert!(log.read_all(&general).await.unwrap().is_empty());
        assert!(log.read_last(&general).await.unwrap().is_none());
        assert_eq!(log.list_rooms().await.unwrap(), vec![general.clone()]);

        let again = msg("bob", "after clear");
        log.append(&general, &again).await.unwrap();
        assert_eq!(log.read_all(&general).await.unwrap(), vec![again]);
    }

    #[tokio::test]
    async fn torn_tail_is_ignored_and_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let first = msg("alice", "intact");
        log.append(&lobby, &first).await.unwrap();

        let path = log.directory().path_for(&lobby);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":"0190"#).unwrap();
        drop(file);

        assert_eq!(log.read_all(&lobby).await.unwrap(), vec![first.clone()]);

        let second = msg("alice", "after crash");
        log.append(&lobby, &second).await.unwrap();
        assert_eq!(log.read_all(&lobby).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn bodies_with_newlines_stay_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let multi = msg("carol", "line one\nline two\n");
        log.append(&lobby, &multi).await.unwrap();

        let raw = std::fs::read_to_string(log.directory().path_for(&lobby)).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert_eq!(log.read_all(&lobby).await.unwrap(), vec![multi]);
    }

    #[tokio::test]
    async fn reads_during_appends_see_whole_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FileRoomLog::open(dir.path()).unwrap());
        let lobby = room("lobby");

        let writer = tokio::spawn({
            let log = log.clone();
            let lobby = lobby.clone();
            async move {
                for i in 0..50 {
                    log.append(&lobby, &msg("w", &format!("{i}"))).await.unwrap();
                }
            }
        });

        let mut seen = 0;
        while !writer.is_finished() {
            let msgs = log.read_all(&lobby).await.unwrap();
            assert!(msgs.len() >= seen);
            for (i, m) in msgs.iter().enumerate() {
                assert_eq!(m.body, i.to_string());
            }
            seen = msgs.len();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(log.read_all(&lobby).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn failed_first_append_leaves_no_room() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let result = with_failing_sync(log.append(&lobby, &msg("alice", "never"))).await;
        assert!(matches!(result, Err(ChatError::Storage { .. })));

        assert!(!log.directory().path_for(&lobby).exists());
        assert!(log.list_rooms().await.unwrap().is_empty());
        assert!(log.read_all(&lobby).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_append_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let first = msg("alice", "kept");
        log.append(&lobby, &first).await.unwrap();
        let path = log.directory().path_for(&lobby);
        let before = std::fs::read(&path).unwrap();

        let result = with_failing_sync(log.append(&lobby, &msg("alice", "rolled back"))).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(log.read_all(&lobby).await.unwrap(), vec![first.clone()]);

        let second = msg("alice", "after failure");
        log.append(&lobby, &second).await.unwrap();
        assert_eq!(log.read_all(&lobby).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn failed_append_after_torn_tail_keeps_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");
        let path = log.directory().path_for(&lobby);
        std::fs::write(&path, br#"{"id":"0190"#).unwrap();

        let result = with_failing_sync(log.append(&lobby, &msg("alice", "lost"))).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), br#"{"id":"0190"#);
        assert!(log.read_all(&lobby).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn locks_are_released_after_use() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();

        for i in 0..2000 {
            let ghost = room(&format!("ghost{i}"));
            assert!(log.read_all(&ghost).await.unwrap().is_empty());
            assert!(log.read_last(&ghost).await.unwrap().is_none());
            log.clear(&ghost).await.unwrap();
        }
        assert_eq!(log.locks.len(), 0);

        let lobby = room("lobby");
        log.append(&lobby, &msg("alice", "hi")).await.unwrap();
        assert_eq!(log.locks.len(), 0);
    }

    #[tokio::test]
    async fn held_lock_is_shared_then_released() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRoomLog::open(dir.path()).unwrap();
        let lobby = room("lobby");

        let first = log.locks.hold(&lobby);
        let second = log.locks.hold(&lobby);
        assert!(Arc::ptr_eq(&first.lock, &second.lock));

        let writer = first.write().await;
        assert!(second.try_read().is_err());
        drop(writer);
        drop(first);
        assert_eq!(log.locks.len(), 1);
        drop(second);
        assert_eq!(log.locks.len(), 0);
    }
}
