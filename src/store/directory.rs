use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::{
    chat::RoomId,
    error::{ChatError, ChatResult},
};

pub const LOG_EXTENSION: &str = "jsonl";

/// Maps rooms to files under the storage root and back.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    root: PathBuf,
}

impl RoomDirectory {
    /// Uses `root` as the storage location, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> std::io::Result<RoomDirectory> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(RoomDirectory { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, room: &RoomId) -> PathBuf {
        self.root.join(format!("{room}.{LOG_EXTENSION}"))
    }

    pub async fn list(&self) -> ChatResult<Vec<RoomId>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| ChatError::storage(self.root.display(), e))?;

        let mut rooms = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ChatError::storage(self.root.display(), e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != LOG_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match RoomId::parse(stem) {
                Ok(room) => rooms.push(room),
                Err(_) => warn!(path = %path.display(), "ignoring log file with invalid room name"),
            }
        }

        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_root_and_lists_only_room_logs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("messages");
        let directory = RoomDirectory::open(&root).unwrap();
        assert!(root.is_dir());

        std::fs::write(root.join("lobby.jsonl"), "").unwrap();
        std::fs::write(root.join("general.jsonl"), "").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        std::fs::write(root.join("bad name.jsonl"), "").unwrap();
        std::fs::create_dir(root.join("subdir")).unwrap();

        let mut rooms: Vec<String> = directory
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        rooms.sort();
        assert_eq!(rooms, ["general", "lobby"]);
    }

    #[test]
    fn paths_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let directory = RoomDirectory::open(dir.path()).unwrap();
        let room = RoomId::parse("lobby").unwrap();
        let path = directory.path_for(&room);
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(path.file_name().unwrap(), "lobby.jsonl");
    }

    #[test]
    fn open_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "x").unwrap();
        assert!(RoomDirectory::open(&file).is_err());
    }
}
