//! Durable per-thread checkpoints of [`ConversationState`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::state::ConversationState;

/// Errors reported by checkpoint stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another writer committed a newer state for this thread
    #[error("Version conflict on thread '{thread_id}': stored {stored}, attempted {attempted}")]
    Conflict {
        thread_id: String,
        stored: u64,
        attempted: u64,
    },
}

/// Key-value persistence for conversation state, keyed by thread id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a thread's state; `None` if it has never been saved
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, StoreError>;

    /// Persist a state under its own thread id.
    ///
    /// Implementations reject a state that is not newer than the stored one
    /// (unless it is identical) with [`StoreError::Conflict`].
    async fn save(&self, state: &ConversationState) -> Result<(), StoreError>;

    /// Delete a thread's checkpoint; returns whether one existed
    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError>;

    /// Delete every checkpoint; returns how many threads were removed
    async fn delete_all(&self) -> Result<usize, StoreError>;
}

fn check_version(
    stored: &ConversationState,
    incoming: &ConversationState,
) -> Result<(), StoreError> {
    if incoming.version > stored.version || incoming == stored {
        return Ok(());
    }
    Err(StoreError::Conflict {
        thread_id: incoming.thread_id().to_string(),
        stored: stored.version,
        attempted: incoming.version,
    })
}

/// Process-local store
#[derive(Clone, Default)]
pub struct InMemoryStore {
    states: Arc<Mutex<HashMap<String, ConversationState>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored threads
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.states.lock().get(thread_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let mut states = self.states.lock();
        if let Some(stored) = states.get(state.thread_id()) {
            check_version(stored, state)?;
        }
        states.insert(state.thread_id().to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self.states.lock().remove(thread_id).is_some())
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut states = self.states.lock();
        let count = states.len();
        states.clear();
        Ok(count)
    }
}

/// One JSON document per thread under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a thread's checkpoint. Any thread id maps to a safe file name.
    pub fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(thread_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<ConversationState>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Longest thread id, in bytes, stored under its plain hex encoding
const MAX_HEX_ID_BYTES: usize = 80;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// File stem for a thread. Short ids are hex-encoded. Longer ids keep a hex
/// prefix plus a name-based UUID of the whole id, so the stem (and its temp
/// file name) stays well under the 255-byte file name limit.
fn file_stem(thread_id: &str) -> String {
    let bytes = thread_id.as_bytes();
    if bytes.len() <= MAX_HEX_ID_BYTES {
        return hex_encode(bytes);
    }
    let digest = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, bytes);
    format!("{}-{}", hex_encode(&bytes[..32]), digest.simple())
}

/// Temp files left behind by an interrupted save
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, StoreError> {
        self.read(&self.path_for(thread_id)).await
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(state.thread_id());

        if let Some(stored) = self.read(&path).await? {
            check_version(&stored, state)?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            file_stem(state.thread_id()),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(
            "Saved thread {} (version {}) to {}",
            state.thread_id(),
            state.version,
            path.display()
        );
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        let mut swept = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_temp_file(&path) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => swept += 1,
                    // A concurrent save may have renamed it already
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            } else if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
                count += 1;
            }
        }
        if swept > 0 {
            tracing::debug!("Removed {} stale temp files from {}", swept, self.dir.display());
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GameEvent;
    use parlor_ai::{Content, Message};

    fn sample_state(thread_id: &str) -> ConversationState {
        let mut state = ConversationState::new(thread_id);
        state.messages.push(Message::user("BOBBY"));
        state.messages.push(Message::assistant_with_content(vec![
            Content::text("You found me."),
            Content::tool_call("c1", "trigger_victory", serde_json::json!({})),
        ]));
        state
            .messages
            .push(Message::tool_result("c1", "trigger_victory", "VICTORY_TRIGGERED", false));
        state.summary = "The player has been guessing.".into();
        state.persona_id = "nicolo".into();
        state.persona_name = "Nicolo".into();
        state.game_event = Some(GameEvent::Victory);
        state.version = 3;
        state
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("parlor-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = InMemoryStore::new();
        let state = sample_state("t1");
        store.save(&state).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), Some(state));
        assert_eq!(store.load("t2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        let state = sample_state("player/42 ünïcode");
        store.save(&state).await.unwrap();
        assert_eq!(store.load(state.thread_id()).await.unwrap(), Some(state.clone()));

        // Identical re-save is accepted
        store.save(&state).await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_load_missing() {
        let store = FileStore::new(temp_dir());
        assert_eq!(store.load("nobody").await.unwrap(), None);
        assert!(!store.delete("nobody").await.unwrap());
        assert_eq!(store.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryStore::new();
        let mut state = sample_state("t");
        store.save(&state).await.unwrap();

        let mut stale = state.clone();
        stale.messages.pop();
        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { stored: 3, attempted: 3, .. }));

        state.version += 1;
        state.messages.push(Message::user("again"));
        store.save(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_stale_version_conflicts() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        let mut state = sample_state("t");
        state.version = 5;
        store.save(&state).await.unwrap();

        let mut older = state.clone();
        older.version = 4;
        assert!(matches!(
            store.save(&older).await,
            Err(StoreError::Conflict { stored: 5, attempted: 4, .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_file_delete_and_delete_all() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        for id in ["a", "b", "c"] {
            store.save(&sample_state(id)).await.unwrap();
        }

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.load("b").await.unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_is_hex_encoded() {
        let store = FileStore::new("/tmp/x");
        assert_eq!(store.path_for("ab/"), PathBuf::from("/tmp/x/61622f.json"));
    }

    #[test]
    fn test_long_ids_get_bounded_distinct_names() {
        let store = FileStore::new("/tmp/x");
        let shared_prefix = "p".repeat(64);
        let a = format!("{}{}", shared_prefix, "a".repeat(200));
        let b = format!("{}{}", shared_prefix, "b".repeat(200));

        let name_a = store.path_for(&a).file_name().unwrap().to_string_lossy().into_owned();
        let name_b = store.path_for(&b).file_name().unwrap().to_string_lossy().into_owned();
        assert_ne!(name_a, name_b);
        // Room left for the ".<stem>.<uuid>.tmp" temp name
        assert!(name_a.len() + 42 < 255, "{} bytes", name_a.len());
        assert_eq!(store.path_for(&a), store.path_for(&a));
    }

    #[tokio::test]
    async fn test_file_long_thread_id_round_trip() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        let long_id = "thread-".repeat(40);
        let state = sample_state(&long_id);

        store.save(&state).await.unwrap();
        assert_eq!(store.load(&long_id).await.unwrap(), Some(state));
        assert!(store.delete(&long_id).await.unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_delete_all_sweeps_stale_temp_files() {
        let dir = temp_dir();
        let store = FileStore::new(&dir);
        store.save(&sample_state("a")).await.unwrap();
        std::fs::write(dir.join(format!(".61.{}.tmp", uuid::Uuid::new_v4())), b"{").unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep me").unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 1);
        let left: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["notes.txt"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
