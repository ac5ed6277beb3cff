//! Recording persistence.
//!
//! [`FileRecordingStore`] keeps one JSONL file per recording under a
//! directory. Saves go to a temporary sibling first and are renamed into
//! place, so a reader never sees a half-written recording.

use deckhand_core::recording::{decode_jsonl, decode_meta, encode_jsonl};
use deckhand_core::{
    sanitize_recording_id, DeckError, DeckResult, Recording, RecordingEvent, RecordingMeta,
    RecordingSummary,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const EXTENSION: &str = "jsonl";

/// Durable storage for finished recordings.
#[allow(async_fn_in_trait)]
pub trait RecordingStore {
    async fn save(
        &self,
        recording_id: &str,
        meta: &RecordingMeta,
        events: &[RecordingEvent],
    ) -> DeckResult<()>;

    async fn load(&self, recording_id: &str) -> DeckResult<Recording>;

    /// All recordings, newest first.
    async fn list(&self) -> DeckResult<Vec<RecordingSummary>>;

    async fn delete(&self, recording_id: &str) -> DeckResult<()>;
}

/// JSONL files under a directory.
pub struct FileRecordingStore {
    dir: PathBuf,
}

impl FileRecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, recording_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", sanitize_recording_id(recording_id)))
    }
}

impl RecordingStore for FileRecordingStore {
    async fn save(
        &self,
        recording_id: &str,
        meta: &RecordingMeta,
        events: &[RecordingEvent],
    ) -> DeckResult<()> {
        let content = encode_jsonl(meta, events)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(recording_id);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(DeckError::Store(format!(
                "failed to move recording into {}: {e}",
                path.display()
            )));
        }
        info!(
            recording_id,
            events = events.len(),
            path = %path.display(),
            "recording saved"
        );
        Ok(())
    }

    async fn load(&self, recording_id: &str) -> DeckResult<Recording> {
        let id = sanitize_recording_id(recording_id);
        let path = self.path_for(&id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeckError::RecordingNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        let (meta, events) = decode_jsonl(&content)?;
        debug!(recording_id = %id, events = events.len(), "recording loaded");
        Ok(Recording {
            recording_id: id,
            meta,
            events,
        })
    }

    async fn list(&self) -> DeckResult<Vec<RecordingSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(recording_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = match tokio::fs::read_to_string(&path).await {
                Ok(content) => decode_meta(&content),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable recording skipped");
                    continue;
                }
            };
            out.push(RecordingSummary {
                recording_id: recording_id.to_string(),
                meta,
            });
        }
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn delete(&self, recording_id: &str) -> DeckResult<()> {
        let id = sanitize_recording_id(recording_id);
        match tokio::fs::remove_file(self.path_for(&id)).await {
            Ok(()) => {
                info!(recording_id = %id, "recording deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DeckError::RecordingNotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryRecordingStore {
    recordings: Mutex<HashMap<String, Recording>>,
}

impl MemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> DeckResult<std::sync::MutexGuard<'_, HashMap<String, Recording>>> {
        self.recordings
            .lock()
            .map_err(|_| DeckError::Store("recording table poisoned".into()))
    }
}

impl RecordingStore for MemoryRecordingStore {
    async fn save(
        &self,
        recording_id: &str,
        meta: &RecordingMeta,
        events: &[RecordingEvent],
    ) -> DeckResult<()> {
        let id = sanitize_recording_id(recording_id);
        self.locked()?.insert(
            id.clone(),
            Recording {
                recording_id: id,
                meta: Some(meta.clone()),
                events: events.to_vec(),
            },
        );
        Ok(())
    }

    async fn load(&self, recording_id: &str) -> DeckResult<Recording> {
        let id = sanitize_recording_id(recording_id);
        self.locked()?
            .get(&id)
            .cloned()
            .ok_or(DeckError::RecordingNotFound(id))
    }

    async fn list(&self) -> DeckResult<Vec<RecordingSummary>> {
        let mut out: Vec<RecordingSummary> = self
            .locked()?
            .values()
            .map(|r| RecordingSummary {
                recording_id: r.recording_id.clone(),
                meta: r.meta.clone(),
            })
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn delete(&self, recording_id: &str) -> DeckResult<()> {
        let id = sanitize_recording_id(recording_id);
        match self.locked()?.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DeckError::RecordingNotFound(id)),
        }
    }
}

/// Newest `createdAt` first; recordings without meta sort last, by id.
fn sort_newest_first(list: &mut [RecordingSummary]) {
    list.sort_by(|a, b| {
        let ta = a.meta.as_ref().map(|m| m.created_at);
        let tb = b.meta.as_ref().map(|m| m.created_at);
        tb.cmp(&ta).then_with(|| a.recording_id.cmp(&b.recording_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_core::SCHEMA_VERSION;

    fn meta(created_at: u64) -> RecordingMeta {
        RecordingMeta {
            schema_version: SCHEMA_VERSION,
            created_at,
            name: Some("demo".into()),
            project_id: "proj".into(),
            session_persist_id: "abc".into(),
            cwd: Some("/tmp".into()),
            effect_id: Some("codex".into()),
            bootstrap_command: None,
        }
    }

    fn events() -> Vec<RecordingEvent> {
        vec![
            RecordingEvent {
                t: 0,
                data: "ls\r".into(),
            },
            RecordingEvent {
                t: 40,
                data: "exit\r".into(),
            },
        ]
    }

    #[tokio::test]
    async fn file_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path().join("recs"));
        store.save("rec-1", &meta(10), &events()).await.unwrap();

        let loaded = store.load("rec-1").await.unwrap();
        assert_eq!(loaded.recording_id, "rec-1");
        assert_eq!(loaded.meta, Some(meta(10)));
        assert_eq!(loaded.events, events());
        assert!(!dir.path().join("recs/rec-1.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_sanitizes_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path());
        store.save("../escape me", &meta(1), &[]).await.unwrap();
        assert!(dir.path().join("___escape_me.jsonl").exists());
        assert!(store.load("../escape me").await.is_ok());
    }

    #[tokio::test]
    async fn file_store_lists_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path());
        store.save("old", &meta(100), &events()).await.unwrap();
        store.save("new", &meta(200), &events()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("bare.jsonl"), "").unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.recording_id)
            .collect();
        assert_eq!(ids, vec!["new", "old", "bare"]);
    }

    #[tokio::test]
    async fn file_store_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_missing_recording() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path());
        assert!(matches!(
            store.load("ghost").await,
            Err(DeckError::RecordingNotFound(_))
        ));
        assert!(matches!(
            store.delete("ghost").await,
            Err(DeckError::RecordingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordingStore::new(dir.path());
        store.save("gone", &meta(1), &events()).await.unwrap();
        store.delete("gone").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.jsonl"), "{not json}\n").unwrap();
        let store = FileRecordingStore::new(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(DeckError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryRecordingStore::new();
        store.save("a", &meta(1), &events()).await.unwrap();
        store.save("b", &meta(2), &[]).await.unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list[0].recording_id, "b");
        assert_eq!(store.load("a").await.unwrap().events.len(), 2);
        store.delete("a").await.unwrap();
        assert!(store.load("a").await.is_err());
    }
}
