/// Durable resume cursor: timestamp of the newest sample already downloaded
use async_trait::async_trait;
use log::warn;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last persisted cursor, or None if there is none or it can't be read
    async fn read(&self) -> Option<i64>;

    async fn write(&self, ms: i64) -> Result<(), StoreError>;
}

/// Cursor kept as a decimal integer in a small text file
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Per-gadget cursor file inside `state_dir`
    pub fn for_gadget(state_dir: &Path, address: &str) -> Self {
        let name = format!("cursor_{}.txt", address.replace(':', "").to_uppercase());
        Self::new(state_dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<i64>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| StoreError::Parse(text.to_string()))
    }

    /// Write to a sibling temp file, sync, then rename over the cursor
    fn store(&self, ms: i64) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            writeln!(file, "{}", ms)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

// fsync and rename block, so the file work runs on the blocking pool
#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self) -> Option<i64> {
        let store = self.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(StoreError::from)
            .and_then(|loaded| loaded);
        match loaded {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Ignoring unreadable cursor {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    async fn write(&self, ms: i64) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.store(ms)).await?
    }
}

/// In-memory cursor for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: std::sync::Mutex<Option<i64>>,
}

#[cfg(test)]
impl MemoryCursorStore {
    pub fn with_value(ms: i64) -> Self {
        Self {
            value: std::sync::Mutex::new(Some(ms)),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self) -> Option<i64> {
        *self.value.lock().unwrap()
    }

    async fn write(&self, ms: i64) -> Result<(), StoreError> {
        *self.value.lock().unwrap() = Some(ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.txt"));
        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn value_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");

        FileCursorStore::new(&path).write(1_699_999_879_500).await.unwrap();
        assert_eq!(FileCursorStore::new(&path).read().await, Some(1_699_999_879_500));

        FileCursorStore::new(&path).write(-42).await.unwrap();
        assert_eq!(FileCursorStore::new(&path).read().await, Some(-42));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn garbage_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.txt");
        fs::write(&path, "17000000\0\0garbage").unwrap();
        assert_eq!(FileCursorStore::new(&path).read().await, None);

        fs::write(&path, "").unwrap();
        assert_eq!(FileCursorStore::new(&path).read().await, None);
    }

    #[tokio::test]
    async fn write_creates_state_dir() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::for_gadget(&dir.path().join("state"), "da:f0:63:93:be:97");
        store.write(5).await.unwrap();
        assert!(store.path().ends_with("state/cursor_DAF06393BE97.txt"));
        assert_eq!(store.read().await, Some(5));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_store_works_on_single_threaded_runtime() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.txt"));
        store.write(1_700_000_000_000).await.unwrap();
        assert_eq!(store.read().await, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn write_into_unwritable_location_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();
        let store = FileCursorStore::new(blocker.join("cursor.txt"));
        assert!(matches!(store.write(1).await, Err(StoreError::Io(_))));
        assert_eq!(store.read().await, None);
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryCursorStore::default();
        assert_eq!(store.read().await, None);
        store.write(1_700_000_000_000).await.unwrap();
        assert_eq!(store.read().await, Some(1_700_000_000_000));
        assert_eq!(MemoryCursorStore::with_value(3).read().await, Some(3));
    }
}
