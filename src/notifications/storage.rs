//! Local key-value persistence for client state snapshots

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Backend for persisting one serialized snapshot.
pub trait StateStore {
    /// Raw snapshot, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<String>>;
    fn save(&mut self, contents: &str) -> Result<()>;
}

/// Snapshot stored as `<key>.json` in a directory.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf, key: &str) -> Self {
        Self {
            path: dir.join(format!("{}.json", key)),
        }
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn save(&mut self, contents: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create data directory")?;
        }
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory store that records every write.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        inner: Arc<Mutex<(Option<String>, usize)>>,
    }

    impl MemoryStore {
        pub fn with_contents(contents: &str) -> Self {
            let store = Self::default();
            store.inner.lock().unwrap().0 = Some(contents.to_string());
            store
        }

        pub fn contents(&self) -> Option<String> {
            self.inner.lock().unwrap().0.clone()
        }

        pub fn writes(&self) -> usize {
            self.inner.lock().unwrap().1
        }
    }

    impl StateStore for MemoryStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(self.contents())
        }

        fn save(&mut self, contents: &str) -> Result<()> {
            let mut guard = self.inner.lock().unwrap();
            guard.0 = Some(contents.to_string());
            guard.1 += 1;
            Ok(())
        }
    }
}
