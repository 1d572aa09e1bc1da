//! Preview handles for staged images.
//!
//! A handle is registered when an image is staged and released when the
//! handle is dropped, which happens on removal from the staging list, after
//! the send that consumed it, or when the composer itself goes away.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Registry of live preview handles, shared by every handle it issued.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    live: Arc<Mutex<HashMap<u64, PathBuf>>>,
    next_id: Arc<AtomicU64>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preview for `path`.
    pub fn acquire(&self, path: &Path) -> PreviewHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.live.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(id, path.to_path_buf());
        tracing::debug!("Preview {} acquired for {}", id, path.display());
        PreviewHandle {
            id,
            registry: self.clone(),
        }
    }

    /// Number of previews not yet released.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release(&self, id: u64) {
        let mut guard = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if guard.remove(&id).is_some() {
            tracing::debug!("Preview {} released", id);
        }
    }
}

/// Scoped preview; released on drop.
pub struct PreviewHandle {
    id: u64,
    registry: PreviewRegistry,
}

impl PreviewHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let registry = PreviewRegistry::new();
        let a = registry.acquire(Path::new("a.png"));
        let b = registry.acquire(Path::new("b.png"));
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.live_count(), 2);

        drop(a);
        assert_eq!(registry.live_count(), 1);
        drop(b);
        assert_eq!(registry.live_count(), 0);
    }
}
