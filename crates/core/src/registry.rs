//! Stream key → running session map

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::launcher::SessionHandle;

/// In-memory registry of the current session for each stream key
///
/// Holds at most one handle per key. Callers that replace a handle are
/// expected to have stopped the previous one first.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handle for a key
    pub async fn get(&self, stream_key: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(stream_key).cloned()
    }

    /// Register a handle, returning whatever it replaced
    pub async fn set(&self, stream_key: &str, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        self.sessions
            .write()
            .await
            .insert(stream_key.to_string(), handle)
    }

    pub async fn remove(&self, stream_key: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(stream_key)
    }

    /// Snapshot of all registered handles
    pub async fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::launcher::{Launcher, TranscodeMode, TranscodeRequest};
    use std::time::Duration;

    fn spawn_idle(temp: &tempfile::TempDir, key: &str) -> Arc<SessionHandle> {
        let script = temp.path().join(format!("{}.sh", key));
        if !script.exists() {
            std::fs::write(&script, "#!/bin/sh\n[ \"$1\" = --probe ] && exit 0\nexec sleep 30\n").unwrap();
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            // Retry while a concurrently forked child still holds the write fd
            for _ in 0..100 {
                match std::process::Command::new(&script).arg("--probe").status() {
                    Err(e) if e.raw_os_error() == Some(nix::libc::ETXTBSY) => {
                        std::thread::sleep(Duration::from_millis(10))
                    }
                    _ => break,
                }
            }
        }
        let launcher = Launcher::new(script.to_string_lossy().into_owned());
        let request = TranscodeRequest::new("rtsp://a", temp.path(), TranscodeMode::Copy);
        Arc::new(launcher.launch(&request, key).unwrap())
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = SessionRegistry::new();
        assert!(registry.get("cam1").await.is_none());
        assert!(registry.remove("cam1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let handle = spawn_idle(&temp, "cam1");

        assert!(registry.set("cam1", handle.clone()).await.is_none());
        assert_eq!(registry.get("cam1").await.unwrap().id(), handle.id());
        assert_eq!(registry.keys().await, vec!["cam1".to_string()]);

        let removed = registry.remove("cam1").await.unwrap();
        assert_eq!(removed.id(), handle.id());
        assert!(registry.get("cam1").await.is_none());

        removed.terminate(Duration::from_secs(2)).await;
        assert!(!removed.is_alive());
    }

    #[tokio::test]
    async fn test_set_returns_replaced_handle() {
        let temp = tempfile::TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let first = spawn_idle(&temp, "cam1");
        let second = spawn_idle(&temp, "cam1");

        registry.set("cam1", first.clone()).await;
        let replaced = registry.set("cam1", second.clone()).await.unwrap();

        assert_eq!(replaced.id(), first.id());
        assert_eq!(registry.len().await, 1);

        first.terminate(Duration::from_secs(2)).await;
        second.terminate(Duration::from_secs(2)).await;
    }
}
