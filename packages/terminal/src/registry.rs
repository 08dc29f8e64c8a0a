// ABOUTME: Table of live terminal sessions keyed by container id
// ABOUTME: Guarantees at most one interactive session per container

use codebox_sandbox::ExecHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Registry entry for one live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub container_id: String,
    pub exec: ExecHandle,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn new(container_id: impl Into<String>, exec: ExecHandle) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            container_id: container_id.into(),
            exec,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ask the owning bridge to tear the session down
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    pub fn is_terminating(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        // Entries stay consistent even if a holder panicked
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert the session unless its container already has one
    pub fn try_register(&self, handle: SessionHandle) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(&handle.container_id) {
            return false;
        }
        debug!(
            "Registered session {} for container {}",
            handle.session_id, handle.container_id
        );
        sessions.insert(handle.container_id.clone(), handle);
        true
    }

    pub fn lookup(&self, container_id: &str) -> Option<SessionHandle> {
        self.lock().get(container_id).cloned()
    }

    pub fn remove(&self, container_id: &str) -> Option<SessionHandle> {
        self.lock().remove(container_id)
    }

    /// Remove the entry only if it still belongs to `session_id`
    pub fn release(&self, container_id: &str, session_id: Uuid) -> bool {
        let mut sessions = self.lock();
        match sessions.get(container_id) {
            Some(handle) if handle.session_id == session_id => {
                sessions.remove(container_id);
                debug!(
                    "Released session {} for container {}",
                    session_id, container_id
                );
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.lock().contains_key(container_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Signal every live session to shut down
    pub fn terminate_all(&self) {
        for handle in self.lock().values() {
            handle.terminate();
        }
    }
}

/// Releases a registry entry when dropped
pub(crate) struct RegistrationGuard {
    registry: Arc<SessionRegistry>,
    container_id: String,
    session_id: Uuid,
}

impl RegistrationGuard {
    pub(crate) fn new(registry: Arc<SessionRegistry>, handle: &SessionHandle) -> Self {
        Self {
            registry,
            container_id: handle.container_id.clone(),
            session_id: handle.session_id,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.release(&self.container_id, self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn handle(container_id: &str) -> SessionHandle {
        SessionHandle::new(
            container_id,
            ExecHandle {
                id: format!("exec-{}", container_id),
                container_id: container_id.to_string(),
            },
        )
    }

    #[test]
    fn test_try_register_rejects_duplicate() {
        let registry = SessionRegistry::new();
        let first = handle("c1");
        let second = handle("c1");

        assert!(registry.try_register(first.clone()));
        assert!(!registry.try_register(second));

        let stored = registry.lookup("c1").unwrap();
        assert_eq!(stored.session_id, first.session_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_and_lookup() {
        let registry = SessionRegistry::new();
        registry.try_register(handle("c1"));
        registry.try_register(handle("c2"));

        assert!(registry.remove("c1").is_some());
        assert!(registry.remove("c1").is_none());
        assert!(registry.lookup("c1").is_none());
        assert!(registry.contains("c2"));
        assert_eq!(registry.container_ids(), vec!["c2".to_string()]);
    }

    #[test]
    fn test_release_only_removes_own_session() {
        let registry = SessionRegistry::new();
        let original = handle("c1");
        registry.try_register(original.clone());
        registry.remove("c1");

        let replacement = handle("c1");
        registry.try_register(replacement.clone());

        assert!(!registry.release("c1", original.session_id));
        assert!(registry.contains("c1"));
        assert!(registry.release("c1", replacement.session_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let session = handle("c1");
        registry.try_register(session.clone());

        {
            let _guard = RegistrationGuard::new(registry.clone(), &session);
        }

        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminate_all_cancels_sessions() {
        let registry = SessionRegistry::new();
        let a = handle("a");
        let b = handle("b");
        registry.try_register(a.clone());
        registry.try_register(b.clone());

        registry.terminate_all();

        assert!(a.is_terminating());
        assert!(b.is_terminating());
    }

    #[test]
    fn test_concurrent_registration_has_single_winner() {
        let registry = Arc::new(SessionRegistry::new());

        let winners: usize = (0..16)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.try_register(handle("shared")))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
