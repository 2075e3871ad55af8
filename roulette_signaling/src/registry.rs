//! Registry of open connections, keyed by peer id

use crate::connection::ConnectionHandle;
use crate::matchmaking::Presence;
use dashmap::DashMap;
use roulette_protocol::PeerId;
use std::sync::Arc;

/// Concurrent map of every registered connection
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<PeerId, Arc<ConnectionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its id, returning any handle it replaced.
    pub fn add(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        self.sessions.insert(handle.id(), handle)
    }

    /// Unregister a connection.
    pub fn remove(&self, id: &PeerId) -> Option<Arc<ConnectionHandle>> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    /// Look up a connection.
    pub fn lookup(&self, id: &PeerId) -> Option<Arc<ConnectionHandle>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered connections. Eventually consistent under
    /// concurrent mutation.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of registered ids.
    pub fn ids(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }
}

impl Presence for SessionRegistry {
    fn is_live(&self, id: &PeerId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|entry| entry.value().is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelSink;
    use tokio::sync::mpsc;

    fn handle() -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(ConnectionHandle::new(ChannelSink(tx)))
    }

    #[test]
    fn add_lookup_remove() {
        let registry = SessionRegistry::new();
        let conn = handle();
        let id = conn.id();

        assert!(registry.add(Arc::clone(&conn)).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&id).map(|h| h.id()), Some(id));

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn closed_connection_is_not_live() {
        let registry = SessionRegistry::new();
        let conn = handle();
        let id = conn.id();
        registry.add(Arc::clone(&conn));

        assert!(registry.is_live(&id));
        conn.mark_closed();
        assert!(!registry.is_live(&id));
        assert!(!registry.is_live(&PeerId::new()));
    }

    #[test]
    fn concurrent_add_remove_keeps_count() {
        let registry = Arc::new(SessionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let mut kept = Vec::new();
                    for i in 0..200 {
                        let conn = handle();
                        let id = conn.id();
                        registry.add(conn);
                        if i % 2 == 0 {
                            registry.remove(&id);
                        } else {
                            kept.push(id);
                        }
                    }
                    kept.len()
                })
            })
            .collect();

        let kept: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(registry.len(), kept);
        assert_eq!(registry.ids().len(), kept);
    }
}
