use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::connection::{Connection, ConnectionId, ConnectionInfo};
use crate::domain::endpoint::Endpoint;

struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    sealed: bool,
}

/// Thread-safe map of live server connections keyed by [`ConnectionId`].
///
/// The accept loop inserts, each connection's closure path removes, and
/// broadcast works on [`snapshot`](ConnectionRegistry::snapshot)s. Once sealed
/// by server shutdown the registry refuses new entries.
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                connections: HashMap::new(),
                sealed: false,
            }),
        }
    }

    /// Register a connection. Returns `false` if the registry is sealed.
    pub fn insert(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        inner.connections.insert(connection.id(), connection);
        true
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.lock().connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.lock().connections.get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().connections.contains_key(&id)
    }

    /// Connections registered right now, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = self.inner.lock().connections.values().cloned().collect();
        connections.sort_by_key(|connection| connection.id());
        connections
    }

    pub fn peers(&self) -> Vec<Endpoint> {
        self.snapshot()
            .iter()
            .map(|connection| connection.peer().clone())
            .collect()
    }

    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.snapshot().iter().map(|connection| connection.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().connections.is_empty()
    }

    /// Refuse further inserts and hand back every registered connection.
    pub fn seal_and_drain(&self) -> Vec<Arc<Connection>> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        let mut drained: Vec<_> = inner.connections.drain().map(|(_, c)| c).collect();
        drained.sort_by_key(|connection| connection.id());
        drained
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
