//! In-Process Coordination Service
//!
//! A hierarchical namespace living in `DashMap`s, shared by every session
//! created from the same `MemoryCoordination`. It implements the pieces of
//! the contract the core relies on: persistent and ephemeral nodes,
//! ephemeral-sequential suffixes, child listing and data/delete watches.
//! Ephemeral nodes are bound to the creating session and removed when that
//! session is closed (or dropped), firing `Deleted` events at watchers —
//! which is what drives leader-loss re-election in tests.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::client::{Coordination, CoordinationError, CreateMode, WatchEvent};
use async_trait::async_trait;

const WATCH_CHANNEL_CAPACITY: usize = 64;

struct Entry {
    data: String,
    /// Session that owns this node, if ephemeral.
    owner: Option<u64>,
}

struct Namespace {
    entries: DashMap<String, Entry>,
    /// Next suffix per sequential parent path.
    counters: DashMap<String, u64>,
    watchers: DashMap<String, broadcast::Sender<WatchEvent>>,
}

impl Namespace {
    fn notify(&self, path: &str, event: WatchEvent) {
        if let Some(sender) = self.watchers.get(path) {
            // Nobody listening is fine.
            let _ = sender.send(event);
        }
    }

    fn remove_path(&self, path: &str) {
        if self.entries.remove(path).is_some() {
            self.notify(
                path,
                WatchEvent::Deleted {
                    path: path.to_string(),
                },
            );
        }
    }

    fn remove_session(&self, session_id: u64) {
        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().owner == Some(session_id))
            .map(|entry| entry.key().clone())
            .collect();

        for path in owned {
            self.remove_path(&path);
        }
    }
}

/// Factory for sessions over one shared namespace.
pub struct MemoryCoordination {
    namespace: Arc<Namespace>,
    next_session: AtomicU64,
}

impl MemoryCoordination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            namespace: Arc::new(Namespace {
                entries: DashMap::new(),
                counters: DashMap::new(),
                watchers: DashMap::new(),
            }),
            next_session: AtomicU64::new(1),
        })
    }

    /// Opens a session. Ephemeral nodes created through it disappear when the
    /// returned handle is closed or dropped.
    pub fn session(&self) -> Arc<MemorySession> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemorySession {
            id,
            namespace: self.namespace.clone(),
            closed: Mutex::new(false),
        })
    }
}

pub struct MemorySession {
    id: u64,
    namespace: Arc<Namespace>,
    closed: Mutex<bool>,
}

impl MemorySession {
    /// Ends the session, expiring its ephemeral nodes.
    pub fn close(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if !*closed {
            *closed = true;
            self.namespace.remove_session(self.id);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Coordination for MemorySession {
    async fn create(
        &self,
        path: &str,
        data: &str,
        mode: CreateMode,
    ) -> Result<String, CoordinationError> {
        let (final_path, owner) = match mode {
            CreateMode::Persistent => (path.to_string(), None),
            CreateMode::Ephemeral => (path.to_string(), Some(self.id)),
            CreateMode::EphemeralSequential => {
                let mut counter = self
                    .namespace
                    .counters
                    .entry(path.to_string())
                    .or_insert(0);
                let suffix = *counter;
                *counter += 1;
                (format!("{}{:010}", path, suffix), Some(self.id))
            }
        };

        if self.namespace.entries.contains_key(&final_path) {
            return Err(CoordinationError::AlreadyExists(final_path));
        }

        self.namespace.entries.insert(
            final_path.clone(),
            Entry {
                data: data.to_string(),
                owner,
            },
        );

        if !data.is_empty() {
            self.namespace.notify(
                &final_path,
                WatchEvent::DataSet {
                    path: final_path.clone(),
                    data: data.to_string(),
                },
            );
        }

        Ok(final_path)
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(self.namespace.entries.contains_key(path))
    }

    async fn get_data(&self, path: &str) -> Result<String, CoordinationError> {
        self.namespace
            .entries
            .get(path)
            .map(|entry| entry.value().data.clone())
            .ok_or_else(|| CoordinationError::NotFound(path.to_string()))
    }

    async fn set_data(&self, path: &str, data: &str) -> Result<(), CoordinationError> {
        let mut entry = self
            .namespace
            .entries
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NotFound(path.to_string()))?;
        entry.value_mut().data = data.to_string();
        drop(entry);

        self.namespace.notify(
            path,
            WatchEvent::DataSet {
                path: path.to_string(),
                data: data.to_string(),
            },
        );

        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));

        let children = self
            .namespace
            .entries
            .iter()
            .filter_map(|entry| {
                let key = entry.key();
                let rest = key.strip_prefix(&prefix)?;
                // Direct children only.
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();

        Ok(children)
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        if !self.namespace.entries.contains_key(path) {
            return Err(CoordinationError::NotFound(path.to_string()));
        }
        self.namespace.remove_path(path);
        Ok(())
    }

    async fn watch(
        &self,
        path: &str,
    ) -> Result<broadcast::Receiver<WatchEvent>, CoordinationError> {
        let sender = self
            .namespace
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }
}
