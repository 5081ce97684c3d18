//! Coordination Service Contract
//!
//! The cluster leans on an external hierarchical coordination service
//! (ZooKeeper-style: persistent/ephemeral nodes, sequential suffixes,
//! watches) for liveness markers, work-group membership and leader election.
//! The core only consumes this contract; `Coordination` is the seam behind
//! which the real client lives. `memory::MemoryCoordination` provides an
//! in-process implementation for tests and single-machine runs.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Contractual namespace paths.
pub const NODES_ROOT: &str = "/nodes";
pub const NODE_VIEWS_ROOT: &str = "/nodes/views";
pub const WORK_GROUPS_ROOT: &str = "/work_groups";
pub const WORK_QUEUES_ROOT: &str = "/work_queues";
pub const WORK_ELECTIONS_ROOT: &str = "/work_elections";
pub const WORK_ELECTION_SIGNALS_ROOT: &str = "/work_election_signals";

pub fn node_path(node_id: &str) -> String {
    format!("{}/{}", NODES_ROOT, node_id)
}

pub fn node_view_path(viewer: &str, member: &str) -> String {
    format!("{}/{}/{}", NODE_VIEWS_ROOT, viewer, member)
}

pub fn work_group_path(group_id: &str) -> String {
    format!("{}/{}", WORK_GROUPS_ROOT, group_id)
}

pub fn work_group_member_path(group_id: &str, node_id: &str) -> String {
    format!("{}/{}/{}", WORK_GROUPS_ROOT, group_id, node_id)
}

pub fn work_queue_path(queue_id: &str) -> String {
    format!("{}/{}", WORK_QUEUES_ROOT, queue_id)
}

pub fn work_election_path(job_id: &str) -> String {
    format!("{}/{}", WORK_ELECTIONS_ROOT, job_id)
}

pub fn work_election_signal_path(job_id: &str) -> String {
    format!("{}/{}", WORK_ELECTION_SIGNALS_ROOT, job_id)
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("coordination node not found: {0}")]
    NotFound(String),

    #[error("coordination node already exists: {0}")]
    AlreadyExists(String),

    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle of a created node.
///
/// Ephemeral nodes are removed by the service when the creating session ends;
/// `EphemeralSequential` additionally appends a monotonically increasing,
/// zero-padded suffix (the election primitive's tie-breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    EphemeralSequential,
}

/// Change notifications delivered to watchers of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    DataSet { path: String, data: String },
    Deleted { path: String },
}

#[async_trait]
pub trait Coordination: Send + Sync {
    /// Creates a node, returning the actual created path (which differs from
    /// the requested one only for `EphemeralSequential`).
    async fn create(
        &self,
        path: &str,
        data: &str,
        mode: CreateMode,
    ) -> Result<String, CoordinationError>;

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    async fn get_data(&self, path: &str) -> Result<String, CoordinationError>;

    async fn set_data(&self, path: &str, data: &str) -> Result<(), CoordinationError>;

    /// Child node names (not full paths), unsorted.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    async fn delete(&self, path: &str) -> Result<(), CoordinationError>;

    /// Subscribes to data/delete events on `path`. The path does not have to
    /// exist yet; creation with data is delivered as `DataSet`.
    async fn watch(&self, path: &str)
        -> Result<broadcast::Receiver<WatchEvent>, CoordinationError>;
}

/// Retries a namespace operation with backoff and jitter, the same shape the
/// peer RPC client uses. Only transient unavailability is retried; logical
/// errors (not found, already exists) surface immediately.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, CoordinationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoordinationError>>,
{
    const ATTEMPTS: usize = 3;
    let mut delay_ms = 100u64;

    for attempt in 0..ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(CoordinationError::Unavailable(reason)) => {
                if attempt + 1 == ATTEMPTS {
                    return Err(CoordinationError::Unavailable(reason));
                }
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
            Err(other) => return Err(other),
        }
    }

    Err(CoordinationError::Unavailable(
        "retry attempts exhausted".to_string(),
    ))
}
