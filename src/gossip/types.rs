use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Identity of a node in the cluster: its `address:port` string.
///
/// The port is the node's HTTP serving port, so a `NodeId` doubles as the
/// peer address used by the RPC client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn from_parts(address: &str, port: u16) -> Self {
        Self(format!("{}:{}", address, port))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node is currently doing with respect to jobs.
///
/// Mutated by the job runner and election coordinator, read by the gossip
/// service when answering recruitment requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Working,
    Recruiting,
}

/// Shared, lock-free cell holding the live `NodeStatus`.
///
/// The status is read on every recruitment decision and flipped by the job
/// runner, so it lives in an atomic rather than behind the view lock.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: NodeStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> NodeStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => NodeStatus::Idle,
            1 => NodeStatus::Working,
            _ => NodeStatus::Recruiting,
        }
    }

    pub fn set(&self, status: NodeStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

/// A single member of the cluster as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
}

impl Node {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
            status: NodeStatus::Idle,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_parts(&self.address, self.port)
    }
}

/// A node's bounded sample of the cluster.
///
/// `view` holds at most `fanout` peer ids and never contains `owner` itself.
/// `neighborhood` is the reverse-reference map: for each peer it records which
/// owners have that peer in their view. A merge never mutates a `View` in
/// place; the store builds a replacement and swaps it in, so readers that
/// raced the merge keep a consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct View {
    pub owner: NodeId,
    pub view: Vec<NodeId>,
    pub neighborhood: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl View {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            view: Vec::new(),
            neighborhood: BTreeMap::new(),
        }
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.view.iter().any(|p| p == peer)
    }
}

/// One unit of disseminated data.
///
/// Immutable once created; `uuid` is the deduplication key. `hops` counts how
/// many forwards the message has survived and `priority` is carried for
/// callers that want to order their own drains (the core does not act on it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GossipMessage {
    pub uuid: String,
    pub key: String,
    pub value: String,
    pub hops: u32,
    pub priority: u8,
}

impl GossipMessage {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            value: value.to_string(),
            hops: 0,
            priority: 0,
        }
    }

    /// Copy carried one hop further when forwarded to peers.
    pub fn forwarded(&self) -> Self {
        Self {
            hops: self.hops + 1,
            ..self.clone()
        }
    }
}

/// A stored key/value pair as returned by `getData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}
