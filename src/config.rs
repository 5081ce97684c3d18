//! Node Configuration
//!
//! Two files drive a node: the settings file (address, fanout, cadences,
//! queue depths) and the node-list file holding the last persisted view and
//! neighborhood. The node list is loaded at startup to seed the view and
//! written back periodically by the heartbeat scheduler.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::gossip::types::{NodeId, View};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub address: String,
    pub port: u16,

    /// Max peers kept in the view / contacted per dissemination.
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Heartbeat tick in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// A view exchange fires every this many ticks.
    #[serde(default = "default_pulse_ticks")]
    pub pulse_ticks: u64,

    /// Capacity of a worker's bounded task queue.
    #[serde(default = "default_task_queue_depth")]
    pub task_queue_depth: usize,

    /// Bound on how long a worker subprocess may take to answer one line.
    #[serde(default = "default_worker_reply_timeout_ms")]
    pub worker_reply_timeout_ms: u64,

    #[serde(default = "default_bloom_capacity")]
    pub bloom_capacity: usize,

    #[serde(default = "default_bloom_error_rate")]
    pub bloom_error_rate: f64,

    /// Where the view/neighborhood snapshot is persisted.
    #[serde(default)]
    pub node_list_path: Option<String>,
}

fn default_fanout() -> usize {
    4
}

fn default_tick_ms() -> u64 {
    500
}

fn default_pulse_ticks() -> u64 {
    7
}

fn default_task_queue_depth() -> usize {
    64
}

fn default_worker_reply_timeout_ms() -> u64 {
    5_000
}

fn default_bloom_capacity() -> usize {
    1_000_000
}

fn default_bloom_error_rate() -> f64 {
    0.0001
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 33000,
            fanout: default_fanout(),
            tick_ms: default_tick_ms(),
            pulse_ticks: default_pulse_ticks(),
            task_queue_depth: default_task_queue_depth(),
            worker_reply_timeout_ms: default_worker_reply_timeout_ms(),
            bloom_capacity: default_bloom_capacity(),
            bloom_error_rate: default_bloom_error_rate(),
            node_list_path: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing settings file {:?}", path))
    }
}

/// On-disk form of the view and neighborhood.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeList {
    #[serde(default)]
    pub view: Vec<NodeId>,
    #[serde(default)]
    pub neighborhood: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl NodeList {
    /// Loads the node list; a missing file yields an empty list so a fresh
    /// node can start without one.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading node list {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing node list {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("writing node list {:?}", path))
    }

    pub fn into_view(self, owner: NodeId) -> View {
        View {
            owner,
            view: self.view,
            neighborhood: self.neighborhood,
        }
    }

    pub fn from_view(view: &View) -> Self {
        Self {
            view: view.view.clone(),
            neighborhood: view.neighborhood.clone(),
        }
    }
}
