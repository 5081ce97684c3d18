//! Heartbeat Scheduler
//!
//! The single consumer of the deferred-action queue. Each tick it blocks on
//! the queue for at most one tick interval and executes at most one action;
//! every `pulse_ticks` ticks it enqueues a full view-exchange round, and on
//! a much slower cadence it persists the node list back to disk. All
//! outbound gossip therefore leaves the node in the order it was enqueued
//! locally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::service::{DeferredAction, GossipService};
use crate::config::NodeList;

/// Node list is persisted every this many ticks.
const SAVE_VIEW_TICKS: u64 = 64;

pub struct HeartbeatScheduler {
    service: Arc<GossipService>,
    tick: Duration,
    pulse_ticks: u64,
    node_list_path: Option<PathBuf>,
}

impl HeartbeatScheduler {
    pub fn new(
        service: Arc<GossipService>,
        tick: Duration,
        pulse_ticks: u64,
        node_list_path: Option<PathBuf>,
    ) -> Self {
        Self {
            service,
            tick,
            pulse_ticks: pulse_ticks.max(1),
            node_list_path,
        }
    }

    /// Spawns the heartbeat loop; runs until the action queue closes.
    pub fn spawn(
        self,
        mut actions_rx: mpsc::UnboundedReceiver<DeferredAction>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "Heartbeat started (tick {:?}, pulse every {} ticks)",
                self.tick,
                self.pulse_ticks
            );

            let mut ticks: u64 = 0;

            loop {
                match tokio::time::timeout(self.tick, actions_rx.recv()).await {
                    Ok(Some(action)) => {
                        self.service.run_action(action).await;
                    }
                    Ok(None) => {
                        tracing::info!("Action queue closed; heartbeat stopping");
                        break;
                    }
                    // Nothing pending this tick.
                    Err(_) => {}
                }

                ticks += 1;

                if ticks % self.pulse_ticks == 0 {
                    self.service.enqueue(DeferredAction::ExchangeViews);
                }

                if ticks % SAVE_VIEW_TICKS == 0 {
                    self.persist_node_list().await;
                }
            }
        })
    }

    async fn persist_node_list(&self) {
        let Some(path) = &self.node_list_path else {
            return;
        };

        let snapshot = self.service.view_snapshot().await;
        let node_list = NodeList::from_view(&snapshot);

        if let Err(e) = node_list.save(path) {
            tracing::warn!("Failed to persist node list to {:?}: {}", path, e);
        } else {
            tracing::debug!("Persisted node list ({} peers)", snapshot.view.len());
        }
    }
}
