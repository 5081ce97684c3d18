//! Gossip Service
//!
//! The node's public surface: merges incoming views, stores and forwards
//! disseminated key/value messages, and fans recruitment out to the view.
//! Outbound work (forwarding, recruitment, view exchange, view announcement)
//! is never executed inline; it is enqueued as a deferred action that the
//! heartbeat scheduler drains one per tick, so peers observe our calls in
//! local enqueue order.
//!
//! ## Peer failure policy
//! Per-peer RPC failures are non-fatal: the round continues with the
//! remaining peers. A peer that keeps failing is parked in a bad-peers set
//! and only retried on a slower cadence instead of every round; a single
//! success rehabilitates it.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::dedup::ApproximateSet;
use super::types::{GossipMessage, KeyValue, Node, NodeId, StatusCell, View};
use super::view::ViewStore;
use crate::coordination::client::{Coordination, CreateMode, node_path, node_view_path};
use crate::job::types::Job;
use crate::rpc::PeerClient;

/// Consecutive failures after which a peer is parked.
const BAD_PEER_THRESHOLD: u32 = 3;
/// Parked peers are retried every this many exchange rounds.
const BAD_PEER_RETRY_ROUNDS: u64 = 4;

/// Outbound work executed by the heartbeat scheduler, one item per tick.
#[derive(Debug, Clone)]
pub enum DeferredAction {
    /// Fan a disseminated message out to the view.
    Forward(GossipMessage),
    /// Fan a recruitment request out to the view.
    Recruit(Job),
    /// Push our view to every peer in it.
    ExchangeViews,
    /// Greet the peers in our view and ask to be registered in their
    /// coordination-side view lists.
    AnnounceView,
}

pub struct GossipService {
    local: Node,
    status: Arc<StatusCell>,
    views: ViewStore,
    seen: Box<dyn ApproximateSet>,
    storage: DashMap<String, String>,
    actions_tx: mpsc::UnboundedSender<DeferredAction>,
    client: PeerClient,
    coordination: Arc<dyn Coordination>,
    bad_peers: DashMap<NodeId, u32>,
    exchange_rounds: AtomicU64,
}

impl GossipService {
    /// Builds the service plus the receiving end of its action queue, which
    /// the caller hands to the heartbeat scheduler.
    pub fn new(
        local: Node,
        status: Arc<StatusCell>,
        initial_view: View,
        fanout: usize,
        seen: Box<dyn ApproximateSet>,
        coordination: Arc<dyn Coordination>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DeferredAction>) {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();

        let service = Arc::new(Self {
            local,
            status,
            views: ViewStore::new(initial_view, fanout),
            seen,
            storage: DashMap::new(),
            actions_tx,
            client: PeerClient::new(),
            coordination,
            bad_peers: DashMap::new(),
            exchange_rounds: AtomicU64::new(0),
        });

        (service, actions_rx)
    }

    pub fn local_id(&self) -> NodeId {
        self.local.id()
    }

    /// Snapshot of the local node with its live status.
    pub fn local_node(&self) -> Node {
        Node {
            status: self.status.get(),
            ..self.local.clone()
        }
    }

    pub async fn view_snapshot(&self) -> Arc<View> {
        self.views.snapshot().await
    }

    /// Registers the liveness marker `/nodes/<id>` for this node.
    pub async fn register_liveness(&self) -> anyhow::Result<()> {
        let path = node_path(&self.local_id().0);
        match self
            .coordination
            .create(&path, "", CreateMode::Ephemeral)
            .await
        {
            Ok(_) => Ok(()),
            Err(crate::coordination::client::CoordinationError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Accepts a disseminated message. Returns `true` when the message was
    /// new: its value is stored, the uuid remembered and a forward enqueued.
    /// Re-delivery of a seen uuid is a no-op, so the operation is idempotent.
    pub fn disseminate(&self, message: &GossipMessage) -> bool {
        if self.seen.contains(&message.uuid) {
            tracing::debug!("Dropping already-seen message {}", message.uuid);
            return false;
        }

        tracing::info!(
            "Disseminating {} => {} (uuid {}, hops {})",
            message.key,
            message.value,
            message.uuid,
            message.hops
        );

        // Last forward wins on storage; no cross-key ordering.
        self.storage
            .insert(message.key.clone(), message.value.clone());
        self.seen.insert(&message.uuid);
        self.enqueue(DeferredAction::Forward(message.clone()));

        true
    }

    /// Merges a peer's view, returning our pre-merge snapshot.
    pub async fn merge_view(&self, remote: &View) -> Arc<View> {
        tracing::debug!(
            "Merging view from {} ({} peers)",
            remote.owner,
            remote.view.len()
        );
        self.views.merge(remote).await
    }

    pub fn get_data(&self) -> Vec<KeyValue> {
        self.storage
            .iter()
            .map(|entry| KeyValue {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect()
    }

    /// Peer announced that we are in its view: record the reverse reference
    /// and mirror it into the coordination namespace so the reference dies
    /// with us.
    pub async fn peer_added_us(&self, peer: &Node) -> anyhow::Result<()> {
        let peer_id = peer.id();
        tracing::debug!("Registered in the view of {}", peer_id);

        let mut remote = View::new(peer_id.clone());
        remote.view.push(self.local_id());
        self.views.merge(&remote).await;

        let path = node_view_path(&peer_id.0, &self.local_id().0);
        match self
            .coordination
            .create(&path, "", CreateMode::Ephemeral)
            .await
        {
            Ok(_) => Ok(()),
            Err(crate::coordination::client::CoordinationError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn enqueue(&self, action: DeferredAction) {
        // The receiver only goes away on shutdown.
        if self.actions_tx.send(action).is_err() {
            tracing::warn!("Action queue closed; dropping deferred action");
        }
    }

    /// Executes one deferred action. Called from the heartbeat scheduler.
    pub async fn run_action(&self, action: DeferredAction) {
        match action {
            DeferredAction::Forward(message) => self.forward(&message).await,
            DeferredAction::Recruit(job) => self.recruit_peers(&job).await,
            DeferredAction::ExchangeViews => self.exchange_views().await,
            DeferredAction::AnnounceView => self.announce_view().await,
        }
    }

    async fn forward(&self, message: &GossipMessage) {
        let outgoing = message.forwarded();

        for peer in self.eligible_peers().await {
            match self.client.disseminate(&peer, &outgoing).await {
                Ok(()) => self.mark_peer_success(&peer),
                Err(e) => {
                    tracing::warn!("Failed to forward {} to {}: {}", outgoing.uuid, peer, e);
                    self.mark_peer_failure(&peer);
                }
            }
        }

        tracing::debug!("Done forwarding {}", outgoing.uuid);
    }

    async fn recruit_peers(&self, job: &Job) {
        let request = crate::job::protocol::RecruitRequest {
            job: job.clone(),
            recruiter: self.local_id(),
        };

        for peer in self.eligible_peers().await {
            match self.client.recruit(&peer, &request).await {
                Ok(response) => {
                    self.mark_peer_success(&peer);
                    tracing::info!(
                        "Recruitment of {} for job {}: accepted={}",
                        peer,
                        job.job_id,
                        response.accepted
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to recruit {} for job {}: {}", peer, job.job_id, e);
                    self.mark_peer_failure(&peer);
                }
            }
        }
    }

    /// One anti-entropy round: push our view to every peer in it. Failures
    /// are transient by assumption and only feed the bad-peer counter.
    async fn exchange_views(&self) {
        self.exchange_rounds.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.views.snapshot().await;

        for peer in self.eligible_peers().await {
            match self.client.exchange_view(&peer, &snapshot).await {
                Ok(remote_pre_merge) => {
                    self.mark_peer_success(&peer);
                    tracing::debug!(
                        "Exchanged views with {} (peer had {} entries)",
                        peer,
                        remote_pre_merge.view.len()
                    );
                }
                Err(e) => {
                    tracing::debug!("View exchange with {} failed: {}", peer, e);
                    self.mark_peer_failure(&peer);
                }
            }
        }
    }

    async fn announce_view(&self) {
        let node = self.local_node();

        for peer in self.eligible_peers().await {
            if let Err(e) = self.client.hello(&peer).await {
                tracing::debug!("hello to {} failed: {}", peer, e);
                self.mark_peer_failure(&peer);
                continue;
            }
            match self.client.added_to_view(&peer, &node).await {
                Ok(()) => self.mark_peer_success(&peer),
                Err(e) => {
                    tracing::warn!("added_to_view to {} failed: {}", peer, e);
                    self.mark_peer_failure(&peer);
                }
            }
        }
    }

    /// View peers minus parked bad peers, except on retry rounds when the
    /// parked ones get another chance.
    async fn eligible_peers(&self) -> Vec<NodeId> {
        let snapshot = self.views.snapshot().await;
        let rounds = self.exchange_rounds.load(Ordering::SeqCst);
        let retry_round = rounds % BAD_PEER_RETRY_ROUNDS == 0;

        snapshot
            .view
            .iter()
            .filter(|peer| {
                let parked = self
                    .bad_peers
                    .get(*peer)
                    .map(|failures| *failures >= BAD_PEER_THRESHOLD)
                    .unwrap_or(false);
                !parked || retry_round
            })
            .cloned()
            .collect()
    }

    fn mark_peer_failure(&self, peer: &NodeId) {
        let mut failures = self.bad_peers.entry(peer.clone()).or_insert(0);
        *failures += 1;
        if *failures == BAD_PEER_THRESHOLD {
            tracing::warn!("Peer {} marked bad after {} failures", peer, *failures);
        }
    }

    fn mark_peer_success(&self, peer: &NodeId) {
        self.bad_peers.remove(peer);
    }

    #[cfg(test)]
    pub fn is_peer_bad(&self, peer: &NodeId) -> bool {
        self.bad_peers
            .get(peer)
            .map(|failures| *failures >= BAD_PEER_THRESHOLD)
            .unwrap_or(false)
    }
}
