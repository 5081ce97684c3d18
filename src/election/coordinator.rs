//! Per-Job Leader Election
//!
//! Drives one election at a time through the coordination service's
//! sequential-election primitive. A candidate creates an ephemeral-sequential
//! ticket under `/work_elections/<job>`; the lowest ticket wins (creation
//! order is the tie-breaker). Resolution runs on a spawned task so callers
//! are never blocked: the winner writes its identity into the signal node
//! `/work_election_signals/<job>` and flips into the leader role, while the
//! losers observe the signal, cancel their candidacy and learn the winner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};

use crate::coordination::client::{
    Coordination, CoordinationError, CreateMode, WatchEvent, with_retry, work_election_path,
    work_election_signal_path,
};
use crate::gossip::types::NodeId;

const TICKET_PREFIX: &str = "candidate-";

/// Waiting candidates re-run the ticket-order check on this cadence. The
/// signal watch alone cannot cover a preceding candidate that dies before
/// ever announcing itself; the poll notices its ticket expiring.
const RESOLVE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("an election is already in progress on this node")]
    AlreadyElecting,

    #[error("operation requires leadership")]
    NotLeader,

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

/// How this node's campaign for one job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionOutcome {
    Leader,
    Follower { leader: NodeId },
}

/// Live candidacy for one job.
#[derive(Debug, Clone)]
pub struct ElectionState {
    pub job_id: String,
    /// Full path of our ephemeral-sequential ticket.
    pub ticket: String,
    pub is_candidate: bool,
}

pub struct ElectionCoordinator {
    node_id: NodeId,
    coordination: Arc<dyn Coordination>,
    /// At most one concurrent election per node.
    state: Mutex<Option<ElectionState>>,
    is_leader: AtomicBool,
    leading: Mutex<Option<String>>,
}

impl ElectionCoordinator {
    pub fn new(node_id: NodeId, coordination: Arc<dyn Coordination>) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            coordination,
            state: Mutex::new(None),
            is_leader: AtomicBool::new(false),
            leading: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Job this node currently leads, if any.
    pub async fn leading_job(&self) -> Option<String> {
        self.leading.lock().await.clone()
    }

    /// Registers a candidacy for `job_id` and resolves it on a spawned task.
    ///
    /// Fails with `AlreadyElecting` while a campaign is unresolved or this
    /// node already leads a job. The returned receiver yields the outcome
    /// exactly once.
    pub async fn start_election(
        self: &Arc<Self>,
        job_id: &str,
    ) -> Result<oneshot::Receiver<ElectionOutcome>, ElectionError> {
        let mut state = self.state.lock().await;
        if state.is_some() || self.is_leader() {
            return Err(ElectionError::AlreadyElecting);
        }

        let election_path = work_election_path(job_id);
        self.ensure_persistent(&election_path).await?;

        let ticket_prefix = format!("{}/{}", election_path, TICKET_PREFIX);
        let coordination = self.coordination.clone();
        let node = self.node_id.0.clone();
        let ticket = with_retry(|| {
            coordination.create(&ticket_prefix, &node, CreateMode::EphemeralSequential)
        })
        .await?;

        tracing::info!("Registered election ticket {} for job {}", ticket, job_id);

        *state = Some(ElectionState {
            job_id: job_id.to_string(),
            ticket: ticket.clone(),
            is_candidate: true,
        });
        drop(state);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let coordinator = self.clone();
        let job = job_id.to_string();
        tokio::spawn(async move {
            match coordinator.resolve(&job, &ticket).await {
                Ok(outcome) => {
                    let _ = outcome_tx.send(outcome);
                }
                Err(e) => {
                    tracing::error!("Election for job {} failed: {}", job, e);
                    coordinator.clear_candidacy().await;
                }
            }
        });

        Ok(outcome_rx)
    }

    /// Withdraws the current candidacy, removing our ticket.
    pub async fn cancel_election(&self) -> Result<(), ElectionError> {
        let state = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        if let Some(state) = state {
            match self.coordination.delete(&state.ticket).await {
                Ok(()) | Err(CoordinationError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            tracing::debug!("Cancelled candidacy for job {}", state.job_id);
        }

        Ok(())
    }

    /// Steps down after the led job completes. The signal node is left in
    /// place; a job that finished does not need a successor.
    pub async fn resign(&self) {
        self.is_leader.store(false, Ordering::SeqCst);
        let mut leading = self.leading.lock().await;
        if let Some(job) = leading.take() {
            tracing::info!("Resigned leadership of job {}", job);
        }
    }

    async fn resolve(&self, job_id: &str, ticket: &str) -> Result<ElectionOutcome, ElectionError> {
        let election_path = work_election_path(job_id);
        let signal_path = work_election_signal_path(job_id);
        let own_ticket_name = ticket
            .rsplit('/')
            .next()
            .unwrap_or(ticket)
            .to_string();

        loop {
            let coordination = self.coordination.clone();
            let mut tickets =
                with_retry(|| coordination.get_children(&election_path)).await?;
            tickets.sort();

            if tickets.first().map(String::as_str) == Some(own_ticket_name.as_str()) {
                self.set_leader(job_id, &signal_path).await?;
                return Ok(ElectionOutcome::Leader);
            }

            // Another ticket precedes ours; wait for the winner to announce
            // itself on the signal node, then withdraw.
            let mut watch = self.coordination.watch(&signal_path).await?;

            // The signal may already be populated by the time the watch is up.
            if let Ok(winner) = self.coordination.get_data(&signal_path).await {
                if !winner.is_empty() && winner != self.node_id.0 {
                    self.cancel_election().await?;
                    return Ok(ElectionOutcome::Follower {
                        leader: NodeId(winner),
                    });
                }
            }

            match tokio::time::timeout(RESOLVE_POLL, watch.recv()).await {
                Ok(Ok(WatchEvent::DataSet { data, .. })) if data != self.node_id.0 => {
                    self.cancel_election().await?;
                    return Ok(ElectionOutcome::Follower {
                        leader: NodeId(data),
                    });
                }
                // Signal removed (leader session died before announcing or a
                // stale signal was cleaned up): re-check the ticket order.
                Ok(Ok(WatchEvent::Deleted { .. })) | Ok(Err(_)) => continue,
                Ok(Ok(WatchEvent::DataSet { .. })) => continue,
                // Poll tick: the preceding ticket may have expired without
                // any signal activity.
                Err(_) => continue,
            }
        }
    }

    /// Winning callback: publish the outcome and flip into the leader role.
    async fn set_leader(&self, job_id: &str, signal_path: &str) -> Result<(), ElectionError> {
        self.ensure_persistent(signal_path).await?;
        let coordination = self.coordination.clone();
        let node = self.node_id.0.clone();
        with_retry(|| coordination.set_data(signal_path, &node)).await?;

        self.is_leader.store(true, Ordering::SeqCst);
        *self.leading.lock().await = Some(job_id.to_string());
        self.clear_candidacy().await;

        tracing::info!("Node {} won election for job {}", self.node_id, job_id);
        Ok(())
    }

    async fn clear_candidacy(&self) {
        self.state.lock().await.take();
    }

    async fn ensure_persistent(&self, path: &str) -> Result<(), ElectionError> {
        let coordination = self.coordination.clone();
        match with_retry(|| coordination.create(path, "", CreateMode::Persistent)).await {
            Ok(_) | Err(CoordinationError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current leader of a job as recorded on its signal node.
    pub async fn leader_of(&self, job_id: &str) -> Option<NodeId> {
        let signal_path = work_election_signal_path(job_id);
        match self.coordination.get_data(&signal_path).await {
            Ok(data) if !data.is_empty() => Some(NodeId(data)),
            _ => None,
        }
    }
}
