//! Job Orchestration Service
//!
//! Ties the pipeline together: job submission, recruitment over gossip,
//! the per-job election, and routing of the internal dispatch plane to the
//! leader session or the local runner. Submission never blocks on the
//! cluster: the submitting node joins the work group, starts executing
//! locally, fans a recruitment request out through gossip and campaigns for
//! the job's leadership, all fire-and-forget.

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::leader::LeaderSession;
use super::protocol::{DoneRequest, RecruitRequest, ResultRequest, TaskRequest};
use super::runner::JobRunner;
use super::types::{Job, JobError, TaskLine};
use crate::coordination::client::{
    Coordination, CoordinationError, WatchEvent, work_election_signal_path,
};
use crate::election::coordinator::{ElectionCoordinator, ElectionError, ElectionOutcome};
use crate::election::work_group::WorkGroupManager;
use crate::gossip::service::{DeferredAction, GossipService};
use crate::gossip::types::{NodeStatus, StatusCell};
use crate::rpc::TaskTransport;

/// Recruitment acceptance thresholds; a drawn value must exceed the
/// threshold, so a busy node is much harder to pull away than an idle one.
const RECRUIT_THRESHOLD_BUSY: f64 = 0.7;
const RECRUIT_THRESHOLD_IDLE: f64 = 0.3;

/// Followers re-check the leader signal on this cadence so a finished job
/// does not leave a watch task behind.
const LEADER_POLL: Duration = Duration::from_secs(5);

pub struct JobService {
    status: Arc<StatusCell>,
    runner: Arc<JobRunner>,
    election: Arc<ElectionCoordinator>,
    groups: Arc<WorkGroupManager>,
    gossip: Arc<GossipService>,
    coordination: Arc<dyn Coordination>,
    transport: Arc<dyn TaskTransport>,
    leaders: DashMap<String, Arc<LeaderSession>>,
    draw: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl JobService {
    pub fn new(
        status: Arc<StatusCell>,
        runner: Arc<JobRunner>,
        election: Arc<ElectionCoordinator>,
        groups: Arc<WorkGroupManager>,
        gossip: Arc<GossipService>,
        coordination: Arc<dyn Coordination>,
        transport: Arc<dyn TaskTransport>,
    ) -> Arc<Self> {
        Self::with_draw(
            status,
            runner,
            election,
            groups,
            gossip,
            coordination,
            transport,
            Box::new(rand::random::<f64>),
        )
    }

    /// Like `new` but with an injected recruitment draw.
    #[allow(clippy::too_many_arguments)]
    pub fn with_draw(
        status: Arc<StatusCell>,
        runner: Arc<JobRunner>,
        election: Arc<ElectionCoordinator>,
        groups: Arc<WorkGroupManager>,
        gossip: Arc<GossipService>,
        coordination: Arc<dyn Coordination>,
        transport: Arc<dyn TaskTransport>,
        draw: Box<dyn Fn() -> f64 + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            status,
            runner,
            election,
            groups,
            gossip,
            coordination,
            transport,
            leaders: DashMap::new(),
            draw,
        })
    }

    /// Accepts a new job on this node. The caller gets an answer as soon as
    /// the job is admitted; recruitment and election proceed asynchronously.
    pub async fn submit(self: &Arc<Self>, job: Job) -> Result<(), JobError> {
        job.validate()?;

        if self.runner.is_busy() || self.election.is_leader() {
            return Err(JobError::Busy);
        }

        let job_id = job.job_id.0.clone();
        self.groups
            .join_work_group(&job_id)
            .await
            .map_err(|e| JobError::Coordination(e.to_string()))?;

        self.status.set(NodeStatus::Recruiting);
        self.runner.push(job.clone());
        self.gossip.enqueue(DeferredAction::Recruit(job.clone()));

        tracing::info!("Admitted job {}; recruiting and campaigning", job_id);
        self.campaign(job).await;
        Ok(())
    }

    /// Answers a recruitment request from a peer. Leaders never abandon the
    /// job they lead; everyone else draws against their status threshold.
    pub async fn handle_recruit(self: &Arc<Self>, request: &RecruitRequest) -> bool {
        let job_id = request.job.job_id.0.clone();

        if self.election.is_leader() {
            tracing::debug!("Declining recruitment for {}: leading a job", job_id);
            return false;
        }
        if self.runner.has_job(&job_id) {
            // Already recruited for this very job by another path.
            return false;
        }

        let threshold = match self.status.get() {
            NodeStatus::Idle => RECRUIT_THRESHOLD_IDLE,
            // Recruiting nodes have a job of their own in flight; they
            // resist being pulled away as hard as working ones.
            NodeStatus::Working | NodeStatus::Recruiting => RECRUIT_THRESHOLD_BUSY,
        };
        let drawn = (self.draw)();
        if drawn <= threshold {
            tracing::debug!(
                "Declining recruitment for {} (drew {:.3} against {:.1})",
                job_id,
                drawn,
                threshold
            );
            return false;
        }

        if let Err(e) = self.groups.leave_work_group().await {
            tracing::warn!("Failed to leave current group for {}: {}", job_id, e);
            return false;
        }
        if let Err(e) = self.groups.join_work_group(&job_id).await {
            tracing::warn!("Failed to join work group {}: {}", job_id, e);
            return false;
        }

        tracing::info!(
            "Recruited for job {} by {} (drew {:.3})",
            job_id,
            request.recruiter,
            drawn
        );
        self.runner.push(request.job.clone());
        self.campaign(request.job.clone()).await;
        true
    }

    /// Routes one task line from the leader into the local runner. Awaiting
    /// the bounded queue here is what propagates backpressure to the leader.
    pub async fn on_task(&self, request: TaskRequest) -> Result<(), JobError> {
        self.runner
            .submit_task(
                &request.job_id,
                TaskLine {
                    seq: request.seq,
                    line: request.line,
                    leader: request.leader,
                },
            )
            .await
    }

    /// Routes one result line to the leader session for its job.
    pub async fn on_result(&self, request: &ResultRequest) -> Result<(), JobError> {
        let session = match self.leaders.get(&request.job_id) {
            Some(session) => session.clone(),
            None => return Err(JobError::UnknownJob(request.job_id.clone())),
        };

        session
            .on_result(request.seq, &request.line)
            .await
            .map_err(|e| JobError::Coordination(e.to_string()))
    }

    /// Leader says the job is complete: let the local runner drain and stop.
    pub fn on_done(&self, request: &DoneRequest) {
        self.runner.finish_job(&request.job_id);
    }

    /// Campaigns for the job's leadership and spawns the outcome handler.
    /// A node already campaigning or leading simply stays a worker.
    async fn campaign(self: &Arc<Self>, job: Job) {
        let outcome_rx = match self.election.start_election(&job.job_id.0).await {
            Ok(rx) => rx,
            Err(ElectionError::AlreadyElecting) => {
                tracing::debug!(
                    "Skipping campaign for {}: already campaigning or leading",
                    job.job_id
                );
                return;
            }
            Err(e) => {
                tracing::warn!("Campaign for {} failed to start: {}", job.job_id, e);
                return;
            }
        };

        let service = self.clone();
        tokio::spawn(async move {
            match outcome_rx.await {
                Ok(ElectionOutcome::Leader) => service.lead(job).await,
                Ok(ElectionOutcome::Follower { leader }) => {
                    tracing::info!("Following {} for job {}", leader, job.job_id);
                    service.follow(job).await;
                }
                // Election task died; the job still runs as a worker here.
                Err(_) => {}
            }
        });
    }

    /// Leader role: set up the queue namespace, snapshot the work group and
    /// run the split/join session to completion, then step down.
    async fn lead(self: &Arc<Self>, job: Job) {
        let job_id = job.job_id.0.clone();
        tracing::info!("Elected leader for job {}", job_id);

        if let Err(e) = self.groups.create_work_queue(&job_id).await {
            tracing::error!("Leader setup for {} failed: {}", job_id, e);
            self.election.resign().await;
            return;
        }

        let workers = match self.groups.group_members(&job_id).await {
            Ok(workers) => workers,
            Err(e) => {
                tracing::error!("Cannot list work group {}: {}", job_id, e);
                self.election.resign().await;
                return;
            }
        };

        let session = match LeaderSession::new(
            job,
            workers,
            self.election.node_id().clone(),
            self.transport.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Leader session for {} failed to open: {}", job_id, e);
                self.election.resign().await;
                return;
            }
        };

        self.leaders.insert(job_id.clone(), session.clone());

        let mut done = session.done();
        if let Err(e) = session.dispatch().await {
            tracing::error!("Dispatch for job {} failed: {}", job_id, e);
        } else {
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }

        self.leaders.remove(&job_id);
        self.election.resign().await;
        if let Err(e) = self.groups.leave_work_group().await {
            tracing::warn!("Leaving group {} after completion failed: {}", job_id, e);
        }
    }

    /// Re-entry into `campaign` from the follower path. Boxed so the
    /// follower's future type does not contain itself.
    fn recampaign(self: &Arc<Self>, job: Job) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let service = self.clone();
        Box::pin(async move { service.campaign(job).await })
    }

    /// Follower role: keep an eye on the leader signal while the job is
    /// active locally and campaign again if the leader disappears.
    async fn follow(self: &Arc<Self>, job: Job) {
        let job_id = job.job_id.0.clone();
        let signal_path = work_election_signal_path(&job_id);

        loop {
            if !self.runner.has_job(&job_id) {
                return;
            }

            let mut watch = match self.coordination.watch(&signal_path).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::warn!("Cannot watch leader of {}: {}", job_id, e);
                    return;
                }
            };

            match tokio::time::timeout(LEADER_POLL, watch.recv()).await {
                Ok(Ok(WatchEvent::Deleted { .. })) => {
                    if self.runner.has_job(&job_id) {
                        tracing::warn!("Leader of {} lost; re-entering election", job_id);
                        self.recampaign(job.clone()).await;
                    }
                    return;
                }
                // Leadership reasserted or handed over; keep watching.
                Ok(Ok(WatchEvent::DataSet { .. })) => continue,
                // Watch channel lagged or closed; re-arm it.
                Ok(Err(_)) => continue,
                // Poll tick: catches a signal deletion that raced the watch
                // setup, then re-checks whether the job is still live.
                Err(_) => {
                    if let Err(CoordinationError::NotFound(_)) =
                        self.coordination.get_data(&signal_path).await
                    {
                        if self.runner.has_job(&job_id) {
                            tracing::warn!("Leader of {} lost; re-entering election", job_id);
                            self.recampaign(job.clone()).await;
                        }
                        return;
                    }
                    continue;
                }
            }
        }
    }

    #[cfg(test)]
    pub fn active_leader_session(&self, job_id: &str) -> Option<Arc<LeaderSession>> {
        self.leaders.get(job_id).map(|s| s.clone())
    }
}
