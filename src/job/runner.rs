//! Worker-Side Job Runner
//!
//! Runs at most one job's worker subprocess at a time. Accepting a new job
//! while one is active is a cooperative replacement: the old job's stop flag
//! is raised and its subprocess torn down before the new one starts. Task
//! lines may arrive from the leader before the runner gets to the job, so
//! the bounded task channel is created at acceptance time and buffers them
//! until the subprocess is up.

use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::subprocess::WorkerProcess;
use super::types::{Job, JobError, TaskLine};
use crate::gossip::types::{NodeStatus, StatusCell};
use crate::job::protocol::ResultRequest;
use crate::rpc::TaskTransport;

struct JobChannel {
    tasks_tx: mpsc::Sender<TaskLine>,
    stop_tx: watch::Sender<bool>,
    /// Sequence numbers already accepted; the leader's retried dispatches
    /// must not reach the subprocess twice.
    seen_seqs: Mutex<HashSet<u64>>,
}

/// A job together with the receiving ends of its channels. Opaque to
/// callers; it only travels from `push` to the runner loop.
pub struct QueuedJob {
    job: Job,
    tasks_rx: mpsc::Receiver<TaskLine>,
    stop_rx: watch::Receiver<bool>,
}

pub struct JobRunner {
    status: Arc<StatusCell>,
    transport: Arc<dyn TaskTransport>,
    jobs_tx: mpsc::UnboundedSender<QueuedJob>,
    channels: DashMap<String, JobChannel>,
    queue_depth: usize,
    reply_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        status: Arc<StatusCell>,
        transport: Arc<dyn TaskTransport>,
        queue_depth: usize,
        reply_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedJob>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let runner = Arc::new(Self {
            status,
            transport,
            jobs_tx,
            channels: DashMap::new(),
            queue_depth: queue_depth.max(1),
            reply_timeout,
        });

        (runner, jobs_rx)
    }

    /// Accepts a job for execution. Any job already queued or running is
    /// told to stop first; the cluster's recruitment rules decide whether a
    /// busy node should be replaced, not the runner.
    pub fn push(&self, job: Job) {
        for entry in self.channels.iter() {
            let _ = entry.value().stop_tx.send(true);
        }

        let (tasks_tx, tasks_rx) = mpsc::channel(self.queue_depth);
        let (stop_tx, stop_rx) = watch::channel(false);

        self.channels.insert(
            job.job_id.0.clone(),
            JobChannel {
                tasks_tx,
                stop_tx,
                seen_seqs: Mutex::new(HashSet::new()),
            },
        );

        tracing::info!("Accepted job {} for execution", job.job_id);

        if self
            .jobs_tx
            .send(QueuedJob {
                job,
                tasks_rx,
                stop_rx,
            })
            .is_err()
        {
            tracing::error!("Job runner loop is gone; dropping accepted job");
        }
    }

    /// Queues one task line for the named job. Blocks when the task queue is
    /// full, which is the backpressure the leader's dispatch relies on.
    /// A sequence number seen before is acknowledged without enqueueing, so
    /// a dispatch that was retried over the wire stays a single task.
    pub async fn submit_task(&self, job_id: &str, task: TaskLine) -> Result<(), JobError> {
        let tasks_tx = {
            let channel = match self.channels.get(job_id) {
                Some(channel) => channel,
                None => return Err(JobError::UnknownJob(job_id.to_string())),
            };

            let mut seen = channel
                .seen_seqs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !seen.insert(task.seq) {
                tracing::debug!(
                    "Job {}: duplicate dispatch of line {} ignored",
                    job_id,
                    task.seq
                );
                return Ok(());
            }

            channel.tasks_tx.clone()
        };

        tasks_tx
            .send(task)
            .await
            .map_err(|_| JobError::UnknownJob(job_id.to_string()))
    }

    /// Marks the job's input as complete. Dropping the sender lets the run
    /// loop drain the queue and then shut the subprocess down cleanly.
    pub fn finish_job(&self, job_id: &str) {
        self.channels.remove(job_id);
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.channels.contains_key(job_id)
    }

    /// True while any job is queued or running.
    pub fn is_busy(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Spawns the runner loop consuming accepted jobs one at a time.
    pub fn spawn(
        self: Arc<Self>,
        mut jobs_rx: mpsc::UnboundedReceiver<QueuedJob>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(queued) = jobs_rx.recv().await {
                // Replaced before it even started.
                if *queued.stop_rx.borrow() {
                    self.channels.remove(&queued.job.job_id.0);
                    continue;
                }

                let job_id = queued.job.job_id.clone();
                if let Err(e) = self.run_job(queued).await {
                    tracing::warn!("Job {} failed: {}", job_id, e);
                }
                self.channels.remove(&job_id.0);
                self.status.set(NodeStatus::Idle);
            }
        })
    }

    async fn run_job(&self, mut queued: QueuedJob) -> Result<()> {
        self.status.set(NodeStatus::Working);
        tracing::info!("Starting worker for job {}", queued.job.job_id);

        let mut process = WorkerProcess::spawn(&queued.job.source)?;

        // Both senders live in the channels map; finish_job dropping them
        // means "input complete", only an explicit stop means "replaced".
        let mut stop_open = true;

        loop {
            tokio::select! {
                changed = queued.stop_rx.changed(), if stop_open => {
                    match changed {
                        Ok(()) => {
                            if *queued.stop_rx.borrow() {
                                tracing::info!(
                                    "Job {} replaced; tearing worker down",
                                    queued.job.job_id
                                );
                                process.kill().await;
                                return Ok(());
                            }
                        }
                        Err(_) => stop_open = false,
                    }
                }
                task = queued.tasks_rx.recv() => {
                    match task {
                        Some(task) => {
                            let result = process
                                .exchange(&task.line, self.reply_timeout)
                                .await?;
                            self.deliver_result(&queued.job, &task, result).await;
                        }
                        // Channel removed: input exhausted, drain done.
                        None => {
                            tracing::info!("Job {} input drained; finishing worker", queued.job.job_id);
                            return process.finish().await;
                        }
                    }
                }
            }
        }
    }

    async fn deliver_result(&self, job: &Job, task: &TaskLine, line: String) {
        // The leader processes its own share locally, but routing through the
        // transport keeps one code path for every worker.
        let request = ResultRequest {
            job_id: job.job_id.0.clone(),
            seq: task.seq,
            line,
        };

        if let Err(e) = self.transport.send_result(&task.leader, &request).await {
            tracing::warn!(
                "Failed to deliver result for job {} to {}: {}",
                job.job_id,
                task.leader,
                e
            );
        }
    }
}
