//! Leader-Side Job Session
//!
//! The elected leader of a job owns the split/join of the batch: it streams
//! the input file line by line, deals lines round-robin across the work
//! group, counts how many lines went out, and collects result lines back
//! into the output file. Results are written in arrival order; the batch
//! contract is count reconciliation, not ordering. When the input is
//! exhausted and every expected result has landed, the session finalizes:
//! the sink is flushed and closed and every worker is told the job is done.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use super::protocol::{DoneRequest, TaskRequest};
use super::types::Job;
use crate::gossip::types::NodeId;
use crate::rpc::TaskTransport;

pub struct LeaderSession {
    job: Job,
    workers: Vec<NodeId>,
    self_id: NodeId,
    transport: Arc<dyn TaskTransport>,
    expected: AtomicUsize,
    received: AtomicUsize,
    input_done: AtomicBool,
    finalized: AtomicBool,
    sink: Mutex<Option<std::io::BufWriter<std::fs::File>>>,
    /// Sequence numbers already written; retried result deliveries must not
    /// count twice or the reconciliation finalizes early.
    received_seqs: Mutex<HashSet<u64>>,
    done_tx: watch::Sender<bool>,
}

impl LeaderSession {
    /// Opens the output sink up front so a bad output path fails the job
    /// before any line is dispatched.
    pub fn new(
        job: Job,
        workers: Vec<NodeId>,
        self_id: NodeId,
        transport: Arc<dyn TaskTransport>,
    ) -> Result<Arc<Self>> {
        if workers.is_empty() {
            return Err(anyhow::anyhow!("work group for {} is empty", job.job_id));
        }

        let file = std::fs::File::create(&job.output)
            .with_context(|| format!("creating output file {}", job.output))?;

        let (done_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            job,
            workers,
            self_id,
            transport,
            expected: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            input_done: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            sink: Mutex::new(Some(std::io::BufWriter::new(file))),
            received_seqs: Mutex::new(HashSet::new()),
            done_tx,
        }))
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id.0
    }

    /// Resolves to `true` once the session has finalized.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Streams the input file and deals its lines round-robin across the
    /// group. Each dispatch awaits the worker's acceptance, so a worker with
    /// a full task queue slows the whole deal down rather than being buried.
    pub async fn dispatch(self: &Arc<Self>) -> Result<()> {
        let file = tokio::fs::File::open(&self.job.input)
            .await
            .with_context(|| format!("opening input file {}", self.job.input))?;
        let mut lines = tokio::io::BufReader::new(file).lines();

        let mut dealt: usize = 0;

        while let Some(line) = lines.next_line().await? {
            let worker = &self.workers[dealt % self.workers.len()];
            let seq = dealt as u64;
            dealt += 1;
            self.expected.fetch_add(1, Ordering::SeqCst);

            let request = TaskRequest {
                job_id: self.job.job_id.0.clone(),
                seq,
                line,
                leader: self.self_id.clone(),
            };

            self.transport
                .send_task(worker, &request)
                .await
                .with_context(|| format!("dispatching line {} to {}", dealt, worker))?;
        }

        tracing::info!(
            "Job {}: dispatched {} lines across {} workers",
            self.job.job_id,
            dealt,
            self.workers.len()
        );

        self.input_done.store(true, Ordering::SeqCst);
        self.maybe_finalize().await;
        Ok(())
    }

    /// Records one result line. Arrival order is write order; a sequence
    /// number seen before is acknowledged without a second write or count.
    pub async fn on_result(self: &Arc<Self>, seq: u64, line: &str) -> Result<()> {
        {
            let mut seen = self
                .received_seqs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !seen.insert(seq) {
                tracing::debug!(
                    "Job {}: duplicate result for line {} ignored",
                    self.job.job_id,
                    seq
                );
                return Ok(());
            }
        }

        {
            let mut guard = self
                .sink
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(sink) = guard.as_mut() else {
                // Finalized already; a straggler past reconciliation.
                tracing::warn!("Job {}: result after finalize dropped", self.job.job_id);
                return Ok(());
            };
            writeln!(sink, "{}", line)?;
        }

        self.received.fetch_add(1, Ordering::SeqCst);
        self.maybe_finalize().await;
        Ok(())
    }

    /// Completion test: input fully dealt and every dealt line answered.
    async fn maybe_finalize(self: &Arc<Self>) {
        if !self.input_done.load(Ordering::SeqCst) {
            return;
        }
        if self.received.load(Ordering::SeqCst) < self.expected.load(Ordering::SeqCst) {
            return;
        }
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let sink = {
            let mut guard = self
                .sink
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        if let Some(mut sink) = sink {
            if let Err(e) = sink.flush() {
                tracing::error!("Job {}: flushing output failed: {}", self.job.job_id, e);
            }
        }

        tracing::info!(
            "Job {} complete: {} results in {}",
            self.job.job_id,
            self.received.load(Ordering::SeqCst),
            self.job.output
        );

        let done = DoneRequest {
            job_id: self.job.job_id.0.clone(),
        };
        for worker in &self.workers {
            if let Err(e) = self.transport.send_done(worker, &done).await {
                tracing::warn!(
                    "Job {}: done signal to {} failed: {}",
                    self.job.job_id,
                    worker,
                    e
                );
            }
        }

        // send_replace updates the value even with no receiver subscribed,
        // so a `done()` receiver obtained later still observes completion.
        self.done_tx.send_replace(true);
    }

    #[cfg(test)]
    pub fn counters(&self) -> (usize, usize) {
        (
            self.expected.load(Ordering::SeqCst),
            self.received.load(Ordering::SeqCst),
        )
    }
}
