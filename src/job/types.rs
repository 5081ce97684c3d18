use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line written to a worker subprocess to signal end of job. The worker
/// program must treat it as its shutdown marker, not as input.
pub const JOB_DONE_SENTINEL: &str = "ANT_JOB_DONE";

/// Unique identifier for a job within the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A submitted batch job.
///
/// `source` is the worker-program invocation (program plus arguments); the
/// program must follow the strict line-for-line protocol: read one line from
/// stdin, write exactly one line to stdout, repeat until the sentinel.
/// `input` and `output` are file paths meaningful on the leader node. The
/// expected line count is not part of the job; the leader discovers it while
/// dispatching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub source: Vec<String>,
    pub input: String,
    pub output: String,
}

impl Job {
    /// Rejects malformed job tuples before any cluster-wide side effects.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.job_id.0.trim().is_empty() {
            return Err(JobError::Malformed("empty job id".to_string()));
        }
        if self.source.is_empty() || self.source[0].trim().is_empty() {
            return Err(JobError::Malformed(
                "missing worker program invocation".to_string(),
            ));
        }
        if self.input.trim().is_empty() {
            return Err(JobError::Malformed("missing input location".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(JobError::Malformed("missing output location".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed job: {0}")]
    Malformed(String),

    #[error("node is busy with another job")]
    Busy,

    #[error("no such active job: {0}")]
    UnknownJob(String),

    #[error("coordination failure: {0}")]
    Coordination(String),
}

/// One input line queued on a worker, together with its input position and
/// where its result goes.
#[derive(Debug, Clone)]
pub struct TaskLine {
    pub seq: u64,
    pub line: String,
    pub leader: crate::gossip::types::NodeId,
}
