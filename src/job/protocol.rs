//! Job Wire Protocol
//!
//! DTOs and endpoint constants for job submission, recruitment and the
//! internal dispatch plane (leader -> worker task lines, worker -> leader
//! result lines, end-of-job signalling).

use serde::{Deserialize, Serialize};

use super::types::Job;
use crate::gossip::types::NodeId;

pub const ENDPOINT_NEW_JOB: &str = "/job/new";
pub const ENDPOINT_RECRUIT: &str = "/job/recruit";
pub const ENDPOINT_JOB_TASK: &str = "/internal/job/task";
pub const ENDPOINT_JOB_RESULT: &str = "/internal/job/result";
pub const ENDPOINT_JOB_DONE: &str = "/internal/job/done";

#[derive(Debug, Serialize, Deserialize)]
pub struct NewJobRequest {
    pub job: Job,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewJobResponse {
    pub accepted: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecruitRequest {
    pub job: Job,
    pub recruiter: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecruitResponse {
    pub accepted: bool,
}

/// One input line dispatched by the leader. Carrying the leader's identity
/// lets the worker address its result without a coordination lookup on the
/// hot path. `seq` is the line's position in the job's input; both sides
/// deduplicate on it, which makes the retried POSTs of the dispatch plane
/// safe to deliver more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub job_id: String,
    pub seq: u64,
    pub line: String,
    pub leader: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRequest {
    pub job_id: String,
    pub seq: u64,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneRequest {
    pub job_id: String,
}
