//! Membership & Dissemination Module
//!
//! Implements the epidemic membership and data-dissemination protocol.
//! Each node keeps a bounded sample of peers (its *view*) plus the reverse
//! reference map of who samples whom (*neighborhood*), and pushes both to
//! its peers on a fixed cadence.
//!
//! ## Core Mechanisms
//! - **Push anti-entropy**: every pulse the node sends its view to each view
//!   peer; merges grow the remote view until the fanout cap and return the
//!   receiver's pre-merge snapshot to the sender.
//! - **Epidemic dissemination**: key/value messages flood through views,
//!   deduplicated by uuid through an approximate set so re-deliveries are
//!   cheap no-ops.
//! - **Deferred actions**: outbound calls are queued and drained one per
//!   heartbeat tick, keeping the outbound order equal to enqueue order.

pub mod dedup;
pub mod handlers;
pub mod heartbeat;
pub mod protocol;
pub mod service;
pub mod types;
pub mod view;

#[cfg(test)]
mod tests;
