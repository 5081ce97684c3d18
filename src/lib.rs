//! Distributed Batch-Processing Cluster Library
//!
//! This library crate defines the core modules that make up the cluster node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`gossip`**: The epidemic membership and dissemination layer. Each node
//!   keeps a bounded view of peers, exchanges it on a heartbeat cadence and
//!   floods key/value messages with uuid deduplication.
//! - **`coordination`**: The hierarchical coordination namespace (persistent,
//!   ephemeral and sequential nodes plus watches) behind a trait, with an
//!   in-process implementation.
//! - **`election`**: Per-job leader election over sequential tickets and the
//!   work-group membership that hangs off it.
//! - **`job`**: The batch pipeline: worker subprocesses, the per-node runner,
//!   the leader's split/join session and recruitment over gossip.
//! - **`config`**: Settings and node-list files driving a node.

pub mod config;
pub mod coordination;
pub mod election;
pub mod gossip;
pub mod job;
pub mod rpc;
