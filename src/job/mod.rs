//! Job Execution Module
//!
//! Implements the distributed batch pipeline: a job names a line-oriented
//! worker program plus an input and output file; the submitting node recruits
//! helpers through gossip, the work group elects a leader, and the leader
//! streams input lines round-robin to the group while collecting result lines
//! back into the output file.
//!
//! ## Roles
//! - **Runner** (`runner`, `subprocess`): every group member, leader
//!   included, runs the worker program and answers task lines one for one.
//! - **Leader** (`leader`): the elected member that splits the input and
//!   joins the results, reconciling dealt and received line counts.
//! - **Service** (`service`): admission, recruitment decisions, election
//!   wiring and routing of the internal dispatch plane.

pub mod handlers;
pub mod leader;
pub mod protocol;
pub mod runner;
pub mod service;
pub mod subprocess;
pub mod types;

#[cfg(test)]
mod tests;
