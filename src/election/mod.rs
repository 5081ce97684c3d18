//! Leader Election & Work Group Formation
//!
//! Per-job leader election on top of the coordination service plus
//! management of the durable work-group namespace.
//!
//! ## Core Mechanisms
//! - **Sequential tickets**: candidates race to create ephemeral-sequential
//!   nodes; the lowest suffix wins, which makes ties deterministic.
//! - **Election signal**: the winner announces itself on a per-job data node
//!   so followers stop watching and learn the leader's identity.
//! - **Ephemeral membership**: work-group members are ephemeral children of
//!   the group entry, so a crashed worker disappears from the group without
//!   any explicit leave.

pub mod coordinator;
pub mod work_group;
