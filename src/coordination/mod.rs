//! Coordination Layer
//!
//! Contract and in-process implementation of the hierarchical coordination
//! service (liveness markers, work-group membership, sequential elections,
//! watches). Everything above this module talks to the `Coordination` trait
//! only; the paths it uses are contractual and listed in `client`.

pub mod client;
pub mod memory;
