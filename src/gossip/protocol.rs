//! Gossip Wire Protocol
//!
//! DTOs and endpoint constants for the peer-to-peer gossip surface. The
//! transport is an opaque request/response substrate; these definitions are
//! the whole contract a peer needs.

use serde::{Deserialize, Serialize};

use super::types::{GossipMessage, KeyValue, Node, View};

pub const ENDPOINT_VIEW: &str = "/gossip/view";
pub const ENDPOINT_DISSEMINATE: &str = "/gossip/disseminate";
pub const ENDPOINT_DATA: &str = "/gossip/data";
pub const ENDPOINT_ADDED_TO_VIEW: &str = "/gossip/added_to_view";
pub const ENDPOINT_HELLO: &str = "/gossip/hello";

#[derive(Debug, Serialize, Deserialize)]
pub struct ViewExchangeRequest {
    pub view: View,
}

/// The pre-merge snapshot of the receiving node.
#[derive(Debug, Serialize, Deserialize)]
pub struct ViewExchangeResponse {
    pub view: View,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisseminateRequest {
    pub message: GossipMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    pub entries: Vec<KeyValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddedToViewRequest {
    pub node: Node,
}
