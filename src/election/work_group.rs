//! Work Group Management
//!
//! A work group is the durable namespace entry for the set of nodes
//! collaborating on one job; its children are ephemeral membership markers
//! the coordination service removes when a member's session ends. Group and
//! queue creation are leader-only operations; joining is open to any node
//! and idempotent.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::coordinator::{ElectionCoordinator, ElectionError};
use crate::coordination::client::{
    Coordination, CoordinationError, CreateMode, with_retry, work_group_member_path,
    work_group_path, work_queue_path,
};
use crate::gossip::types::NodeId;

pub struct WorkGroupManager {
    node_id: NodeId,
    coordination: Arc<dyn Coordination>,
    election: Arc<ElectionCoordinator>,
    current_group: Mutex<Option<String>>,
}

impl WorkGroupManager {
    pub fn new(
        node_id: NodeId,
        coordination: Arc<dyn Coordination>,
        election: Arc<ElectionCoordinator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            coordination,
            election,
            current_group: Mutex::new(None),
        })
    }

    /// Leader-only: creates the durable group entry and joins it.
    pub async fn create_work_group(&self, group_id: &str) -> Result<(), ElectionError> {
        if !self.election.is_leader() {
            return Err(ElectionError::NotLeader);
        }
        self.ensure_group(group_id).await?;
        self.join_work_group(group_id).await
    }

    /// Leader-only: establishes the durable queue namespace for a job.
    pub async fn create_work_queue(&self, queue_id: &str) -> Result<(), ElectionError> {
        if !self.election.is_leader() {
            return Err(ElectionError::NotLeader);
        }

        let path = work_queue_path(queue_id);
        let coordination = self.coordination.clone();
        match with_retry(|| coordination.create(&path, "", CreateMode::Persistent)).await {
            Ok(_) => {
                tracing::info!("Created work queue {}", queue_id);
                Ok(())
            }
            Err(CoordinationError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Joins a group, creating it first if nobody has. Idempotent: an
    /// existing membership marker is left alone.
    pub async fn join_work_group(&self, group_id: &str) -> Result<(), ElectionError> {
        self.ensure_group(group_id).await?;

        let member_path = work_group_member_path(group_id, &self.node_id.0);
        let coordination = self.coordination.clone();
        if !with_retry(|| coordination.exists(&member_path)).await? {
            match with_retry(|| coordination.create(&member_path, "", CreateMode::Ephemeral)).await
            {
                Ok(_) | Err(CoordinationError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        *self.current_group.lock().await = Some(group_id.to_string());
        tracing::info!("Node {} joined work group {}", self.node_id, group_id);
        Ok(())
    }

    /// Removes our membership marker from the group we last joined.
    pub async fn leave_work_group(&self) -> Result<(), ElectionError> {
        let group = {
            let mut guard = self.current_group.lock().await;
            guard.take()
        };

        if let Some(group_id) = group {
            let member_path = work_group_member_path(&group_id, &self.node_id.0);
            match self.coordination.delete(&member_path).await {
                Ok(()) | Err(CoordinationError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            tracing::info!("Node {} left work group {}", self.node_id, group_id);
        }

        Ok(())
    }

    /// Members currently joined to a group, in stable order.
    pub async fn group_members(&self, group_id: &str) -> Result<Vec<NodeId>, ElectionError> {
        let path = work_group_path(group_id);
        let coordination = self.coordination.clone();
        let mut members = with_retry(|| coordination.get_children(&path)).await?;
        members.sort();
        Ok(members.into_iter().map(NodeId).collect())
    }

    pub async fn current_group(&self) -> Option<String> {
        self.current_group.lock().await.clone()
    }

    async fn ensure_group(&self, group_id: &str) -> Result<(), ElectionError> {
        let path = work_group_path(group_id);
        let coordination = self.coordination.clone();
        match with_retry(|| coordination.create(&path, "", CreateMode::Persistent)).await {
            Ok(_) | Err(CoordinationError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
