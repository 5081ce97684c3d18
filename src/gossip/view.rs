//! Membership View Store
//!
//! Holds this node's bounded peer sample and the reverse-reference
//! neighborhood map. Merges are read-modify-replace: a merge clones the
//! current view, applies the remote owner's information and swaps the new
//! `Arc<View>` in. Readers that grabbed the old snapshot keep working on a
//! consistent value, and the pre-merge snapshot is what gets returned to the
//! exchanging peer.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::View;

pub struct ViewStore {
    fanout: usize,
    current: RwLock<Arc<View>>,
}

impl ViewStore {
    pub fn new(initial: View, fanout: usize) -> Self {
        Self {
            fanout,
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Current view; cheap Arc clone, safe to hold across awaits.
    pub async fn snapshot(&self) -> Arc<View> {
        self.current.read().await.clone()
    }

    /// Merges a peer's view and returns the *pre-merge* snapshot.
    ///
    /// For every peer listed in the remote view, the remote owner is recorded
    /// as a referrer in `neighborhood` (a set-add, so re-merges are no-ops).
    /// The remote owner itself is appended to the local view only while the
    /// view is below fanout; it is never added twice and the owner never
    /// adds itself.
    pub async fn merge(&self, remote: &View) -> Arc<View> {
        let mut guard = self.current.write().await;
        let before = guard.clone();

        let mut next = (*before).clone();

        for peer in &remote.view {
            next.neighborhood
                .entry(peer.clone())
                .or_default()
                .insert(remote.owner.clone());
        }

        if next.view.len() < self.fanout
            && remote.owner != next.owner
            && !next.contains(&remote.owner)
        {
            next.view.push(remote.owner.clone());
        }

        *guard = Arc::new(next);

        before
    }

    /// Replaces the whole view, e.g. when reloading the node-list file.
    pub async fn replace(&self, view: View) {
        let mut guard = self.current.write().await;
        *guard = Arc::new(view);
    }
}
