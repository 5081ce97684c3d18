//! Gossip Module Tests
//!
//! Covers dissemination idempotence and the deferred-action queue, view
//! merging through the service surface, reverse-reference registration in
//! the coordination namespace, liveness markers, bad-peer parking and the
//! heartbeat's node-list persistence.

#[cfg(test)]
mod tests {
    use crate::coordination::client::Coordination;
    use crate::coordination::memory::MemoryCoordination;
    use crate::gossip::dedup::BloomSet;
    use crate::gossip::heartbeat::HeartbeatScheduler;
    use crate::gossip::service::{DeferredAction, GossipService};
    use crate::gossip::types::{GossipMessage, Node, NodeId, NodeStatus, StatusCell, View};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn id(s: &str) -> NodeId {
        NodeId(s.to_string())
    }

    fn build_service(
        address: &str,
        port: u16,
    ) -> (
        Arc<GossipService>,
        mpsc::UnboundedReceiver<DeferredAction>,
        Arc<MemoryCoordination>,
    ) {
        let coordination = MemoryCoordination::new();
        let local = Node::new(address, port);
        let (service, actions_rx) = GossipService::new(
            local.clone(),
            Arc::new(StatusCell::new(NodeStatus::Idle)),
            View::new(local.id()),
            2,
            Box::new(BloomSet::new(1000, 0.01)),
            coordination.session(),
        );
        (service, actions_rx, coordination)
    }

    #[tokio::test]
    async fn test_disseminate_stores_and_enqueues_once() {
        let (service, mut actions_rx, _coordination) = build_service("127.0.0.1", 1);
        let message = GossipMessage::new("color", "blue");

        assert!(service.disseminate(&message));
        // Re-delivery of the same uuid is a no-op.
        assert!(!service.disseminate(&message));

        let data = service.get_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].key, "color");
        assert_eq!(data[0].value, "blue");

        // Exactly one forward was deferred.
        match actions_rx.try_recv().unwrap() {
            DeferredAction::Forward(queued) => assert_eq!(queued.uuid, message.uuid),
            other => panic!("unexpected action {:?}", other),
        }
        assert!(actions_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_three_node_epidemic_reaches_everyone_once() {
        // Three nodes at fanout 2, forwards carried by hand instead of HTTP.
        let (a, mut a_actions, _ca) = build_service("10.0.0.1", 1);
        let (b, mut b_actions, _cb) = build_service("10.0.0.2", 1);
        let (c, mut c_actions, _cc) = build_service("10.0.0.3", 1);

        let message = GossipMessage::new("answer", "42");
        assert!(a.disseminate(&message));

        // A forwards to its peers.
        let forwarded = match a_actions.try_recv().unwrap() {
            DeferredAction::Forward(m) => m.forwarded(),
            other => panic!("unexpected action {:?}", other),
        };
        assert!(b.disseminate(&forwarded));
        assert!(c.disseminate(&forwarded));

        // B and C forward in turn; every re-delivery is dropped.
        let from_b = match b_actions.try_recv().unwrap() {
            DeferredAction::Forward(m) => m.forwarded(),
            other => panic!("unexpected action {:?}", other),
        };
        let from_c = match c_actions.try_recv().unwrap() {
            DeferredAction::Forward(m) => m.forwarded(),
            other => panic!("unexpected action {:?}", other),
        };
        assert!(!a.disseminate(&from_b));
        assert!(!c.disseminate(&from_b));
        assert!(!a.disseminate(&from_c));
        assert!(!b.disseminate(&from_c));

        // No second forward was enqueued anywhere.
        assert!(a_actions.try_recv().is_err());
        assert!(b_actions.try_recv().is_err());
        assert!(c_actions.try_recv().is_err());

        for service in [&a, &b, &c] {
            let data = service.get_data();
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].key, "answer");
            assert_eq!(data[0].value, "42");
        }
    }

    #[tokio::test]
    async fn test_same_key_new_uuid_overwrites_value() {
        let (service, _actions_rx, _coordination) = build_service("127.0.0.1", 1);

        assert!(service.disseminate(&GossipMessage::new("color", "blue")));
        assert!(service.disseminate(&GossipMessage::new("color", "green")));

        let data = service.get_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value, "green");
    }

    #[tokio::test]
    async fn test_forwarded_copy_gains_a_hop() {
        let message = GossipMessage::new("k", "v");
        let forwarded = message.forwarded();

        assert_eq!(forwarded.uuid, message.uuid);
        assert_eq!(forwarded.hops, message.hops + 1);
    }

    #[tokio::test]
    async fn test_merge_view_returns_pre_merge_snapshot() {
        let (service, _actions_rx, _coordination) = build_service("127.0.0.1", 1);

        let mut remote = View::new(id("10.0.0.2:1"));
        remote.view.push(id("10.0.0.3:1"));

        let before = service.merge_view(&remote).await;
        assert!(before.view.is_empty());

        // The remote owner joined our view; its members joined the
        // neighborhood as reverse references.
        let after = service.view_snapshot().await;
        assert!(after.contains(&id("10.0.0.2:1")));
        let referrers = after.neighborhood.get(&id("10.0.0.3:1")).unwrap();
        assert!(referrers.contains(&id("10.0.0.2:1")));
    }

    #[tokio::test]
    async fn test_view_respects_fanout_cap() {
        let (service, _actions_rx, _coordination) = build_service("127.0.0.1", 1);

        for i in 2..10 {
            let mut remote = View::new(id(&format!("10.0.0.{}:1", i)));
            remote.view.push(id(&format!("10.0.1.{}:1", i)));
            service.merge_view(&remote).await;
        }

        // Fanout of 2 in build_service.
        assert_eq!(service.view_snapshot().await.view.len(), 2);
    }

    #[tokio::test]
    async fn test_peer_added_us_registers_reverse_reference() {
        let (service, _actions_rx, coordination) = build_service("127.0.0.1", 1);
        let peer = Node::new("10.0.0.2", 1);

        service.peer_added_us(&peer).await.unwrap();

        let snapshot = service.view_snapshot().await;
        let referrers = snapshot.neighborhood.get(&service.local_id()).unwrap();
        assert!(referrers.contains(&peer.id()));

        // Mirrored as an ephemeral marker under the peer's view list.
        let observer = coordination.session();
        assert!(observer
            .exists("/nodes/views/10.0.0.2:1/127.0.0.1:1")
            .await
            .unwrap());

        // Registering twice is fine.
        service.peer_added_us(&peer).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_liveness_creates_node_marker() {
        let (service, _actions_rx, coordination) = build_service("127.0.0.1", 7);

        service.register_liveness().await.unwrap();
        service.register_liveness().await.unwrap();

        let observer = coordination.session();
        assert_eq!(
            observer.get_children("/nodes").await.unwrap(),
            vec!["127.0.0.1:7".to_string()]
        );
    }

    #[tokio::test]
    async fn test_repeated_failures_park_a_peer() {
        let (service, _actions_rx, _coordination) = build_service("127.0.0.1", 1);

        // Port 9 is closed, so every forward to this peer fails fast.
        let dead = id("127.0.0.1:9");
        service.merge_view(&View::new(dead.clone())).await;

        for _ in 0..3 {
            service
                .run_action(DeferredAction::Forward(GossipMessage::new("k", "v")))
                .await;
        }

        assert!(service.is_peer_bad(&dead));
    }

    #[tokio::test]
    async fn test_heartbeat_persists_node_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        let (service, actions_rx, _coordination) = build_service("127.0.0.1", 1);
        service.merge_view(&View::new(id("10.0.0.2:1"))).await;

        let scheduler = HeartbeatScheduler::new(
            service.clone(),
            Duration::from_millis(5),
            1_000_000, // keep view exchanges out of this test
            Some(path.clone()),
        );
        let handle = scheduler.spawn(actions_rx);

        // 64 ticks at 5ms each; give it some slack.
        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        let saved = crate::config::NodeList::load(&path).unwrap();
        assert!(saved.view.contains(&id("10.0.0.2:1")));
    }
}
