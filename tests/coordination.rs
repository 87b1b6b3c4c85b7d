//! Cluster coordination integration tests
//!
//! Several agents share one in-process hub, the way broker nodes share a
//! gossip cluster, and exchange change notifications and slot metadata.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use slotwise::cluster::{
    rank_of, ChannelHandlers, ClusterNotification, CoordinationAgent, CoordinationConfig,
    HandlerError, HandlerResult, Member, MembershipListener, MemoryHub, NotificationChannel,
    NotificationHandler,
};
use slotwise::slot::{Slot, SlotKey, SlotRecord, SlotState, SlotTracker};

fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([192, 168, 0, last], 7946))
}

/// Collects (channel, description) pairs
#[derive(Default)]
struct Inbox {
    seen: Mutex<Vec<(NotificationChannel, String)>>,
}

impl Inbox {
    fn descriptions(&self, channel: NotificationChannel) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationHandler for Inbox {
    async fn on_notification(
        &self,
        channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> HandlerResult {
        self.seen
            .lock()
            .push((channel, notification.description().to_string()));
        Ok(())
    }
}

/// Applies slot records carried in queue notifications to a local tracker
struct SlotReplica {
    tracker: Arc<SlotTracker>,
}

#[async_trait]
impl NotificationHandler for SlotReplica {
    async fn on_notification(
        &self,
        _channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> HandlerResult {
        let record: SlotRecord = serde_json::from_str(notification.payload())
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let slot =
            Slot::from_record(&record).map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let key = slot
            .key()
            .ok_or_else(|| HandlerError::InvalidPayload("slot has no storage queue".into()))?;

        // Redelivery replaces the replica with the newer history
        self.tracker.remove(&key);
        self.tracker
            .insert(slot)
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        Ok(())
    }
}

/// Records joins and leaves by UUID
#[derive(Clone, Default)]
struct MembershipLog {
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MembershipListener for MembershipLog {
    async fn on_member_added(&self, member: &Member) {
        self.events.lock().push(format!("+{}", member.uuid()));
    }

    async fn on_member_removed(&self, member: &Member) {
        self.events.lock().push(format!("-{}", member.uuid()));
    }
}

struct Node {
    agent: CoordinationAgent,
    inbox: Arc<Inbox>,
}

async fn start_node(hub: &MemoryHub, uuid: &str, last: u8) -> Node {
    let inbox = Arc::new(Inbox::default());
    let mut handlers = ChannelHandlers::new();
    for channel in NotificationChannel::ALL {
        handlers.add(channel, inbox.clone());
    }
    let substrate = hub.join_with_uuid(uuid, addr(last)).await;
    let agent = CoordinationAgent::new(substrate, handlers, CoordinationConfig::default());
    agent.start().await.unwrap();
    Node { agent, inbox }
}

#[tokio::test]
async fn test_broadcast_reaches_every_node() {
    let hub = MemoryHub::new();
    let nodes = vec![
        start_node(&hub, "n1", 1).await,
        start_node(&hub, "n2", 2).await,
        start_node(&hub, "n3", 3).await,
    ];

    nodes[1]
        .agent
        .notify_exchanges_changed(&ClusterNotification::new("exchange amq.topic declared", ""))
        .await
        .unwrap();

    for node in &nodes {
        assert_eq!(
            node.inbox.descriptions(NotificationChannel::Exchange),
            vec!["exchange amq.topic declared"]
        );
        assert!(node
            .inbox
            .descriptions(NotificationChannel::Queue)
            .is_empty());
    }
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    let hub = MemoryHub::new();
    let a = start_node(&hub, "a", 1).await;
    let b = start_node(&hub, "b", 2).await;

    let sent: Vec<String> = (0..20).map(|i| format!("binding {} added", i)).collect();
    for description in &sent {
        a.agent
            .notify_bindings_changed(&ClusterNotification::new(description.clone(), ""))
            .await
            .unwrap();
    }

    assert_eq!(b.inbox.descriptions(NotificationChannel::Binding), sent);
    assert_eq!(a.inbox.descriptions(NotificationChannel::Binding), sent);
}

#[tokio::test]
async fn test_unique_ids_are_distinct() {
    let hub = MemoryHub::new();
    let mut ids = HashSet::new();
    for i in 0..5u8 {
        let node = start_node(&hub, &format!("node-{}", i), i).await;
        assert!(ids.insert(node.agent.unique_id_for_node().unwrap()));
    }
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_ranks_agree_across_nodes() {
    let hub = MemoryHub::new();
    let nodes = vec![
        start_node(&hub, "charlie", 1).await,
        start_node(&hub, "alpha", 2).await,
        start_node(&hub, "bravo", 3).await,
    ];

    let mut local_ranks: Vec<usize> = nodes
        .iter()
        .map(|n| n.agent.index_of_local_node().unwrap())
        .collect();
    assert_eq!(local_ranks, vec![2, 0, 1]);

    // Every node computes the same rank for every member
    for member in nodes[0].agent.all_cluster_members() {
        let ranks: HashSet<Option<usize>> = nodes
            .iter()
            .map(|n| n.agent.index_of_node(&member))
            .collect();
        assert_eq!(ranks.len(), 1);
    }

    local_ranks.sort_unstable();
    assert_eq!(local_ranks, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_membership_listener_sees_join_and_leave() {
    let hub = MemoryHub::new();
    let log = MembershipLog::default();

    let substrate = hub.join_with_uuid("watcher", addr(1)).await;
    let watcher = CoordinationAgent::new(
        substrate,
        ChannelHandlers::new(),
        CoordinationConfig::default(),
    )
    .with_membership_listener(log.clone());
    watcher.start().await.unwrap();

    let joiner = start_node(&hub, "joiner", 2).await;
    assert_eq!(watcher.cluster_size(), 2);

    joiner.agent.shutdown().await.unwrap();
    assert_eq!(watcher.cluster_size(), 1);

    assert_eq!(*log.events.lock(), vec!["+joiner", "-joiner"]);
}

#[tokio::test]
async fn test_slot_metadata_replicates_through_queue_channel() {
    let hub = MemoryHub::new();
    let owner_tracker = Arc::new(SlotTracker::new());
    let replica_tracker = Arc::new(SlotTracker::new());

    let owner = CoordinationAgent::new(
        hub.join_with_uuid("owner", addr(1)).await,
        ChannelHandlers::new(),
        CoordinationConfig::default(),
    );
    let replica = CoordinationAgent::new(
        hub.join_with_uuid("replica", addr(2)).await,
        ChannelHandlers::new().with(
            NotificationChannel::Queue,
            SlotReplica {
                tracker: replica_tracker.clone(),
            },
        ),
        CoordinationConfig::default(),
    );
    owner.start().await.unwrap();
    replica.start().await.unwrap();

    let key = owner_tracker
        .insert(Slot::with_storage_queue(100, 199, "orders", "orders-0").unwrap())
        .unwrap();
    owner_tracker.add_state(&key, SlotState::Assigned).unwrap();
    owner_tracker.mark_overlapping(&key).unwrap();

    let publish = |slot: Slot| {
        let payload = serde_json::to_string(&slot.to_record()).unwrap();
        ClusterNotification::new(format!("slot {} updated", slot.id()), payload)
    };

    owner
        .notify_queues_changed(&publish(owner_tracker.get(&key).unwrap()))
        .await
        .unwrap();

    let replicated = replica_tracker
        .get(&SlotKey::new("orders-0", 100, 199))
        .unwrap();
    assert_eq!(
        replicated.states(),
        &[
            SlotState::Created,
            SlotState::Assigned,
            SlotState::Overlapped
        ]
    );
    assert!(replicated.is_overlapping());
    assert_eq!(replicated.lifecycle_state(), Some(SlotState::Assigned));

    // A later transition replaces the replica
    owner_tracker.add_state(&key, SlotState::Delivered).unwrap();
    owner
        .notify_queues_changed(&publish(owner_tracker.get(&key).unwrap()))
        .await
        .unwrap();
    assert_eq!(
        replica_tracker.get(&key).unwrap().current_state(),
        Some(SlotState::Delivered)
    );
    assert_eq!(replica_tracker.len(), 1);
}

#[tokio::test]
async fn test_bad_payload_does_not_stop_other_handlers() {
    let hub = MemoryHub::new();
    let tracker = Arc::new(SlotTracker::new());
    let inbox = Arc::new(Inbox::default());

    let agent = CoordinationAgent::new(
        hub.join_with_uuid("solo", addr(1)).await,
        ChannelHandlers::new()
            .with(NotificationChannel::Queue, SlotReplica { tracker: tracker.clone() })
            .with(NotificationChannel::Queue, inbox.clone()),
        CoordinationConfig::default(),
    );
    agent.start().await.unwrap();

    agent
        .notify_queues_changed(&ClusterNotification::new("queue q9 deleted", "not json"))
        .await
        .unwrap();

    assert!(tracker.is_empty());
    assert_eq!(
        inbox.descriptions(NotificationChannel::Queue),
        vec!["queue q9 deleted"]
    );
}

proptest! {
    #[test]
    fn prop_rank_is_a_bijection(uuids in prop::collection::hash_set("[a-z0-9]{1,12}", 1..16)) {
        let members: Vec<Member> = uuids
            .iter()
            .enumerate()
            .map(|(i, uuid)| Member::new(uuid.clone(), addr(i as u8)))
            .collect();

        let mut ranks: Vec<usize> = members
            .iter()
            .map(|m| rank_of(&members, m.uuid()).unwrap())
            .collect();
        ranks.sort_unstable();
        prop_assert_eq!(ranks, (0..members.len()).collect::<Vec<_>>());
    }
}
