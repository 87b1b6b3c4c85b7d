//! Gossip Substrate
//!
//! Membership, topics and the id counter on top of chitchat gossip.
//!
//! - **Membership**: chitchat live nodes, refreshed into a local cache every
//!   gossip interval. The chitchat node id is the member UUID and the
//!   generation is the start time, so a restarted node is a new sender.
//! - **Topics**: each node keeps a window of its latest notifications per
//!   topic in its own gossip state under `topic:<name>`, tagged with a
//!   per-topic sequence number. Receivers deliver entries newer than the last
//!   sequence seen from that sender, in sequence order.
//! - **Counter**: a node claims `max(seen claims) + 1` under
//!   `counter:<name>` and keeps it unless a live node with a smaller UUID
//!   claimed the same value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;

use super::error::SubstrateError;
use super::member::Member;
use super::notification::ClusterNotification;
use super::substrate::{ClusterSubstrate, MembershipListener, TopicListener};

/// Chitchat state key prefixes
const TOPIC_KEY_PREFIX: &str = "topic:";
const COUNTER_KEY_PREFIX: &str = "counter:";

fn topic_key(topic: &str) -> String {
    format!("{}{}", TOPIC_KEY_PREFIX, topic)
}

fn counter_key(counter: &str) -> String {
    format!("{}{}", COUNTER_KEY_PREFIX, counter)
}

/// Notification tagged with its per-topic sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SequencedNotification {
    seq: u64,
    notification: ClusterNotification,
}

/// The latest notifications one node published on one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TopicWindow {
    entries: Vec<SequencedNotification>,
}

impl TopicWindow {
    fn push(&mut self, notification: ClusterNotification, capacity: usize) {
        let seq = self.entries.last().map_or(1, |e| e.seq + 1);
        self.entries.push(SequencedNotification { seq, notification });
        if self.entries.len() > capacity {
            let excess = self.entries.len() - capacity;
            self.entries.drain(..excess);
        }
    }

    /// Entries newer than `last_seen`, oldest first
    fn newer_than(&self, last_seen: u64) -> impl Iterator<Item = &SequencedNotification> {
        self.entries.iter().filter(move |e| e.seq > last_seen)
    }

    fn newest_seq(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.seq)
    }
}

/// What to deliver from one sender's window on a watcher tick
#[derive(Debug)]
struct Delivery<'a> {
    entries: Vec<&'a SequencedNotification>,
    /// Sequence numbers that left the window before this node read them
    missed: u64,
    /// The window's sequence went backwards, so the sender started over
    restarted: bool,
    /// Last sequence handled once `entries` are delivered
    delivered_up_to: u64,
}

/// Decide which entries of `window` are new given the last sequence
/// delivered from that sender (0 on first sight).
///
/// First sight delivers the whole window. A window whose newest sequence is
/// below `last_seen` belongs to a restarted sender and is delivered from the
/// start.
fn plan_delivery(window: &TopicWindow, last_seen: u64) -> Delivery<'_> {
    let restarted = window.newest_seq() < last_seen;
    let seen = if restarted { 0 } else { last_seen };

    let entries: Vec<&SequencedNotification> = window.newer_than(seen).collect();
    let missed = match entries.first() {
        Some(first) if seen > 0 && first.seq > seen + 1 => first.seq - seen - 1,
        _ => 0,
    };
    let delivered_up_to = entries.last().map_or(seen, |e| e.seq);

    Delivery {
        entries,
        missed,
        restarted,
        delivered_up_to,
    }
}

/// Generation for this start of the node, in milliseconds since the epoch
fn start_generation() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn failure_detector_config(config: &ClusterConfig) -> FailureDetectorConfig {
    FailureDetectorConfig {
        phi_threshold: 8.0,
        initial_interval: config.gossip_interval_duration(),
        max_interval: config.failure_timeout_duration(),
        dead_node_grace_period: config.dead_node_grace_period_duration(),
        ..Default::default()
    }
}

/// What one watcher tick reads out of chitchat
struct GossipView {
    /// Live senders, newest generation per node only
    senders: HashSet<ChitchatId>,
    members: Vec<Member>,
    /// (sender, topic, window)
    windows: Vec<(ChitchatId, String, TopicWindow)>,
}

type TopicListeners = Arc<DashMap<String, Vec<Arc<dyn TopicListener>>>>;

/// Cluster substrate backed by chitchat
pub struct GossipSubstrate {
    local: Member,
    config: ClusterConfig,
    chitchat: Arc<tokio::sync::Mutex<Chitchat>>,
    handle: Mutex<Option<ChitchatHandle>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    members: Arc<RwLock<Vec<Member>>>,
    membership_listeners: Arc<RwLock<Vec<Arc<dyn MembershipListener>>>>,
    topics: TopicListeners,
    /// Local windows per topic, mirrored into gossip state on publish
    outbox: Mutex<HashMap<String, TopicWindow>>,
}

impl GossipSubstrate {
    /// Join the gossip cluster described by `config`
    pub async fn new(config: ClusterConfig) -> Result<Self, SubstrateError> {
        let uuid = config.get_node_uuid();
        let gossip_advertise_addr = config.get_gossip_advertise_addr();
        let local = Member::new(uuid.clone(), gossip_advertise_addr);

        info!(
            "Starting gossip substrate: {} (gossip_bind={}, gossip_advertise={})",
            local.node_id(),
            config.gossip_addr,
            gossip_advertise_addr
        );

        let chitchat_id = ChitchatId::new(uuid, start_generation(), gossip_advertise_addr);

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval_duration(),
            listen_addr: config.gossip_addr,
            seed_nodes: config.seeds.clone(),
            failure_detector_config: failure_detector_config(&config),
            marked_for_deletion_grace_period: config.dead_node_grace_period_duration(),
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let handle = spawn_chitchat(chitchat_config, Vec::new(), &UdpTransport)
            .await
            .map_err(|e| SubstrateError::Gossip(e.to_string()))?;

        Ok(Self {
            chitchat: handle.chitchat(),
            handle: Mutex::new(Some(handle)),
            watcher: Mutex::new(None),
            members: Arc::new(RwLock::new(vec![local.clone()])),
            membership_listeners: Arc::new(RwLock::new(Vec::new())),
            topics: Arc::new(DashMap::new()),
            outbox: Mutex::new(HashMap::new()),
            local,
            config,
        })
    }

    /// Start the watcher that refreshes membership and delivers topics
    pub fn start(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }

        let chitchat = self.chitchat.clone();
        let members = self.members.clone();
        let listeners = self.membership_listeners.clone();
        let topics = self.topics.clone();
        let interval = self.config.gossip_interval_duration();

        *watcher = Some(tokio::spawn(async move {
            Self::gossip_watcher_loop(chitchat, members, listeners, topics, interval).await;
        }));
    }

    fn ensure_open(&self) -> Result<(), SubstrateError> {
        if self.handle.lock().is_none() {
            return Err(SubstrateError::Closed);
        }
        Ok(())
    }

    /// Live members plus the topic windows they carry.
    ///
    /// A restarted node can briefly show up under both its old and new
    /// generation; only the newest one counts.
    fn read_view(cc: &Chitchat, topics: &[String]) -> GossipView {
        let live: HashSet<ChitchatId> = cc.live_nodes().cloned().collect();
        let mut newest: HashMap<&str, u64> = HashMap::new();
        for id in &live {
            let generation = newest.entry(id.node_id.as_str()).or_insert(id.generation_id);
            *generation = (*generation).max(id.generation_id);
        }
        let senders: HashSet<ChitchatId> = live
            .iter()
            .filter(|id| newest.get(id.node_id.as_str()) == Some(&id.generation_id))
            .cloned()
            .collect();
        let snapshot = cc.state_snapshot();

        let mut members = Vec::with_capacity(senders.len());
        let mut windows = Vec::new();

        for node_state in &snapshot.node_states {
            let id = node_state.chitchat_id();
            if !senders.contains(id) {
                continue;
            }
            members.push(Member::new(id.node_id.clone(), id.gossip_advertise_addr));

            for topic in topics {
                let Some(raw) = node_state.get(&topic_key(topic)) else {
                    continue;
                };
                match serde_json::from_str::<TopicWindow>(raw) {
                    Ok(window) => windows.push((id.clone(), topic.clone(), window)),
                    Err(e) => warn!(
                        "Gossip: unreadable '{}' window from {}: {}",
                        topic, id.node_id, e
                    ),
                }
            }
        }

        GossipView {
            senders,
            members,
            windows,
        }
    }

    /// Highest counter claim among live nodes other than `except`, with the
    /// claimants
    fn read_claims(cc: &Chitchat, key: &str, except: &str) -> Vec<(String, u64)> {
        let live: HashSet<ChitchatId> = cc.live_nodes().cloned().collect();
        cc.state_snapshot()
            .node_states
            .iter()
            .filter(|ns| live.contains(ns.chitchat_id()) && ns.chitchat_id().node_id != except)
            .filter_map(|ns| {
                let value = ns.get(key)?.parse::<u64>().ok()?;
                Some((ns.chitchat_id().node_id.clone(), value))
            })
            .collect()
    }

    /// Refresh membership and deliver new notifications every interval
    async fn gossip_watcher_loop(
        chitchat: Arc<tokio::sync::Mutex<Chitchat>>,
        members: Arc<RwLock<Vec<Member>>>,
        membership_listeners: Arc<RwLock<Vec<Arc<dyn MembershipListener>>>>,
        topics: TopicListeners,
        interval: std::time::Duration,
    ) {
        // Last sequence delivered per (sender generation, topic)
        let mut last_seen: HashMap<(ChitchatId, String), u64> = HashMap::new();

        loop {
            tokio::time::sleep(interval).await;

            let subscribed: Vec<String> = topics.iter().map(|e| e.key().clone()).collect();
            let view = {
                let cc = chitchat.lock().await;
                Self::read_view(&cc, &subscribed)
            };

            // Membership diff
            let (added, removed) = {
                let mut current = members.write();
                let before: HashSet<Member> = current.iter().cloned().collect();
                let after: HashSet<Member> = view.members.iter().cloned().collect();
                let added: Vec<Member> = after.difference(&before).cloned().collect();
                let removed: Vec<Member> = before.difference(&after).cloned().collect();
                *current = view.members;
                (added, removed)
            };

            let listeners: Vec<Arc<dyn MembershipListener>> =
                membership_listeners.read().iter().cloned().collect();
            for member in &added {
                info!("Discovered cluster member: {}", member);
                for listener in &listeners {
                    listener.on_member_added(member).await;
                }
            }
            last_seen.retain(|(sender, _), _| view.senders.contains(sender));
            for member in &removed {
                info!("Cluster member '{}' left the cluster", member);
                for listener in &listeners {
                    listener.on_member_removed(member).await;
                }
            }

            // Topic delivery, per sender in sequence order
            for (sender, topic, window) in view.windows {
                let key = (sender, topic);
                let seen = last_seen.get(&key).copied().unwrap_or(0);
                let delivery = plan_delivery(&window, seen);

                if delivery.restarted {
                    warn!(
                        "Gossip: '{}' sequence from {} went back to {}, delivering from the start",
                        key.1,
                        key.0.node_id,
                        window.newest_seq()
                    );
                }
                if delivery.missed > 0 {
                    warn!(
                        "Gossip: missed {} notifications on '{}' from {}",
                        delivery.missed, key.1, key.0.node_id
                    );
                }
                if delivery.entries.is_empty() {
                    last_seen.insert(key, delivery.delivered_up_to);
                    continue;
                }

                let targets: Vec<Arc<dyn TopicListener>> = topics
                    .get(&key.1)
                    .map(|l| l.iter().cloned().collect())
                    .unwrap_or_default();

                for entry in &delivery.entries {
                    debug!(
                        "Gossip: delivering '{}' #{} from {}",
                        key.1, entry.seq, key.0.node_id
                    );
                    for listener in &targets {
                        listener.on_message(entry.notification.clone()).await;
                    }
                }
                last_seen.insert(key, delivery.delivered_up_to);
            }
        }
    }
}

#[async_trait]
impl ClusterSubstrate for GossipSubstrate {
    fn local_member(&self) -> Member {
        self.local.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.members.read().clone()
    }

    fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.membership_listeners.write().push(listener);
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TopicListener>,
    ) -> Result<(), SubstrateError> {
        self.ensure_open()?;
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(listener);
        self.start();
        debug!("Gossip: subscribed to '{}'", topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        notification: &ClusterNotification,
    ) -> Result<(), SubstrateError> {
        self.ensure_open()?;

        let value = {
            let mut outbox = self.outbox.lock();
            let window = outbox.entry(topic.to_string()).or_default();
            window.push(notification.clone(), self.config.notification_window);
            serde_json::to_string(window)?
        };

        let mut cc = self.chitchat.lock().await;
        cc.self_node_state().set(topic_key(topic), value);
        Ok(())
    }

    async fn next_id(&self, counter: &str) -> Result<u64, SubstrateError> {
        self.ensure_open()?;
        let key = counter_key(counter);
        let own_uuid = self.local.uuid().to_string();
        // Claims need a couple of rounds to reach every node
        let settle = self.config.gossip_interval_duration() * 2;

        for attempt in 1..=self.config.id_claim_attempts {
            let candidate = {
                let mut cc = self.chitchat.lock().await;
                let claims = Self::read_claims(&cc, &key, &own_uuid);
                let candidate = claims.iter().map(|(_, v)| v + 1).max().unwrap_or(0);
                cc.self_node_state().set(key.clone(), candidate.to_string());
                candidate
            };

            tokio::time::sleep(settle).await;

            let contested = {
                let cc = self.chitchat.lock().await;
                Self::read_claims(&cc, &key, &own_uuid)
                    .iter()
                    .any(|(uuid, v)| *v == candidate && uuid.as_str() < own_uuid.as_str())
            };

            if !contested {
                info!("Gossip: claimed '{}' = {}", counter, candidate);
                return Ok(candidate);
            }
            debug!(
                "Gossip: claim {} on '{}' contested (attempt {})",
                candidate, counter, attempt
            );
        }

        Err(SubstrateError::CounterExhausted {
            counter: counter.to_string(),
            attempts: self.config.id_claim_attempts,
        })
    }

    async fn shutdown(&self) -> Result<(), SubstrateError> {
        info!("Stopping gossip substrate");
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        // Chitchat stops when its handle is dropped
        drop(self.handle.lock().take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(n: usize) -> ClusterNotification {
        ClusterNotification::new(format!("change {}", n), format!("payload-{}", n))
    }

    #[test]
    fn test_window_sequences_from_one() {
        let mut window = TopicWindow::default();
        window.push(notification(1), 8);
        window.push(notification(2), 8);
        let seqs: Vec<u64> = window.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = TopicWindow::default();
        for n in 0..10 {
            window.push(notification(n), 4);
        }
        let seqs: Vec<u64> = window.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![7, 8, 9, 10]);
        assert_eq!(window.entries[0].notification, notification(6));
    }

    #[test]
    fn test_window_newer_than() {
        let mut window = TopicWindow::default();
        for n in 0..5 {
            window.push(notification(n), 16);
        }
        let fresh: Vec<u64> = window.newer_than(3).map(|e| e.seq).collect();
        assert_eq!(fresh, vec![4, 5]);
        assert_eq!(window.newer_than(5).count(), 0);
    }

    #[test]
    fn test_window_json_round_trip() {
        let mut window = TopicWindow::default();
        window.push(notification(1), 4);
        let json = serde_json::to_string(&window).unwrap();
        let parsed: TopicWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, window);
    }

    fn window_with(count: usize) -> TopicWindow {
        let mut window = TopicWindow::default();
        for n in 0..count {
            window.push(notification(n), 64);
        }
        window
    }

    fn seqs(delivery: &Delivery<'_>) -> Vec<u64> {
        delivery.entries.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn test_delivery_first_sight_takes_whole_window() {
        let mut window = TopicWindow::default();
        for n in 0..10 {
            window.push(notification(n), 4);
        }
        let delivery = plan_delivery(&window, 0);
        assert_eq!(seqs(&delivery), vec![7, 8, 9, 10]);
        assert_eq!(delivery.missed, 0);
        assert!(!delivery.restarted);
        assert_eq!(delivery.delivered_up_to, 10);
    }

    #[test]
    fn test_delivery_only_new_entries() {
        let window = window_with(5);
        let delivery = plan_delivery(&window, 3);
        assert_eq!(seqs(&delivery), vec![4, 5]);
        assert_eq!(delivery.delivered_up_to, 5);

        let idle = plan_delivery(&window, 5);
        assert!(idle.entries.is_empty());
        assert_eq!(idle.delivered_up_to, 5);
    }

    #[test]
    fn test_delivery_counts_gap() {
        let mut window = TopicWindow::default();
        for n in 0..20 {
            window.push(notification(n), 4);
        }
        // Window holds 17..=20 but 12 was the last one read
        let delivery = plan_delivery(&window, 12);
        assert_eq!(seqs(&delivery), vec![17, 18, 19, 20]);
        assert_eq!(delivery.missed, 4);
        assert!(!delivery.restarted);
    }

    #[test]
    fn test_delivery_after_sender_restart() {
        // 50 notifications read before the restart, 10 published since
        let window = window_with(10);
        let delivery = plan_delivery(&window, 50);
        assert!(delivery.restarted);
        assert_eq!(seqs(&delivery), (1..=10).collect::<Vec<u64>>());
        assert_eq!(delivery.missed, 0);
        assert_eq!(delivery.delivered_up_to, 10);
    }

    #[test]
    fn test_generation_is_start_time() {
        let before = start_generation();
        assert!(before > 0);
        assert!(start_generation() >= before);
    }

    #[test]
    fn test_failure_detector_uses_cluster_timeouts() {
        let config = ClusterConfig {
            gossip_interval: 250,
            failure_timeout: 7,
            dead_node_grace_period: 45,
            ..Default::default()
        };
        let fd = failure_detector_config(&config);
        assert_eq!(fd.initial_interval, std::time::Duration::from_millis(250));
        assert_eq!(fd.max_interval, std::time::Duration::from_secs(7));
        assert_eq!(fd.dead_node_grace_period, std::time::Duration::from_secs(45));
    }

    #[test]
    fn test_state_keys() {
        assert_eq!(topic_key("queue-changed"), "topic:queue-changed");
        assert_eq!(counter_key("message-id-seed"), "counter:message-id-seed");
    }
}
