//! In-process substrate
//!
//! A [`MemoryHub`] stands in for the cluster: every node joined to the same
//! hub sees the same membership, topics and counters. Publishing delivers to
//! every subscriber before returning, so a sender's notifications reach each
//! receiver in publish order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::error::SubstrateError;
use super::member::Member;
use super::notification::ClusterNotification;
use super::substrate::{ClusterSubstrate, MembershipListener, TopicListener};

/// Topic subscription tagged with the subscribing node
type Subscription = (String, Arc<dyn TopicListener>);

#[derive(Default)]
struct HubState {
    /// Members in join order
    members: RwLock<Vec<Member>>,
    /// Membership listeners keyed by owning node UUID
    membership_listeners: RwLock<Vec<(String, Arc<dyn MembershipListener>)>>,
    topics: DashMap<String, Vec<Subscription>>,
    counters: DashMap<String, u64>,
    unreachable: AtomicBool,
}

/// Shared in-process cluster
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new node with a random UUID
    pub async fn join(&self, address: SocketAddr) -> Arc<MemorySubstrate> {
        self.join_with_uuid(uuid::Uuid::new_v4().to_string(), address)
            .await
    }

    /// Join a node with a fixed UUID
    pub async fn join_with_uuid(
        &self,
        uuid: impl Into<String>,
        address: SocketAddr,
    ) -> Arc<MemorySubstrate> {
        let member = Member::new(uuid, address);
        self.state.members.write().push(member.clone());
        info!("Member {} joined in-process cluster", member);

        for listener in self.listeners_except(member.uuid()) {
            listener.on_member_added(&member).await;
        }

        Arc::new(MemorySubstrate {
            member,
            hub: self.state.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Make every publish fail, as if the broadcast layer were down
    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn member_count(&self) -> usize {
        self.state.members.read().len()
    }

    async fn remove(&self, uuid: &str) {
        let removed = {
            let mut members = self.state.members.write();
            members
                .iter()
                .position(|m| m.uuid() == uuid)
                .map(|index| members.remove(index))
        };

        self.state
            .membership_listeners
            .write()
            .retain(|(owner, _)| owner != uuid);
        for mut subscriptions in self.state.topics.iter_mut() {
            subscriptions.retain(|(owner, _)| owner != uuid);
        }

        if let Some(member) = removed {
            info!("Member {} left in-process cluster", member);
            for listener in self.listeners_except(uuid) {
                listener.on_member_removed(&member).await;
            }
        }
    }

    fn listeners_except(&self, uuid: &str) -> Vec<Arc<dyn MembershipListener>> {
        self.state
            .membership_listeners
            .read()
            .iter()
            .filter(|(owner, _)| owner != uuid)
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

/// One node's handle on a [`MemoryHub`]
pub struct MemorySubstrate {
    member: Member,
    hub: Arc<HubState>,
    closed: AtomicBool,
}

impl MemorySubstrate {
    fn hub(&self) -> MemoryHub {
        MemoryHub {
            state: self.hub.clone(),
        }
    }

    fn ensure_open(&self) -> Result<(), SubstrateError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubstrateError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterSubstrate for MemorySubstrate {
    fn local_member(&self) -> Member {
        self.member.clone()
    }

    fn members(&self) -> Vec<Member> {
        self.hub.members.read().clone()
    }

    fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Member {} is shut down, listener not registered", self.member);
            return;
        }
        self.hub
            .membership_listeners
            .write()
            .push((self.member.uuid().to_string(), listener));
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TopicListener>,
    ) -> Result<(), SubstrateError> {
        self.ensure_open()?;
        self.hub
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((self.member.uuid().to_string(), listener));
        debug!("Member {} subscribed to '{}'", self.member, topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        notification: &ClusterNotification,
    ) -> Result<(), SubstrateError> {
        self.ensure_open()?;
        if self.hub.unreachable.load(Ordering::SeqCst) {
            return Err(SubstrateError::Unreachable(format!(
                "topic '{}' is not reachable",
                topic
            )));
        }

        // Snapshot so no map lock is held while listeners run
        let listeners: Vec<Arc<dyn TopicListener>> = self
            .hub
            .topics
            .get(topic)
            .map(|subs| subs.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener.on_message(notification.clone()).await;
        }
        Ok(())
    }

    async fn next_id(&self, counter: &str) -> Result<u64, SubstrateError> {
        self.ensure_open()?;
        let mut value = self.hub.counters.entry(counter.to_string()).or_insert(0);
        let id = *value;
        *value += 1;
        Ok(id)
    }

    async fn shutdown(&self) -> Result<(), SubstrateError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.hub().remove(self.member.uuid()).await;
        Ok(())
    }
}
