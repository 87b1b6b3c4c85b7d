//! Coordination Agent
//!
//! Gateway to cluster membership and the four change-notification channels.
//! The agent is built once by the composition root and shared by handle; its
//! lifecycle is explicit through [`CoordinationAgent::start`] and
//! [`CoordinationAgent::shutdown`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::config::CoordinationConfig;

use super::error::{CoordinationError, SubstrateError};
use super::handlers::ChannelHandlers;
use super::member::{rank_of, Member};
use super::notification::{ClusterNotification, NotificationChannel};
use super::substrate::{ClusterSubstrate, MembershipListener};

/// State established by a successful start
#[derive(Debug)]
struct Started {
    /// Seed for globally unique message IDs
    unique_id: u32,
}

/// Cluster coordination service for one broker node
pub struct CoordinationAgent {
    substrate: Arc<dyn ClusterSubstrate>,
    handlers: ChannelHandlers,
    config: CoordinationConfig,
    membership_listeners: Vec<Arc<dyn MembershipListener>>,
    started: OnceCell<Started>,
    stopped: AtomicBool,
    /// Registration steps already done by an earlier, failed start
    listening: AtomicBool,
    subscribed: Mutex<HashSet<NotificationChannel>>,
}

impl CoordinationAgent {
    pub fn new(
        substrate: Arc<dyn ClusterSubstrate>,
        handlers: ChannelHandlers,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            substrate,
            handlers,
            config,
            membership_listeners: Vec::new(),
            started: OnceCell::new(),
            stopped: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    /// Add a listener that is told about joins and leaves once started
    pub fn with_membership_listener<L: MembershipListener + 'static>(mut self, listener: L) -> Self {
        self.membership_listeners.push(Arc::new(listener));
        self
    }

    /// Connect to the substrate, subscribe the channels and draw the node's
    /// unique id.
    ///
    /// Runs at most once: concurrent and repeated calls wait for and share
    /// the first successful initialization. A failed start can be retried;
    /// the retry only redoes the steps that did not complete. Starting after
    /// [`CoordinationAgent::shutdown`] fails.
    pub async fn start(&self) -> Result<(), CoordinationError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CoordinationError::Shutdown(SubstrateError::Closed));
        }
        self.started.get_or_try_init(|| self.initialize()).await?;
        Ok(())
    }

    async fn initialize(&self) -> Result<Started, CoordinationError> {
        info!("Initializing coordination agent");

        if !self.listening.swap(true, Ordering::SeqCst) {
            self.substrate
                .add_membership_listener(Arc::new(AgentMembershipListener {
                    forward: self.membership_listeners.clone(),
                }));
        }

        for channel in NotificationChannel::ALL {
            if self.subscribed.lock().contains(&channel) {
                continue;
            }
            let topic = self.config.topic_name(channel);
            let fanout = self.handlers.fanout(channel);
            self.substrate
                .subscribe(topic, Arc::new(fanout))
                .await
                .map_err(CoordinationError::Initialization)?;
            self.subscribed.lock().insert(channel);
            info!(
                "Subscribed {} channel '{}' ({} handlers)",
                channel,
                topic,
                self.handlers.count(channel)
            );
        }

        let id = self
            .substrate
            .next_id(&self.config.id_counter)
            .await
            .map_err(CoordinationError::Initialization)?;
        let unique_id = u32::try_from(id).map_err(|_| CoordinationError::UniqueIdOutOfRange(id))?;

        info!("Successfully initialized coordination agent");
        info!("Unique ID generation for message ID generation: {}", unique_id);
        Ok(Started { unique_id })
    }

    /// Leave the cluster. Idempotent.
    pub async fn shutdown(&self) -> Result<(), CoordinationError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping coordination agent");
        self.substrate
            .shutdown()
            .await
            .map_err(CoordinationError::Shutdown)
    }

    pub fn is_started(&self) -> bool {
        self.started.initialized() && !self.stopped.load(Ordering::SeqCst)
    }

    /// Node ID of the local member, `NODE/<ip>_<uuid>`
    pub fn node_id(&self) -> String {
        self.local_member().node_id()
    }

    pub fn local_member(&self) -> Member {
        self.substrate.local_member()
    }

    /// Currently known members; may change between calls
    pub fn all_cluster_members(&self) -> Vec<Member> {
        self.substrate.members()
    }

    /// Node IDs of all current members, in membership order
    pub fn members_node_ids(&self) -> Vec<String> {
        self.all_cluster_members()
            .iter()
            .map(Member::node_id)
            .collect()
    }

    pub fn id_of_node(&self, member: &Member) -> String {
        member.node_id()
    }

    pub fn cluster_size(&self) -> usize {
        self.substrate.members().len()
    }

    /// Unique id drawn from the cluster counter at start
    pub fn unique_id_for_node(&self) -> Result<u32, CoordinationError> {
        self.started
            .get()
            .map(|s| s.unique_id)
            .ok_or(CoordinationError::NotStarted)
    }

    /// Position of `member` among all member UUIDs sorted lexicographically,
    /// or `None` if it is not a current member.
    ///
    /// Consistent across nodes only while they observe the same membership.
    pub fn index_of_node(&self, member: &Member) -> Option<usize> {
        rank_of(&self.substrate.members(), member.uuid())
    }

    pub fn index_of_local_node(&self) -> Option<usize> {
        self.index_of_node(&self.local_member())
    }

    pub async fn notify_subscriptions_changed(
        &self,
        notification: &ClusterNotification,
    ) -> Result<(), CoordinationError> {
        self.notify(NotificationChannel::Subscription, notification)
            .await
    }

    pub async fn notify_queues_changed(
        &self,
        notification: &ClusterNotification,
    ) -> Result<(), CoordinationError> {
        self.notify(NotificationChannel::Queue, notification).await
    }

    pub async fn notify_exchanges_changed(
        &self,
        notification: &ClusterNotification,
    ) -> Result<(), CoordinationError> {
        self.notify(NotificationChannel::Exchange, notification)
            .await
    }

    pub async fn notify_bindings_changed(
        &self,
        notification: &ClusterNotification,
    ) -> Result<(), CoordinationError> {
        self.notify(NotificationChannel::Binding, notification)
            .await
    }

    /// Publish on a channel. Failures are logged and returned; retrying is
    /// up to the caller.
    pub async fn notify(
        &self,
        channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> Result<(), CoordinationError> {
        info!("GOSSIP: {}", notification.description());
        self.substrate
            .publish(self.config.topic_name(channel), notification)
            .await
            .map_err(|source| {
                error!(
                    "Error while sending {} change notification: {}",
                    channel, source
                );
                CoordinationError::Publish { channel, source }
            })
    }
}

/// Logs membership changes and forwards them to registered listeners
struct AgentMembershipListener {
    forward: Vec<Arc<dyn MembershipListener>>,
}

#[async_trait]
impl MembershipListener for AgentMembershipListener {
    async fn on_member_added(&self, member: &Member) {
        info!("Member joined the cluster: {}", member);
        for listener in &self.forward {
            listener.on_member_added(member).await;
        }
    }

    async fn on_member_removed(&self, member: &Member) {
        info!("Member left the cluster: {}", member);
        for listener in &self.forward {
            listener.on_member_removed(member).await;
        }
    }
}
