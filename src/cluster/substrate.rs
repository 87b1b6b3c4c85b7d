//! Membership/Broadcast Substrate
//!
//! Contract the coordination agent needs from the layer that provides cluster
//! membership, named broadcast topics and a cluster-wide counter.
//!
//! Implemented by:
//! - `MemorySubstrate`: in-process hub for single-node deployments and tests
//! - `GossipSubstrate`: chitchat gossip over UDP

use std::sync::Arc;

use async_trait::async_trait;

use super::error::SubstrateError;
use super::member::Member;
use super::notification::ClusterNotification;

/// Receives every notification published on a subscribed topic
#[async_trait]
pub trait TopicListener: Send + Sync {
    /// Called once per delivered notification.
    ///
    /// Runs on a substrate task; must not block indefinitely or later
    /// notifications on the same topic are held up.
    async fn on_message(&self, notification: ClusterNotification);
}

/// Reacts to nodes joining and leaving
#[async_trait]
pub trait MembershipListener: Send + Sync {
    async fn on_member_added(&self, _member: &Member) {
        // Default: no-op
    }

    async fn on_member_removed(&self, _member: &Member) {
        // Default: no-op
    }
}

/// Cluster membership and broadcast provider
///
/// Membership reads are expected to be fast reads of a locally cached view.
/// Topics must be named, multi-subscriber and deliver each sender's
/// notifications to every receiver in the order that sender published them.
#[async_trait]
pub trait ClusterSubstrate: Send + Sync {
    /// The member this process runs as
    fn local_member(&self) -> Member;

    /// Currently known members, including the local one.
    ///
    /// Live view: the result can change between calls.
    fn members(&self) -> Vec<Member>;

    /// Register a listener for join/leave events
    fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>);

    /// Attach a listener to a named topic
    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TopicListener>,
    ) -> Result<(), SubstrateError>;

    /// Broadcast a notification to every subscriber of `topic`
    async fn publish(
        &self,
        topic: &str,
        notification: &ClusterNotification,
    ) -> Result<(), SubstrateError>;

    /// Draw the next value of a named cluster-wide counter
    async fn next_id(&self, counter: &str) -> Result<u64, SubstrateError>;

    /// Leave the cluster and release resources
    async fn shutdown(&self) -> Result<(), SubstrateError>;
}
