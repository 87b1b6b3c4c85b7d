//! Cluster Module
//!
//! Cluster membership, node identity and change-notification broadcast for
//! slotwise.
//!
//! # Architecture
//!
//! The [`CoordinationAgent`] sits on top of a [`ClusterSubstrate`], which
//! provides membership, named broadcast topics and a cluster-wide counter:
//! - **Gossip (UDP via chitchat)**: [`GossipSubstrate`] for real clusters
//! - **In-process**: [`MemoryHub`] for single-node deployments and tests
//!
//! Four channels carry metadata changes: subscription, queue, exchange and
//! binding. Every node registers [`NotificationHandler`]s per channel and
//! applies each received [`ClusterNotification`] locally.
//!
//! # Usage
//!
//! ```toml
//! # slotwise.toml
//! [cluster]
//! enabled = true
//! gossip_addr = "0.0.0.0:7946"
//! seeds = ["node1:7946", "node2:7946"]
//! ```

mod agent;
mod error;
mod gossip;
mod handlers;
mod member;
mod memory;
mod notification;
mod substrate;

pub use agent::CoordinationAgent;
pub use error::{CoordinationError, HandlerError, SubstrateError};
pub use gossip::GossipSubstrate;
pub use handlers::{
    ChannelFanout, ChannelHandlers, HandlerResult, LoggingHandler, NotificationHandler,
};
pub use member::{rank_of, Member, NODE_NAME_PREFIX};
pub use memory::{MemoryHub, MemorySubstrate};
pub use notification::{ClusterNotification, NotificationChannel};
pub use substrate::{ClusterSubstrate, MembershipListener, TopicListener};

// Re-export cluster config
pub use crate::config::{ClusterConfig, CoordinationConfig};
