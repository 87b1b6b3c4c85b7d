//! slotwise - Slot lifecycle tracking and cluster coordination for a
//! clustered message broker
//!
//! A slot is a contiguous range of message ids belonging to one storage
//! queue. Its lifecycle is an append-only history of states checked against
//! a fixed transition table. The coordination agent keeps every broker node
//! informed of membership and of subscription, queue, exchange and binding
//! changes made anywhere in the cluster.

pub mod cluster;
pub mod config;
pub mod slot;

pub use cluster::{
    ClusterNotification, ClusterSubstrate, CoordinationAgent, GossipSubstrate, MemoryHub,
    NotificationChannel,
};
pub use config::Config;
pub use slot::{Slot, SlotError, SlotRecord, SlotState, SlotTracker};
