//! Coordination Configuration
//!
//! Names of the notification channels and the unique-id counter. Every node
//! in a cluster must use the same names.

use serde::Deserialize;

use crate::cluster::NotificationChannel;

/// Channel and counter names
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Topic for subscription changes
    pub subscription_topic: String,
    /// Topic for queue changes
    pub queue_topic: String,
    /// Topic for exchange changes
    pub exchange_topic: String,
    /// Topic for binding changes
    pub binding_topic: String,
    /// Counter the node's unique id is drawn from
    pub id_counter: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            subscription_topic: "subscription-changed".to_string(),
            queue_topic: "queue-changed".to_string(),
            exchange_topic: "exchange-changed".to_string(),
            binding_topic: "binding-changed".to_string(),
            id_counter: "message-id-seed".to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Topic name carrying `channel`
    pub fn topic_name(&self, channel: NotificationChannel) -> &str {
        match channel {
            NotificationChannel::Subscription => &self.subscription_topic,
            NotificationChannel::Queue => &self.queue_topic,
            NotificationChannel::Exchange => &self.exchange_topic,
            NotificationChannel::Binding => &self.binding_topic,
        }
    }
}
