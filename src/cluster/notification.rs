//! Cluster notifications and the channels that carry them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata domain a notification belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    /// Subscriber attached or detached
    Subscription,
    /// Queue created, deleted or purged
    Queue,
    /// Exchange created or deleted
    Exchange,
    /// Binding created or deleted
    Binding,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [
        NotificationChannel::Subscription,
        NotificationChannel::Exchange,
        NotificationChannel::Queue,
        NotificationChannel::Binding,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Subscription => "subscription",
            NotificationChannel::Queue => "queue",
            NotificationChannel::Exchange => "exchange",
            NotificationChannel::Binding => "binding",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change event broadcast verbatim to every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNotification {
    description: String,
    payload: String,
}

impl ClusterNotification {
    pub fn new(description: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            payload: payload.into(),
        }
    }

    /// Human-readable summary, used in logs
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Opaque encoded change, interpreted by handlers
    pub fn payload(&self) -> &str {
        &self.payload
    }
}
