//! Notification Handlers
//!
//! Per-channel handler lists. Each channel's topic listener forwards every
//! notification to the handlers registered for that channel, in registration
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::HandlerError;
use super::notification::{ClusterNotification, NotificationChannel};
use super::substrate::TopicListener;

/// Handler result type
pub type HandlerResult = Result<(), HandlerError>;

/// Applies a change notification to local state
///
/// Notifications can be redelivered, and arrive in order only with respect
/// to a single sender, so implementations must be idempotent.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn on_notification(
        &self,
        channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> HandlerResult;
}

/// Implement NotificationHandler for Arc<T> where T: NotificationHandler
#[async_trait]
impl<T: NotificationHandler + ?Sized> NotificationHandler for Arc<T> {
    async fn on_notification(
        &self,
        channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> HandlerResult {
        (**self).on_notification(channel, notification).await
    }
}

/// Handler that only logs what it receives
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl NotificationHandler for LoggingHandler {
    async fn on_notification(
        &self,
        channel: NotificationChannel,
        notification: &ClusterNotification,
    ) -> HandlerResult {
        debug!(
            "Cluster {} notification: {} ({} bytes)",
            channel,
            notification.description(),
            notification.payload().len()
        );
        Ok(())
    }
}

/// Handlers registered per channel
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    handlers: HashMap<NotificationChannel, Vec<Arc<dyn NotificationHandler>>>,
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to a channel
    pub fn add<H: NotificationHandler + 'static>(&mut self, channel: NotificationChannel, handler: H) {
        self.handlers
            .entry(channel)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Append a handler and return self for chaining
    pub fn with<H: NotificationHandler + 'static>(
        mut self,
        channel: NotificationChannel,
        handler: H,
    ) -> Self {
        self.add(channel, handler);
        self
    }

    /// Number of handlers on a channel
    pub fn count(&self, channel: NotificationChannel) -> usize {
        self.handlers.get(&channel).map_or(0, Vec::len)
    }

    /// Topic listener dispatching to this channel's handlers
    pub fn fanout(&self, channel: NotificationChannel) -> ChannelFanout {
        ChannelFanout {
            channel,
            handlers: self.handlers.get(&channel).cloned().unwrap_or_default(),
        }
    }
}

/// Topic listener for one channel
pub struct ChannelFanout {
    channel: NotificationChannel,
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl ChannelFanout {
    pub fn channel(&self) -> NotificationChannel {
        self.channel
    }

    /// Call every handler in order. A failing handler is logged and does not
    /// stop the ones after it; the number of failures is returned.
    pub async fn dispatch(&self, notification: &ClusterNotification) -> usize {
        let mut failures = 0;
        for handler in &self.handlers {
            if let Err(e) = handler.on_notification(self.channel, notification).await {
                failures += 1;
                warn!(
                    "Cluster {} handler failed on '{}': {}",
                    self.channel,
                    notification.description(),
                    e
                );
            }
        }
        failures
    }
}

#[async_trait]
impl TopicListener for ChannelFanout {
    async fn on_message(&self, notification: ClusterNotification) {
        self.dispatch(&notification).await;
    }
}
