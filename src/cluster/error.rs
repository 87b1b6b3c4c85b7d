//! Error types for cluster coordination.

use super::notification::NotificationChannel;

/// Errors raised by a membership/broadcast substrate
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    /// The broadcast channel or cluster cannot be reached
    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    /// The substrate has been shut down
    #[error("substrate is shut down")]
    Closed,

    /// Gossip layer failure
    #[error("gossip error: {0}")]
    Gossip(String),

    /// A notification could not be serialized or parsed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The distributed counter could not settle on a value
    #[error("counter '{counter}' not claimed after {attempts} attempts")]
    CounterExhausted { counter: String, attempts: u32 },
}

impl From<serde_json::Error> for SubstrateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors surfaced by the coordination agent
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// The substrate could not be reached while starting; there is no
    /// degraded mode
    #[error("coordination agent initialization failed: {0}")]
    Initialization(#[source] SubstrateError),

    /// The distributed counter returned a value that does not fit a node id
    #[error("unique node id {0} out of range")]
    UniqueIdOutOfRange(u64),

    /// The agent has not been started
    #[error("coordination agent not started")]
    NotStarted,

    /// A change notification could not be published
    #[error("error while sending {channel} change notification")]
    Publish {
        channel: NotificationChannel,
        source: SubstrateError,
    },

    /// The substrate failed to shut down cleanly
    #[error("coordination agent shutdown failed: {0}")]
    Shutdown(#[source] SubstrateError),
}

/// Errors returned by notification handlers
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The notification payload could not be understood
    #[error("invalid notification payload: {0}")]
    InvalidPayload(String),

    /// Applying the change failed
    #[error("handler failed: {0}")]
    Internal(String),
}
