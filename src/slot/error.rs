//! Slot error types.

use super::state::SlotState;

/// Errors raised by slot operations.
///
/// `InvalidTransition`, `MalformedState` and `UnknownStateCode` indicate a
/// sequencing defect or corrupted history and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The requested state is not a legal successor of the current one
    #[error("invalid slot state transition for {slot_id}: {} -> {attempted}", fmt_current(.current))]
    InvalidTransition {
        slot_id: String,
        attempted: SlotState,
        current: Option<SlotState>,
    },

    /// A token in an encoded history is not a number
    #[error("malformed slot state token '{0}'")]
    MalformedState(String),

    /// A numeric code does not name any state
    #[error("unknown slot state code {0}")]
    UnknownStateCode(u8),

    /// `start` is greater than `end`
    #[error("invalid slot range {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    /// The slot has no storage queue and cannot be keyed
    #[error("slot {0} has no storage queue name")]
    MissingStorageQueue(String),

    /// A slot with the same identity is already tracked
    #[error("slot {0} is already tracked")]
    Duplicate(String),

    /// No tracked slot has this identity
    #[error("slot {0} not found")]
    NotFound(String),

    /// Wire record could not be encoded or decoded
    #[error("slot record codec error: {0}")]
    Codec(String),
}

fn fmt_current(current: &Option<SlotState>) -> String {
    match current {
        Some(state) => state.to_string(),
        None => "<empty>".to_string(),
    }
}

impl From<bincode::error::EncodeError> for SlotError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for SlotError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type for slot operations.
pub type Result<T> = std::result::Result<T, SlotError>;
