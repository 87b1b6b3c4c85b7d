//! Slot lifecycle states.
//!
//! The numeric codes are part of the persisted and transmitted format and
//! must never be renumbered.

use std::fmt;

use super::error::SlotError;

/// Delimiter placed after every code in an encoded history.
pub const STATE_DELIMITER: char = '%';

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Freshly carved out of a queue's message stream
    Created,
    /// Handed to a node for delivery
    Assigned,
    /// All messages in the range were delivered
    Delivered,
    /// Given back by the node that held it
    Returned,
    /// Annotation: the range overlaps a previously assigned slot
    Overlapped,
    /// Retired, eligible for removal
    Deleted,
}

impl SlotState {
    /// Every state, in code order.
    pub const ALL: [SlotState; 6] = [
        SlotState::Created,
        SlotState::Assigned,
        SlotState::Delivered,
        SlotState::Returned,
        SlotState::Overlapped,
        SlotState::Deleted,
    ];

    /// Stable numeric code
    pub fn code(self) -> u8 {
        match self {
            SlotState::Created => 1,
            SlotState::Assigned => 2,
            SlotState::Delivered => 3,
            SlotState::Returned => 4,
            SlotState::Overlapped => 5,
            SlotState::Deleted => 6,
        }
    }

    /// Inverse of [`SlotState::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SlotState::Created),
            2 => Some(SlotState::Assigned),
            3 => Some(SlotState::Delivered),
            4 => Some(SlotState::Returned),
            5 => Some(SlotState::Overlapped),
            6 => Some(SlotState::Deleted),
            _ => None,
        }
    }

    /// Whether this state is an annotation layered on top of the lifecycle
    /// rather than a step in it.
    pub fn is_annotation(self) -> bool {
        matches!(self, SlotState::Overlapped)
    }

    /// Successors permitted from this lifecycle state.
    ///
    /// This table is the only place transition legality is defined. The
    /// `Overlapped` row is never consulted directly: an overlapped slot is
    /// validated against the lifecycle state beneath the annotation.
    pub fn allowed_next(self) -> &'static [SlotState] {
        use SlotState::*;
        match self {
            Created => &[Assigned, Overlapped, Deleted],
            Assigned => &[Delivered, Returned, Overlapped],
            Delivered => &[Deleted, Overlapped],
            Returned => &[Assigned, Overlapped, Deleted],
            Overlapped => &[],
            Deleted => &[],
        }
    }

    /// Whether `next` may follow this lifecycle state
    pub fn is_valid_next(self, next: SlotState) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Created => "CREATED",
            SlotState::Assigned => "ASSIGNED",
            SlotState::Delivered => "DELIVERED",
            SlotState::Returned => "RETURNED",
            SlotState::Overlapped => "OVERLAPPED",
            SlotState::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// Last non-annotation entry of a history
pub fn lifecycle_state(history: &[SlotState]) -> Option<SlotState> {
    history.iter().rev().copied().find(|s| !s.is_annotation())
}

/// Check whether `next` may be appended to `history`.
///
/// An empty history only accepts `Created`. Otherwise `next` is looked up in
/// the allow-list of the last lifecycle state, skipping trailing annotations.
/// On rejection the current last entry is returned.
pub fn check_transition(history: &[SlotState], next: SlotState) -> Result<(), Option<SlotState>> {
    let current = history.last().copied();
    let allowed = match lifecycle_state(history) {
        Some(base) => base.is_valid_next(next),
        None => current.is_none() && next == SlotState::Created,
    };

    if allowed {
        Ok(())
    } else {
        Err(current)
    }
}

/// Encode a history as `<code>%<code>%...`.
pub fn encode_states(history: &[SlotState]) -> String {
    let mut encoded = String::with_capacity(history.len() * 2);
    for state in history {
        encoded.push_str(&state.code().to_string());
        encoded.push(STATE_DELIMITER);
    }
    encoded
}

/// Decode a history produced by [`encode_states`].
///
/// Empty tokens are skipped, so a missing trailing delimiter is accepted.
/// Legality of the sequence is not checked here.
pub fn decode_states(encoded: &str) -> Result<Vec<SlotState>, SlotError> {
    encoded
        .split(STATE_DELIMITER)
        .filter(|token| !token.is_empty())
        .map(|token| {
            let code: u8 = token
                .trim()
                .parse()
                .map_err(|_| SlotError::MalformedState(token.to_string()))?;
            SlotState::from_code(code).ok_or(SlotError::UnknownStateCode(code))
        })
        .collect()
}
