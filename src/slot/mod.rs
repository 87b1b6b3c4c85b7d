//! Slot Module
//!
//! A slot is a contiguous range `[start, end]` of a queue's message-ID space
//! and the unit of distributed work assignment. Every slot carries the full
//! history of its lifecycle states; the history only grows through
//! [`Slot::add_state`], which enforces the transition table in
//! [`SlotState::allowed_next`].
//!
//! Slots that are shared between tasks live in a [`SlotTracker`], which
//! serializes mutation per slot.

mod error;
mod record;
mod state;
mod tracker;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use tracing::{debug, error};

pub use error::{Result, SlotError};
pub use record::SlotRecord;
pub use state::{
    check_transition, decode_states, encode_states, lifecycle_state, SlotState, STATE_DELIMITER,
};
pub use tracker::{SlotKey, SlotTracker};


/// A range of message IDs owned by one storage queue
#[derive(Debug, Clone)]
pub struct Slot {
    /// Number of live messages attributed to the slot
    message_count: u64,
    /// First message ID (inclusive)
    start_message_id: u64,
    /// Last message ID (inclusive)
    end_message_id: u64,
    /// Storage queue the slot was carved from, set on assignment
    storage_queue_name: Option<String>,
    /// Destination the messages are routed to
    destination: String,
    /// False once the slot is eligible for removal
    active: bool,
    /// Whether the range overlaps a previously assigned slot
    overlapping: bool,
    /// Lifecycle history, oldest first
    states: Vec<SlotState>,
}

impl Slot {
    /// Create a slot in state `Created`
    pub fn new(start: u64, end: u64, destination: impl Into<String>) -> Result<Self> {
        if start > end {
            return Err(SlotError::InvalidRange { start, end });
        }

        Ok(Self {
            message_count: 0,
            start_message_id: start,
            end_message_id: end,
            storage_queue_name: None,
            destination: destination.into(),
            active: true,
            overlapping: false,
            states: vec![SlotState::Created],
        })
    }

    /// Create a slot already bound to a storage queue
    pub fn with_storage_queue(
        start: u64,
        end: u64,
        destination: impl Into<String>,
        storage_queue_name: impl Into<String>,
    ) -> Result<Self> {
        let mut slot = Self::new(start, end, destination)?;
        slot.storage_queue_name = Some(storage_queue_name.into());
        Ok(slot)
    }

    pub fn start_message_id(&self) -> u64 {
        self.start_message_id
    }

    pub fn end_message_id(&self) -> u64 {
        self.end_message_id
    }

    /// Move the range boundaries. Rejects `start > end` and leaves the slot
    /// unchanged in that case.
    pub fn set_range(&mut self, start: u64, end: u64) -> Result<()> {
        if start > end {
            return Err(SlotError::InvalidRange { start, end });
        }
        self.start_message_id = start;
        self.end_message_id = end;
        Ok(())
    }

    /// Whether `message_id` falls inside this slot
    pub fn contains(&self, message_id: u64) -> bool {
        (self.start_message_id..=self.end_message_id).contains(&message_id)
    }

    /// Whether the two ranges share at least one message ID
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start_message_id <= other.end_message_id
            && other.start_message_id <= self.end_message_id
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn set_message_count(&mut self, message_count: u64) {
        self.message_count = message_count;
    }

    pub fn storage_queue_name(&self) -> Option<&str> {
        self.storage_queue_name.as_deref()
    }

    pub fn set_storage_queue_name(&mut self, storage_queue_name: impl Into<String>) {
        self.storage_queue_name = Some(storage_queue_name.into());
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn set_destination(&mut self, destination: impl Into<String>) {
        self.destination = destination.into();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the slot eligible for removal
    pub fn set_inactive(&mut self) {
        self.active = false;
    }

    pub fn is_overlapping(&self) -> bool {
        self.overlapping
    }

    /// Flag the slot as overlapping a previously assigned range.
    ///
    /// Each call appends one `Overlapped` entry, so repeated marking leaves
    /// consecutive duplicates in the history. Fails once the slot is deleted.
    pub fn mark_overlapping(&mut self) -> Result<()> {
        self.add_state(SlotState::Overlapped)?;
        self.overlapping = true;
        Ok(())
    }

    /// Append `state` to the history if the transition is legal.
    ///
    /// An illegal transition is a sequencing defect: it is logged with the
    /// slot identity and returned, and the history is left untouched.
    pub fn add_state(&mut self, state: SlotState) -> Result<()> {
        match check_transition(&self.states, state) {
            Ok(()) => {
                debug!("Slot {}: {} appended", self.id(), state);
                self.states.push(state);
                Ok(())
            }
            Err(current) => {
                let err = SlotError::InvalidTransition {
                    slot_id: self.id(),
                    attempted: state,
                    current,
                };
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Full lifecycle history, oldest first
    pub fn states(&self) -> &[SlotState] {
        &self.states
    }

    /// Last recorded state, including annotations
    pub fn current_state(&self) -> Option<SlotState> {
        self.states.last().copied()
    }

    /// Last recorded lifecycle state, skipping annotations
    pub fn lifecycle_state(&self) -> Option<SlotState> {
        lifecycle_state(&self.states)
    }

    /// History in its `<code>%<code>%` form
    pub fn encode_states(&self) -> String {
        encode_states(&self.states)
    }

    /// Replace the history with a decoded one.
    ///
    /// The decoded sequence is replayed through the transition table, so a
    /// corrupted history is rejected and the current one kept.
    pub fn restore_states(&mut self, encoded: &str) -> Result<()> {
        let decoded = decode_states(encoded)?;

        let mut replayed = Vec::with_capacity(decoded.len());
        for state in decoded {
            if let Err(current) = check_transition(&replayed, state) {
                return Err(SlotError::InvalidTransition {
                    slot_id: self.id(),
                    attempted: state,
                    current,
                });
            }
            replayed.push(state);
        }
        if replayed.is_empty() {
            return Err(SlotError::MalformedState(encoded.to_string()));
        }

        self.overlapping = replayed.contains(&SlotState::Overlapped);
        self.states = replayed;
        Ok(())
    }

    /// Public key `<storageQueueName>|<start>-<end>`
    pub fn id(&self) -> String {
        format!(
            "{}|{}-{}",
            self.storage_queue_name.as_deref().unwrap_or(""),
            self.start_message_id,
            self.end_message_id
        )
    }

    /// Identity key, available once a storage queue is set
    pub fn key(&self) -> Option<SlotKey> {
        self.storage_queue_name.as_ref().map(|queue| SlotKey {
            storage_queue_name: queue.clone(),
            start_message_id: self.start_message_id,
            end_message_id: self.end_message_id,
        })
    }

    /// Order by start message ID only.
    ///
    /// Slots with the same start compare `Equal` even when they belong to
    /// different queues, so this is not a total order and does not agree with
    /// `==`. Add a secondary key when a strict order is needed.
    pub fn compare_by_start(&self, other: &Slot) -> Ordering {
        self.start_message_id.cmp(&other.start_message_id)
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.start_message_id == other.start_message_id
            && self.end_message_id == other.end_message_id
            && self.storage_queue_name == other.storage_queue_name
    }
}

impl Eq for Slot {}

impl Hash for Slot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start_message_id.hash(state);
        self.end_message_id.hash(state);
        self.storage_queue_name.hash(state);
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slot{{start={}, queue='{}', end={}, states=[",
            self.start_message_id,
            self.storage_queue_name.as_deref().unwrap_or(""),
            self.end_message_id
        )?;
        for (i, state) in self.states.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", state)?;
        }
        f.write_str("]}")
    }
}
