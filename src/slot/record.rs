//! Slot wire record
//!
//! Transmittable form of a slot, used when slot metadata travels between
//! nodes or to external storage. The history is carried in its encoded
//! string form. Records are serialized with bincode for the binary path and
//! with serde for JSON.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use super::error::Result;
use super::Slot;

/// Serializable slot metadata
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SlotRecord {
    pub start_message_id: u64,
    pub end_message_id: u64,
    pub message_count: u64,
    pub storage_queue_name: Option<String>,
    pub destination: String,
    pub active: bool,
    /// Encoded history, e.g. `1%2%5%`
    pub states: String,
}

impl SlotRecord {
    /// Encode to bytes using bincode
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decode from bytes using bincode
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (record, _) = bincode::decode_from_slice(data, bincode::config::standard())?;
        Ok(record)
    }
}

impl Slot {
    pub fn to_record(&self) -> SlotRecord {
        SlotRecord {
            start_message_id: self.start_message_id,
            end_message_id: self.end_message_id,
            message_count: self.message_count,
            storage_queue_name: self.storage_queue_name.clone(),
            destination: self.destination.clone(),
            active: self.active,
            states: self.encode_states(),
        }
    }

    /// Rebuild a slot, validating the range and replaying the history
    pub fn from_record(record: &SlotRecord) -> Result<Self> {
        let mut slot = Slot::new(
            record.start_message_id,
            record.end_message_id,
            record.destination.clone(),
        )?;
        slot.storage_queue_name = record.storage_queue_name.clone();
        slot.message_count = record.message_count;
        slot.active = record.active;
        slot.restore_states(&record.states)?;
        Ok(slot)
    }
}
