//! Cluster members and node ranking.

use std::fmt;
use std::net::SocketAddr;

/// Prefix of every node ID string
pub const NODE_NAME_PREFIX: &str = "NODE/";

/// A broker node as seen by the membership substrate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    uuid: String,
    address: SocketAddr,
}

impl Member {
    pub fn new(uuid: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            uuid: uuid.into(),
            address,
        }
    }

    /// Substrate-assigned UUID
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Node ID in the form `NODE/<ip-address>_<uuid>`
    pub fn node_id(&self) -> String {
        format!("{}{}_{}", NODE_NAME_PREFIX, self.address.ip(), self.uuid)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_id())
    }
}

/// Rank of `uuid` among the sorted UUIDs of `members`.
///
/// Every node evaluating the same membership gets the same answer. Nodes that
/// see different memberships (during a join or leave) can disagree.
pub fn rank_of(members: &[Member], uuid: &str) -> Option<usize> {
    let mut uuids: Vec<&str> = members.iter().map(Member::uuid).collect();
    uuids.sort_unstable();
    uuids.binary_search(&uuid).ok()
}
