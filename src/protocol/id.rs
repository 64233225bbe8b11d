//! Protocol ID, a lightweight, ordered, copyable protocol identifier.

use serde::{Deserialize, Serialize};

/// A unique identifier for a protocol instance registered with the runtime.
///
/// Both nodes of a link carry several protocols (physical layer, link layer)
/// and the midpoint carries one, so protocols rather than nodes are the unit
/// of addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolId(u64);

impl ProtocolId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ProtocolId(id)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}
