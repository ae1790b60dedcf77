use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-assigned order identifier, unique within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    /// Placeholder carried by strategy-built orders until the engine stamps them.
    pub const UNASSIGNED: OrderId = OrderId(0);
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sequential id generator. Starts at 1 so 0 stays reserved for unassigned.
#[derive(Debug, Clone)]
pub struct IdGen {
    next_order: u64,
}

impl Default for IdGen {
    fn default() -> Self {
        Self { next_order: 1 }
    }
}

impl IdGen {
    pub fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order);
        self.next_order += 1;
        id
    }
}

/// Deterministic run identifier: BLAKE3 of the run configuration. The
/// dataset is identified separately by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub [u8; 32]);

impl RunId {
    /// BLAKE3 over arbitrary bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}
