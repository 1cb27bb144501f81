//! Status - コンパクタの観測用スナップショット

use serde::Serialize;

use super::compactor::CompactorState;

/// Point-in-time view of the compactor, for logs and health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactorStatus {
    pub state: CompactorState,
    /// Whether the tick loop task is still alive.
    pub loop_active: bool,
    /// Tokens currently queued.
    pub pending: usize,
    pub capacity: usize,
    /// Tokens refused because the queue was full or closed.
    pub dropped: u64,
    /// Successful compactions.
    pub compactions: u64,
    pub failures: u64,
    /// Rows physically removed across all compactions.
    pub purged_total: u64,
}

impl CompactorStatus {
    pub fn is_saturated(&self) -> bool {
        self.pending >= self.capacity
    }
}
