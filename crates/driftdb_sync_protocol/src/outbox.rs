//! Outbox of locally generated operations.

use crate::operation::SyncOperation;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Locally generated operations awaiting acknowledgement by the server.
///
/// # Invariants
///
/// - Operations are kept in ascending clock order
/// - Acknowledged operations are dropped immediately
/// - The server cursor only moves forward
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbox {
    entries: VecDeque<SyncOperation>,
    last_acknowledged: u64,
    server_cursor: u64,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    pub fn push(&mut self, operation: SyncOperation) {
        self.entries.push_back(operation);
    }

    /// Returns up to `limit` pending operations, oldest first.
    pub fn pending(&self, limit: usize) -> Vec<SyncOperation> {
        self.entries.iter().take(limit).cloned().collect()
    }

    /// Iterates over all pending operations.
    pub fn iter(&self) -> impl Iterator<Item = &SyncOperation> {
        self.entries.iter()
    }

    /// Drops every operation with a clock at or below `clock`.
    pub fn acknowledge_up_to(&mut self, clock: u64) {
        while self
            .entries
            .front()
            .is_some_and(|op| op.stamp.clock <= clock)
        {
            self.entries.pop_front();
        }
        self.last_acknowledged = self.last_acknowledged.max(clock);
    }

    /// Returns the highest acknowledged clock.
    pub fn last_acknowledged(&self) -> u64 {
        self.last_acknowledged
    }

    /// Returns the server cursor (position of the last pulled operation).
    pub fn server_cursor(&self) -> u64 {
        self.server_cursor
    }

    /// Advances the server cursor. Older cursors are ignored.
    pub fn set_server_cursor(&mut self, cursor: u64) {
        self.server_cursor = self.server_cursor.max(cursor);
    }

    /// Returns the number of pending operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ReplicaId, Stamp};
    use crate::operation::OperationKind;
    use driftdb_codec::{ObjectKey, RowId};

    fn make_op(clock: u64) -> SyncOperation {
        SyncOperation::new(
            Stamp::new(clock, ReplicaId::from_u128(1)),
            ObjectKey::new("Item", RowId::from_u128(u128::from(clock))),
            OperationKind::CreateObject,
        )
    }

    #[test]
    fn pending_in_order() {
        let mut outbox = Outbox::new();
        for clock in 1..=5 {
            outbox.push(make_op(clock));
        }
        let batch = outbox.pending(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].clock(), 1);
        assert_eq!(batch[2].clock(), 3);
    }

    #[test]
    fn acknowledge_drops_prefix() {
        let mut outbox = Outbox::new();
        for clock in 1..=5 {
            outbox.push(make_op(clock));
        }
        outbox.acknowledge_up_to(3);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pending(10)[0].clock(), 4);
        assert_eq!(outbox.last_acknowledged(), 3);

        // Stale acknowledgements are harmless.
        outbox.acknowledge_up_to(1);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.last_acknowledged(), 3);
    }

    #[test]
    fn server_cursor_is_monotonic() {
        let mut outbox = Outbox::new();
        outbox.set_server_cursor(10);
        outbox.set_server_cursor(4);
        assert_eq!(outbox.server_cursor(), 10);
    }
}
