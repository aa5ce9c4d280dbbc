//! Protocol messages exchanged with the sync server.

use crate::clock::ReplicaId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::SyncOperation;
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Opens a session for one replica on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Replica opening the session.
    pub replica: ReplicaId,
    /// Partition the replica synchronizes.
    pub partition: String,
    /// Protocol version spoken by the client.
    pub protocol_version: u16,
    /// Last server cursor the client has pulled up to.
    pub last_cursor: u64,
}

impl HandshakeRequest {
    /// Creates a handshake request at the current protocol version.
    pub fn new(replica: ReplicaId, partition: impl Into<String>, last_cursor: u64) -> Self {
        Self {
            replica,
            partition: partition.into(),
            protocol_version: PROTOCOL_VERSION,
            last_cursor,
        }
    }

    /// Checks the client's protocol version against ours.
    pub fn check_version(&self) -> ProtocolResult<()> {
        if self.protocol_version == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(ProtocolError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: self.protocol_version,
            })
        }
    }
}

/// Server answer to a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the session was accepted.
    pub success: bool,
    /// Latest cursor on the server.
    pub server_cursor: u64,
    /// Error message when rejected.
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Creates a successful response.
    pub fn success(server_cursor: u64) -> Self {
        Self {
            success: true,
            server_cursor,
            error: None,
        }
    }

    /// Creates a rejection.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            server_cursor: 0,
            error: Some(message.into()),
        }
    }
}

/// Requests operations after `cursor`, excluding the caller's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Requesting replica; its own operations are not echoed back.
    pub replica: ReplicaId,
    /// Exclusive lower bound.
    pub cursor: u64,
    /// Maximum operations to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(replica: ReplicaId, cursor: u64, limit: u32) -> Self {
        Self {
            replica,
            cursor,
            limit,
        }
    }
}

/// A batch of remote operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Operations in server order.
    pub operations: Vec<SyncOperation>,
    /// Cursor to resume from.
    pub new_cursor: u64,
    /// Number of operations still waiting after this batch.
    pub remaining: u64,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(operations: Vec<SyncOperation>, new_cursor: u64, remaining: u64) -> Self {
        Self {
            operations,
            new_cursor,
            remaining,
        }
    }

    /// Returns true if more operations are waiting.
    pub fn has_more(&self) -> bool {
        self.remaining > 0
    }
}

/// Uploads locally generated operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Uploading replica.
    pub replica: ReplicaId,
    /// Operations in ascending clock order.
    pub operations: Vec<SyncOperation>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(replica: ReplicaId, operations: Vec<SyncOperation>) -> Self {
        Self {
            replica,
            operations,
        }
    }

    /// Checks that every operation belongs to the sender and clocks ascend.
    pub fn validate(&self) -> ProtocolResult<()> {
        let mut previous: Option<u64> = None;
        for op in &self.operations {
            if op.replica() != self.replica {
                return Err(ProtocolError::ForeignOperation {
                    expected: self.replica.to_string(),
                    found: op.replica().to_string(),
                    clock: op.clock(),
                });
            }
            if let Some(prev) = previous {
                if op.clock() <= prev {
                    return Err(ProtocolError::OutOfOrder {
                        previous: prev,
                        next: op.clock(),
                    });
                }
            }
            previous = Some(op.clock());
        }
        Ok(())
    }

    /// Returns the highest clock in the batch.
    pub fn max_clock(&self) -> Option<u64> {
        self.operations.last().map(SyncOperation::clock)
    }
}

/// Server answer to a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Whether the batch was accepted.
    pub success: bool,
    /// Highest clock the server has durably stored for this replica.
    pub acknowledged: u64,
    /// Latest server cursor.
    pub new_cursor: u64,
    /// Error message when rejected.
    pub error: Option<String>,
}

impl PushResponse {
    /// Creates a successful response.
    pub fn success(acknowledged: u64, new_cursor: u64) -> Self {
        Self {
            success: true,
            acknowledged,
            new_cursor,
            error: None,
        }
    }

    /// Creates a rejection.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            acknowledged: 0,
            new_cursor: 0,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Stamp;
    use crate::operation::OperationKind;
    use driftdb_codec::{ObjectKey, RowId};

    fn op(replica: ReplicaId, clock: u64) -> SyncOperation {
        SyncOperation::new(
            Stamp::new(clock, replica),
            ObjectKey::new("Item", RowId::from_u128(1)),
            OperationKind::CreateObject,
        )
    }

    #[test]
    fn push_validation_accepts_ascending() {
        let replica = ReplicaId::from_u128(1);
        let push = PushRequest::new(replica, vec![op(replica, 1), op(replica, 3)]);
        assert!(push.validate().is_ok());
        assert_eq!(push.max_clock(), Some(3));
    }

    #[test]
    fn push_validation_rejects_foreign_operations() {
        let replica = ReplicaId::from_u128(1);
        let other = ReplicaId::from_u128(2);
        let push = PushRequest::new(replica, vec![op(other, 1)]);
        assert!(matches!(
            push.validate(),
            Err(ProtocolError::ForeignOperation { clock: 1, .. })
        ));
    }

    #[test]
    fn push_validation_rejects_reordering() {
        let replica = ReplicaId::from_u128(1);
        let push = PushRequest::new(replica, vec![op(replica, 2), op(replica, 2)]);
        assert_eq!(
            push.validate(),
            Err(ProtocolError::OutOfOrder {
                previous: 2,
                next: 2
            })
        );
    }

    #[test]
    fn handshake_version_check() {
        let mut request = HandshakeRequest::new(ReplicaId::from_u128(1), "p", 0);
        assert!(request.check_version().is_ok());
        request.protocol_version = 99;
        assert!(request.check_version().is_err());
    }

    #[test]
    fn pull_response_has_more() {
        assert!(PullResponse::new(vec![], 3, 2).has_more());
        assert!(!PullResponse::new(vec![], 3, 0).has_more());
    }
}
