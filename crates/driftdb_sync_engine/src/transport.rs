//! Transport abstraction and the in-memory relay server.

use crate::error::{SyncError, SyncResult};
use driftdb_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    ReplicaId, SyncOperation,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// A sync transport carries protocol messages to a sync server.
///
/// Implementations are blocking; the session runs them on tokio's blocking
/// pool.
pub trait SyncTransport: Send + Sync {
    /// Opens a session.
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse>;

    /// Downloads operations after a cursor.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Uploads local operations.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

#[derive(Debug, Default)]
struct Partition {
    /// Operations in arrival order; the cursor is the 1-based position.
    log: Vec<SyncOperation>,
    /// Highest clock stored per replica.
    acknowledged: HashMap<ReplicaId, u64>,
}

/// In-memory relay implementing the server side of the protocol.
///
/// Keeps one log per partition and fans every uploaded operation out to the
/// other replicas of that partition. Uploads are deduplicated per replica, so
/// a client resending an unacknowledged batch is harmless.
///
/// Latency and failures can be injected for tests.
#[derive(Debug)]
pub struct MemoryServer {
    partitions: RwLock<HashMap<String, Partition>>,
    sessions: RwLock<HashMap<ReplicaId, String>>,
    connected: AtomicBool,
    fail_next: AtomicU32,
    latency: Mutex<Duration>,
    max_batch: u32,
}

impl MemoryServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::with_max_batch(1000)
    }

    /// Creates a server that returns at most `max_batch` operations per pull.
    pub fn with_max_batch(max_batch: u32) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
            max_batch: max_batch.max(1),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `count` requests fail with a retryable error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns the number of operations stored for a partition.
    pub fn log_len(&self, partition: &str) -> usize {
        self.partitions
            .read()
            .get(partition)
            .map_or(0, |p| p.log.len())
    }

    /// Returns the highest clock stored for a replica in a partition.
    pub fn acknowledged(&self, partition: &str, replica: ReplicaId) -> u64 {
        self.partitions
            .read()
            .get(partition)
            .and_then(|p| p.acknowledged.get(&replica).copied())
            .unwrap_or(0)
    }

    fn enter(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::transport_retryable("injected failure"));
        }
        Ok(())
    }

    fn partition_of(&self, replica: ReplicaId) -> SyncResult<String> {
        self.sessions
            .read()
            .get(&replica)
            .cloned()
            .ok_or_else(|| SyncError::ServerError(format!("no session for {replica}")))
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MemoryServer {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.enter()?;
        if let Err(err) = request.check_version() {
            return Ok(HandshakeResponse::error(err.to_string()));
        }
        self.sessions
            .write()
            .insert(request.replica, request.partition.clone());
        let cursor = self
            .partitions
            .write()
            .entry(request.partition.clone())
            .or_default()
            .log
            .len() as u64;
        tracing::debug!(replica = %request.replica, partition = %request.partition, cursor, "handshake");
        Ok(HandshakeResponse::success(cursor))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.enter()?;
        let name = self.partition_of(request.replica)?;
        let partitions = self.partitions.read();
        let Some(partition) = partitions.get(&name) else {
            return Ok(PullResponse::new(Vec::new(), request.cursor, 0));
        };

        let limit = request.limit.min(self.max_batch) as usize;
        let start = usize::try_from(request.cursor)
            .unwrap_or(usize::MAX)
            .min(partition.log.len());
        let mut operations = Vec::new();
        let mut new_cursor = start;
        for (index, op) in partition.log.iter().enumerate().skip(start) {
            if operations.len() == limit {
                break;
            }
            new_cursor = index + 1;
            if op.replica() != request.replica {
                operations.push(op.clone());
            }
        }
        let remaining = partition.log[new_cursor..]
            .iter()
            .filter(|op| op.replica() != request.replica)
            .count() as u64;

        Ok(PullResponse::new(operations, new_cursor as u64, remaining))
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.enter()?;
        if let Err(err) = request.validate() {
            return Ok(PushResponse::error(err.to_string()));
        }
        let name = self.partition_of(request.replica)?;
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(name).or_default();

        let stored = partition
            .acknowledged
            .get(&request.replica)
            .copied()
            .unwrap_or(0);
        let fresh: Vec<_> = request
            .operations
            .iter()
            .filter(|op| op.clock() > stored)
            .cloned()
            .collect();
        let accepted = fresh.len();
        partition.log.extend(fresh);

        let acknowledged = request.max_clock().unwrap_or(0).max(stored);
        partition.acknowledged.insert(request.replica, acknowledged);
        tracing::debug!(
            replica = %request.replica,
            ops = accepted,
            acknowledged,
            "stored upload"
        );
        Ok(PushResponse::success(acknowledged, partition.log.len() as u64))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.set_connected(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::{ObjectKey, RowId};
    use driftdb_sync_protocol::{OperationKind, Stamp};

    fn op(replica: ReplicaId, clock: u64) -> SyncOperation {
        SyncOperation::new(
            Stamp::new(clock, replica),
            ObjectKey::new("Item", RowId::from_u128(u128::from(clock))),
            OperationKind::CreateObject,
        )
    }

    fn connect(server: &MemoryServer, replica: ReplicaId) {
        let response = server
            .handshake(&HandshakeRequest::new(replica, "p", 0))
            .unwrap();
        assert!(response.success);
    }

    #[test]
    fn disconnected_server_rejects_requests() {
        let server = MemoryServer::new();
        server.set_connected(false);
        let result = server.handshake(&HandshakeRequest::new(ReplicaId::new(), "p", 0));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn injected_failures_are_retryable_and_counted() {
        let server = MemoryServer::new();
        server.fail_next(2);
        let request = HandshakeRequest::new(ReplicaId::new(), "p", 0);
        assert!(server.handshake(&request).unwrap_err().is_retryable());
        assert!(server.handshake(&request).is_err());
        assert!(server.handshake(&request).is_ok());
    }

    #[test]
    fn pull_without_session_fails() {
        let server = MemoryServer::new();
        let result = server.pull(&PullRequest::new(ReplicaId::new(), 0, 10));
        assert!(matches!(result, Err(SyncError::ServerError(_))));
    }

    #[test]
    fn pull_skips_own_operations() {
        let server = MemoryServer::new();
        let a = ReplicaId::from_u128(1);
        let b = ReplicaId::from_u128(2);
        connect(&server, a);
        connect(&server, b);

        server
            .push(&PushRequest::new(a, vec![op(a, 1), op(a, 2)]))
            .unwrap();
        server.push(&PushRequest::new(b, vec![op(b, 1)])).unwrap();

        let for_a = server.pull(&PullRequest::new(a, 0, 10)).unwrap();
        assert_eq!(for_a.operations.len(), 1);
        assert_eq!(for_a.operations[0].replica(), b);
        assert_eq!(for_a.new_cursor, 3);
        assert!(!for_a.has_more());

        let for_b = server.pull(&PullRequest::new(b, 0, 1)).unwrap();
        assert_eq!(for_b.operations.len(), 1);
        assert_eq!(for_b.new_cursor, 1);
        assert_eq!(for_b.remaining, 1);
    }

    #[test]
    fn resent_uploads_are_deduplicated() {
        let server = MemoryServer::new();
        let a = ReplicaId::from_u128(1);
        connect(&server, a);

        let batch = PushRequest::new(a, vec![op(a, 1), op(a, 2)]);
        server.push(&batch).unwrap();
        let response = server.push(&batch).unwrap();
        assert!(response.success);
        assert_eq!(response.acknowledged, 2);
        assert_eq!(server.log_len("p"), 2);
        assert_eq!(server.acknowledged("p", a), 2);
    }

    #[test]
    fn invalid_upload_is_rejected() {
        let server = MemoryServer::new();
        let a = ReplicaId::from_u128(1);
        let b = ReplicaId::from_u128(2);
        connect(&server, a);

        let response = server.push(&PushRequest::new(a, vec![op(b, 1)])).unwrap();
        assert!(!response.success);
        assert_eq!(server.log_len("p"), 0);
    }

    #[test]
    fn partitions_are_isolated() {
        let server = MemoryServer::new();
        let a = ReplicaId::from_u128(1);
        let b = ReplicaId::from_u128(2);
        connect(&server, a);
        server
            .handshake(&HandshakeRequest::new(b, "other", 0))
            .unwrap();

        server.push(&PushRequest::new(a, vec![op(a, 1)])).unwrap();
        let response = server.pull(&PullRequest::new(b, 0, 10)).unwrap();
        assert!(response.operations.is_empty());
        assert_eq!(server.log_len("other"), 0);
    }
}
