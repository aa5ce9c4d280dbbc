//! Sync engine state machine.

use crate::applier::SyncApplier;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use driftdb_sync_protocol::{HandshakeRequest, PullRequest, PushRequest};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Opening a session with the server.
    Connecting,
    /// Downloading remote operations.
    Pulling,
    /// Uploading local operations.
    Pushing,
    /// Last cycle completed.
    Synced,
    /// Last cycle failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is talking to the server.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pulling | SyncState::Pushing
        )
    }

    /// Returns true if a new cycle may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Which half of a cycle to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to local store.
    Download,
    /// Local store to server.
    Upload,
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Operations downloaded and handed to the store.
    pub operations_pulled: u64,
    /// Operations the server acknowledged.
    pub operations_pushed: u64,
    /// Downloaded operations skipped as already applied.
    pub duplicates_skipped: u64,
    /// Retries performed.
    pub retries: u64,
    /// Completion time of the last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Operations downloaded.
    pub pulled: u64,
    /// Operations uploaded.
    pub pushed: u64,
    /// Downloaded operations that were already applied.
    pub duplicates: u64,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Progress callback: direction, fraction transferred in `[0, 1]`, finished.
pub type ProgressHandler = Box<dyn Fn(Direction, f64, bool) + Send + Sync>;

/// Drives the pull/push protocol for one replica.
pub struct SyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    transport: Arc<T>,
    applier: Arc<A>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    progress: RwLock<Option<ProgressHandler>>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport, A: SyncApplier> SyncEngine<T, A> {
    /// Creates an engine. The transport may be shared with other engines.
    pub fn new(config: SyncConfig, transport: Arc<T>, applier: Arc<A>) -> Self {
        Self {
            config,
            transport,
            applier,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            progress: RwLock::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the applier.
    pub fn applier(&self) -> &Arc<A> {
        &self.applier
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Installs a progress callback, replacing any previous one.
    pub fn set_progress_handler(&self, handler: Option<ProgressHandler>) {
        *self.progress.write() = handler;
    }

    /// Stops the running cycle at its next batch boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if the engine has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(replica = %self.applier.replica(), ?previous, ?state, "sync state");
        }
    }

    fn report(&self, direction: Direction, fraction: f64, finished: bool) {
        if let Some(handler) = self.progress.read().as_ref() {
            handler(direction, fraction.clamp(0.0, 1.0), finished);
        }
    }

    /// Runs a full cycle: download, then upload.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        self.run(&[Direction::Download, Direction::Upload])
    }

    /// Downloads and merges everything the server has for this replica.
    pub fn download(&self) -> SyncResult<SyncCycleResult> {
        self.run(&[Direction::Download])
    }

    /// Uploads every pending local operation.
    pub fn upload(&self) -> SyncResult<SyncCycleResult> {
        self.run(&[Direction::Upload])
    }

    /// Runs `direction` with retries on transient errors.
    pub fn run_with_retry(&self, direction: Option<Direction>) -> SyncResult<SyncCycleResult> {
        let phases: &[Direction] = match direction {
            Some(Direction::Download) => &[Direction::Download],
            Some(Direction::Upload) => &[Direction::Upload],
            None => &[Direction::Download, Direction::Upload],
        };
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            self.check_cancelled()?;

            match self.run(phases) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    tracing::warn!(attempt, error = %e, "sync attempt failed; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        self.run_with_retry(None)
    }

    fn run(&self, phases: &[Direction]) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let state = self.state();
        if !state.can_start_sync() && state != SyncState::RetryWait {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: "sync".into(),
            });
        }

        match self.run_phases(phases) {
            Ok(mut result) => {
                result.duration = start.elapsed();
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.operations_pulled += result.pulled;
                stats.operations_pushed += result.pushed;
                stats.duplicates_skipped += result.duplicates;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                drop(stats);
                tracing::info!(
                    replica = %self.applier.replica(),
                    pulled = result.pulled,
                    pushed = result.pushed,
                    "sync cycle complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_phases(&self, phases: &[Direction]) -> SyncResult<SyncCycleResult> {
        let mut result = SyncCycleResult::default();

        self.set_state(SyncState::Connecting);
        self.handshake()?;

        for phase in phases {
            self.check_cancelled()?;
            match phase {
                Direction::Download => {
                    self.set_state(SyncState::Pulling);
                    let (pulled, duplicates) = self.pull_all()?;
                    result.pulled = pulled;
                    result.duplicates = duplicates;
                }
                Direction::Upload => {
                    self.set_state(SyncState::Pushing);
                    result.pushed = self.push_all()?;
                }
            }
        }
        Ok(result)
    }

    fn handshake(&self) -> SyncResult<()> {
        let request = HandshakeRequest::new(
            self.applier.replica(),
            self.config.partition.clone(),
            self.applier.server_cursor()?,
        );
        let response = self.transport.handshake(&request)?;
        if !response.success {
            return Err(SyncError::ServerError(
                response.error.unwrap_or_else(|| "handshake failed".into()),
            ));
        }
        Ok(())
    }

    /// Pulls until the server reports nothing remaining.
    fn pull_all(&self) -> SyncResult<(u64, u64)> {
        let replica = self.applier.replica();
        let mut pulled = 0u64;
        let mut duplicates = 0u64;
        self.report(Direction::Download, 0.0, false);

        loop {
            self.check_cancelled()?;

            let cursor = self.applier.server_cursor()?;
            let request = PullRequest::new(replica, cursor, self.config.pull_batch_size);
            let response = self.transport.pull(&request)?;

            // Cancelled mid-request: drop the batch, keep the cursor.
            self.check_cancelled()?;

            if !response.operations.is_empty() {
                let report = self.applier.apply_remote_operations(&response.operations)?;
                pulled += response.operations.len() as u64;
                duplicates += report.duplicates as u64;
            }
            self.applier.set_server_cursor(response.new_cursor)?;

            let total = pulled + response.remaining;
            let fraction = if total == 0 { 1.0 } else { pulled as f64 / total as f64 };
            let finished = !response.has_more();
            self.report(Direction::Download, fraction, finished);
            if finished {
                break;
            }
        }
        Ok((pulled, duplicates))
    }

    /// Pushes pending operations batch by batch until the outbox is empty.
    fn push_all(&self) -> SyncResult<u64> {
        let replica = self.applier.replica();
        let mut pushed = 0u64;
        let total = self.applier.pending_count()? as u64;
        self.report(Direction::Upload, 0.0, total == 0);

        loop {
            self.check_cancelled()?;

            let operations = self
                .applier
                .pending_operations(self.config.push_batch_size)?;
            if operations.is_empty() {
                break;
            }

            let count = operations.len() as u64;
            let request = PushRequest::new(replica, operations);
            let response = self.transport.push(&request)?;
            if !response.success {
                return Err(SyncError::ServerError(
                    response.error.unwrap_or_else(|| "upload rejected".into()),
                ));
            }
            self.applier.acknowledge_operations(response.acknowledged)?;
            pushed += count;

            let remaining = self.applier.pending_count()? as u64;
            let fraction = if total == 0 { 1.0 } else { pushed as f64 / total.max(pushed) as f64 };
            self.report(Direction::Upload, fraction, remaining == 0);
        }
        Ok(pushed)
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
        tracing::warn!(replica = %self.applier.replica(), error = %error, "sync cycle failed");
    }
}

impl<T: SyncTransport, A: SyncApplier> std::fmt::Debug for SyncEngine<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("partition", &self.config.partition)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
