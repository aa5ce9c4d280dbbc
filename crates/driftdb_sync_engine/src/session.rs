//! Asynchronous sync sessions.
//!
//! A [`SyncSession`] owns a [`SyncEngine`] and runs its blocking cycles on
//! tokio's blocking pool. Callers never block on the network implicitly:
//! they opt into waiting with [`SyncSession::wait_for_download`] and
//! [`SyncSession::wait_for_upload`], each bounded by a timeout.
//!
//! Connectivity is published on a `watch` channel as [`SessionState`].

use crate::applier::SyncApplier;
use crate::engine::{Direction, SyncCycleResult, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connectivity of a session as seen by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Logged out; nothing is transferred until [`SyncSession::start`].
    WaitingForUser,
    /// Started, no exchange completed yet.
    Connecting,
    /// Transfer in progress.
    Progress {
        /// Fraction transferred, in `[0, 1]`.
        fraction: f64,
        /// Whether the transfer is complete.
        finished: bool,
    },
    /// Last exchange completed.
    Active,
    /// Last exchange failed or timed out.
    Error(String),
}

impl SessionState {
    /// Returns true for [`SessionState::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }
}

/// One requested cycle. A wait that times out abandons only its own cycle.
struct Cycle {
    id: u64,
    abandoned: AtomicBool,
}

struct Shared<T: SyncTransport, A: SyncApplier> {
    engine: Arc<SyncEngine<T, A>>,
    state: watch::Sender<SessionState>,
    cycle: Arc<tokio::sync::Mutex<()>>,
    next_cycle: AtomicU64,
    /// Id of the cycle currently holding the engine.
    running: Mutex<Option<u64>>,
    cancelled: AtomicBool,
    logged_in: AtomicBool,
}

impl<T, A> Shared<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    /// Publishes progress unless the session is logged out or has failed.
    fn progress(&self, fraction: f64, finished: bool) {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::WaitingForUser | SessionState::Error(_)) {
                return false;
            }
            *state = SessionState::Progress { fraction, finished };
            true
        });
    }

    fn new_cycle(&self) -> Arc<Cycle> {
        Arc::new(Cycle {
            id: self.next_cycle.fetch_add(1, Ordering::SeqCst),
            abandoned: AtomicBool::new(false),
        })
    }

    async fn run_cycle(
        self: &Arc<Self>,
        direction: Option<Direction>,
        cycle: Arc<Cycle>,
    ) -> SyncResult<SyncCycleResult> {
        let turn = Arc::clone(&self.cycle).lock_owned().await;
        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _turn = turn;
            {
                let mut running = shared.running.lock();
                shared.engine.reset_cancel();
                if shared.cancelled.load(Ordering::SeqCst) || cycle.abandoned.load(Ordering::SeqCst) {
                    return Err(SyncError::Cancelled);
                }
                if !shared.logged_in.load(Ordering::SeqCst) {
                    return Err(SyncError::LoggedOut);
                }
                *running = Some(cycle.id);
            }
            let result = shared.engine.run_with_retry(direction);
            *shared.running.lock() = None;
            result
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }

    /// Gives up on `cycle`, stopping the engine only if that cycle is the
    /// one running.
    fn abandon(&self, cycle: &Cycle) {
        let running = self.running.lock();
        cycle.abandoned.store(true, Ordering::SeqCst);
        if *running == Some(cycle.id) {
            self.engine.cancel();
        }
    }

    fn stopped(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || !self.logged_in.load(Ordering::SeqCst)
    }
}

/// A running sync session for one replica.
///
/// Dropping the session stops its background task.
pub struct SyncSession<T: SyncTransport + 'static, A: SyncApplier + 'static> {
    shared: Arc<Shared<T, A>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl<T, A> SyncSession<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    /// Creates a logged-out session around an engine.
    pub fn new(engine: Arc<SyncEngine<T, A>>) -> Self {
        let (state, _) = watch::channel(SessionState::WaitingForUser);
        let shared = Arc::new(Shared {
            engine,
            state,
            cycle: Arc::new(tokio::sync::Mutex::new(())),
            next_cycle: AtomicU64::new(0),
            running: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        shared
            .engine
            .set_progress_handler(Some(Box::new(move |_, fraction, finished| {
                if let Some(shared) = weak.upgrade() {
                    shared.progress(fraction, finished);
                }
            })));

        Self {
            shared,
            background: Mutex::new(None),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<T, A>> {
        &self.shared.engine
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Logs in and, if the engine has a sync interval, starts background sync.
    ///
    /// Also restarts a session after [`cancel`](Self::cancel) or
    /// [`log_out`](Self::log_out). Background sync needs a tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        self.shared.cancelled.store(false, Ordering::SeqCst);
        self.shared.logged_in.store(true, Ordering::SeqCst);
        self.shared.state.send_replace(SessionState::Connecting);
        tracing::info!(replica = %self.shared.engine.applier().replica(), "sync session started");

        let Some(interval) = self.shared.engine.config().sync_interval else {
            return Ok(());
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Task(e.to_string()))?;
        let shared = Arc::clone(&self.shared);
        let task = runtime.spawn(async move {
            loop {
                match shared.run_cycle(None, shared.new_cycle()).await {
                    Ok(_) => {
                        shared.state.send_replace(SessionState::Active);
                    }
                    Err(SyncError::Cancelled | SyncError::LoggedOut) if shared.stopped() => break,
                    Err(SyncError::Cancelled | SyncError::LoggedOut) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "background sync failed");
                        shared.state.send_replace(SessionState::Error(e.to_string()));
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
        if let Some(previous) = self.background.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Waits until everything on the server has been merged locally.
    pub async fn wait_for_download(&self, timeout: Duration) -> SyncResult<SyncCycleResult> {
        self.wait(Direction::Download, timeout).await
    }

    /// Waits until every pending local operation has been uploaded.
    pub async fn wait_for_upload(&self, timeout: Duration) -> SyncResult<SyncCycleResult> {
        self.wait(Direction::Upload, timeout).await
    }

    async fn wait(&self, direction: Direction, timeout: Duration) -> SyncResult<SyncCycleResult> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        if !self.shared.logged_in.load(Ordering::SeqCst) {
            return Err(SyncError::LoggedOut);
        }

        let cycle = self.shared.new_cycle();
        let run = self.shared.run_cycle(Some(direction), Arc::clone(&cycle));
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => {
                self.shared.state.send_replace(SessionState::Active);
                Ok(result)
            }
            Ok(Err(e @ (SyncError::Cancelled | SyncError::LoggedOut))) => Err(e),
            Ok(Err(e)) => {
                self.shared.state.send_replace(SessionState::Error(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // A started cycle stops at its next batch boundary.
                self.shared.abandon(&cycle);
                tracing::warn!(?direction, ?timeout, "sync wait timed out");
                self.shared
                    .state
                    .send_replace(SessionState::Error(format!("{direction:?} timed out after {timeout:?}")));
                Err(SyncError::Timeout)
            }
        }
    }

    /// Stops the session: no further results are delivered until
    /// [`start`](Self::start).
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.engine.cancel();
        self.stop_background();
    }

    /// Logs out: stops syncing and moves to [`SessionState::WaitingForUser`].
    pub fn log_out(&self) {
        self.shared.logged_in.store(false, Ordering::SeqCst);
        self.shared.engine.cancel();
        self.stop_background();
        self.shared.state.send_replace(SessionState::WaitingForUser);
        tracing::info!(replica = %self.shared.engine.applier().replica(), "sync session logged out");
    }

    fn stop_background(&self) {
        if let Some(task) = self.background.lock().take() {
            task.abort();
        }
    }
}

impl<T, A> Drop for SyncSession<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    fn drop(&mut self) {
        self.shared.engine.set_progress_handler(None);
        if let Some(task) = self.background.get_mut().take() {
            task.abort();
        }
    }
}

impl<T, A> std::fmt::Debug for SyncSession<T, A>
where
    T: SyncTransport + 'static,
    A: SyncApplier + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("state", &self.state())
            .field("engine", &self.shared.engine)
            .finish()
    }
}
