// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Update coordinator: the single owner of a printer's published state.
//
// One coordinator per configured printer. It fetches status and the file list
// on a fixed interval (and on request), absorbs short bursts of connection
// failures through `RefreshPolicy`, and publishes each result by replacing an
// immutable `CoordinatorState` in a watch channel. Registered listeners are
// called synchronously after every completed cycle.
//
// Single-flight: a caller claims the `refreshing` flag inside the watch
// channel's write lock while reading the current `generation`. Losers wait for
// `generation` to advance instead of fetching, so concurrent triggers share one
// fetch sequence and one outcome. The flag is released only after listeners
// have returned, so notifications never overlap and arrive in cycle order.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use forgelink_core::config::CoordinatorConfig;
use forgelink_core::error::{ForgeError, Result};
use forgelink_core::types::{DeviceIdentity, Snapshot};

use crate::client::PrinterClient;
use crate::retry::{RefreshDecision, RefreshPolicy};

/// Coarse lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, first refresh not yet successful.
    Uninitialized,
    /// First refresh succeeded; refreshes may run.
    Ready,
    /// Torn down; nothing further is scheduled.
    ShutDown,
}

/// Published coordinator state. Replaced as a whole, never mutated in place
/// from a reader's point of view.
#[derive(Debug, Clone)]
pub struct CoordinatorState {
    /// Last successfully fetched snapshot. Kept across reported failures.
    pub snapshot: Option<Arc<Snapshot>>,
    /// Whether the most recent completed cycle produced a snapshot.
    pub last_update_success: bool,
    /// Cause of the last reported failure, for diagnostics.
    pub last_error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Number of finished refresh cycles. Listeners see the value the cycle
    /// claimed; it advances once they have returned.
    pub generation: u64,
    /// A refresh cycle is in flight.
    pub refreshing: bool,
    pub lifecycle: Lifecycle,
}

impl CoordinatorState {
    fn initial() -> Self {
        Self {
            snapshot: None,
            last_update_success: false,
            last_error: None,
            last_updated: None,
            generation: 0,
            refreshing: false,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Entities are available only when a snapshot exists and the latest
    /// cycle succeeded.
    pub fn is_available(&self) -> bool {
        self.last_update_success && self.snapshot.is_some()
    }
}

/// Handle returned by [`UpdateCoordinator::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&CoordinatorState) + Send + Sync>;

/// Result of trying to claim the single-flight flag. Both carry the
/// generation observed at the claim.
enum Flight {
    Leader(u64),
    Follower(u64),
}

/// Outcome of a cycle that reaches subscribers.
enum Outcome {
    Published(Snapshot),
    Failed(String),
}

struct Scheduler {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner<C: PrinterClient> {
    name: String,
    client: Arc<C>,
    config: CoordinatorConfig,
    policy: RefreshPolicy,
    state: watch::Sender<CoordinatorState>,
    consecutive_failures: AtomicU32,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    scheduler: Mutex<Option<Scheduler>>,
}

/// Polls one printer and fans the result out to subscribers.
///
/// Cheap to clone; all clones share the same state. Call [`shutdown`] when the
/// device is removed, otherwise the scheduled task keeps the coordinator alive.
///
/// [`shutdown`]: UpdateCoordinator::shutdown
pub struct UpdateCoordinator<C: PrinterClient> {
    inner: Arc<Inner<C>>,
}

impl<C: PrinterClient> Clone for UpdateCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PrinterClient> std::fmt::Debug for UpdateCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<C: PrinterClient> UpdateCoordinator<C> {
    pub fn new(name: impl Into<String>, client: Arc<C>, config: CoordinatorConfig) -> Self {
        let (state, _) = watch::channel(CoordinatorState::initial());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                client,
                config,
                policy: RefreshPolicy::new(config.max_failed_updates),
                state,
                consecutive_failures: AtomicU32::new(0),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> &Arc<C> {
        &self.inner.client
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.inner.config
    }

    // -- Reads ----------------------------------------------------------------

    /// Current published state.
    pub fn state(&self) -> CoordinatorState {
        self.inner.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.state.borrow().snapshot.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.state.borrow().last_update_success
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Watch channel receiver for async consumers.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    /// Identity fields as of the client's last successful connect.
    pub fn device_identity(&self) -> DeviceIdentity {
        self.inner.client.identity()
    }

    // -- Listeners ------------------------------------------------------------

    /// Register a callback run after every completed cycle.
    ///
    /// Callbacks run on the refresh task and must not block on device I/O.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CoordinatorState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Unregister a callback. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner
            .listeners
            .lock()
            .map(|mut listeners| {
                let before = listeners.len();
                listeners.retain(|(lid, _)| *lid != id);
                listeners.len() != before
            })
            .unwrap_or(false)
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Mandatory first refresh: reconnect, then fetch once.
    ///
    /// Errors are returned as-is and never retried here; the failure counter
    /// is left untouched. Setup is expected to build a new coordinator later.
    /// A concurrent call waits for the running one and reports its result.
    #[instrument(skip(self), fields(coordinator = %self.inner.name))]
    pub async fn first_refresh(&self) -> Result<()> {
        let lifecycle = self.inner.state.borrow().lifecycle;
        match lifecycle {
            Lifecycle::Uninitialized => {}
            Lifecycle::Ready => {
                debug!("first refresh already done");
                return Ok(());
            }
            Lifecycle::ShutDown => return Err(ForgeError::ShutDown),
        }

        let claimed = match self.inner.claim() {
            Flight::Leader(claimed) => claimed,
            Flight::Follower(seen) => {
                debug!("first refresh in flight, waiting for it");
                self.inner.wait_past(seen).await?;
                let lifecycle = self.inner.state.borrow().lifecycle;
                return match lifecycle {
                    Lifecycle::Ready => Ok(()),
                    Lifecycle::Uninitialized => Err(ForgeError::NotInitialized),
                    Lifecycle::ShutDown => Err(ForgeError::ShutDown),
                };
            }
        };

        let inner = Arc::clone(&self.inner);
        self.inner
            .supervise(claimed, async move { inner.run_first(claimed).await })
            .await
    }

    /// Start the interval timer. Requires a successful first refresh.
    pub fn start(&self) -> Result<()> {
        let lifecycle = self.inner.state.borrow().lifecycle;
        match lifecycle {
            Lifecycle::Ready => {}
            Lifecycle::Uninitialized => return Err(ForgeError::NotInitialized),
            Lifecycle::ShutDown => return Err(ForgeError::ShutDown),
        }

        let mut scheduler = self
            .inner
            .scheduler
            .lock()
            .map_err(|e| ForgeError::Task(format!("scheduler lock: {e}")))?;
        if scheduler.is_some() {
            debug!(coordinator = %self.inner.name, "scheduler already running");
            return Ok(());
        }

        let period = self.inner.config.update_interval;
        if period.is_zero() {
            return Err(ForgeError::Config("update_interval must be non-zero".into()));
        }
        let (stop, mut stop_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.refresh().await {
                            error!(coordinator = %inner.name, error = %e, "scheduled refresh failed");
                        }
                    }
                }
            }
            debug!(coordinator = %inner.name, "scheduler stopped");
        });

        *scheduler = Some(Scheduler { stop, handle });
        info!(
            coordinator = %self.inner.name,
            interval_secs = period.as_secs_f64(),
            "scheduled refresh started"
        );
        Ok(())
    }

    /// Ask for an out-of-band refresh.
    ///
    /// Joins the in-flight cycle if there is one. Resolves once that cycle has
    /// finished; the outcome is read from [`state`](Self::state) or delivered
    /// to listeners. Only the caller that actually ran the cycle sees an
    /// unclassified error.
    pub async fn request_refresh(&self) -> Result<()> {
        let lifecycle = self.inner.state.borrow().lifecycle;
        match lifecycle {
            Lifecycle::Ready => {}
            Lifecycle::Uninitialized => return Err(ForgeError::NotInitialized),
            Lifecycle::ShutDown => return Err(ForgeError::ShutDown),
        }
        self.inner.refresh().await
    }

    /// Stop scheduling refreshes. An in-flight cycle is allowed to finish.
    pub async fn shutdown(&self) {
        self.inner
            .state
            .send_modify(|s| s.lifecycle = Lifecycle::ShutDown);

        let scheduler = self.inner.scheduler.lock().ok().and_then(|mut s| s.take());
        if let Some(Scheduler { stop, handle }) = scheduler {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                warn!(coordinator = %self.inner.name, error = %e, "scheduler task ended abnormally");
            }
        }
        info!(coordinator = %self.inner.name, "coordinator shut down");
    }
}

impl<C: PrinterClient> Inner<C> {
    /// Claim the single-flight flag, or learn which generation to wait past.
    fn claim(&self) -> Flight {
        let mut flight = Flight::Follower(0);
        self.state.send_if_modified(|s| {
            if s.refreshing {
                flight = Flight::Follower(s.generation);
                false
            } else {
                s.refreshing = true;
                flight = Flight::Leader(s.generation);
                true
            }
        });
        flight
    }

    /// Release the flag claimed at `claimed` and advance the generation.
    /// No-op if that claim was already released.
    fn release(&self, claimed: u64) {
        self.state.send_if_modified(|s| {
            if s.refreshing && s.generation == claimed {
                s.generation += 1;
                s.refreshing = false;
                true
            } else {
                false
            }
        });
    }

    async fn wait_past(&self, seen: u64) -> Result<()> {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| s.generation > seen)
            .await
            .map(|_| ())
            .map_err(|_| ForgeError::ShutDown)
    }

    /// Run a leader's cycle on its own task so a dropped caller never strands
    /// the waiters. A panicking cycle still releases its claim.
    async fn supervise<F>(&self, claimed: u64, cycle: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match tokio::spawn(cycle).await {
            Ok(result) => result,
            Err(e) => {
                error!(coordinator = %self.name, error = %e, "refresh task panicked");
                self.release(claimed);
                Err(ForgeError::Task(e.to_string()))
            }
        }
    }

    /// Single-flight entry point shared by the timer and manual requests.
    async fn refresh(self: &Arc<Self>) -> Result<()> {
        match self.claim() {
            Flight::Follower(seen) => {
                debug!(coordinator = %self.name, "refresh in flight, waiting for it");
                self.wait_past(seen).await
            }
            Flight::Leader(claimed) => {
                let inner = Arc::clone(self);
                self.supervise(claimed, async move { inner.run_cycle(claimed).await })
                    .await
            }
        }
    }

    #[instrument(skip(self), fields(coordinator = %self.name))]
    async fn run_first(&self, claimed: u64) -> Result<()> {
        let fetched = async {
            self.client.mark_disconnected();
            self.client.connect().await?;
            debug!("connected, fetching initial state");
            self.fetch().await
        }
        .await;

        match fetched {
            Ok(snapshot) => {
                info!(
                    status = ?snapshot.status,
                    files = snapshot.files.len(),
                    "first refresh complete"
                );
                self.finish(claimed, Some(Outcome::Published(snapshot)));
                Ok(())
            }
            Err(err) => {
                self.finish(claimed, None);
                Err(err)
            }
        }
    }

    /// One refresh cycle: fetch, retrying transient failures immediately
    /// until the policy gives up.
    #[instrument(skip(self), fields(coordinator = %self.name))]
    async fn run_cycle(&self, claimed: u64) -> Result<()> {
        loop {
            let err = match self.fetch().await {
                Ok(snapshot) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    debug!(status = ?snapshot.status, files = snapshot.files.len(), "refresh succeeded");
                    self.finish(claimed, Some(Outcome::Published(snapshot)));
                    return Ok(());
                }
                Err(err) => err,
            };

            let failures = self.consecutive_failures.load(Ordering::SeqCst);
            match self.policy.decide(&err, failures) {
                RefreshDecision::RetryNow => {
                    self.consecutive_failures.store(failures + 1, Ordering::SeqCst);
                }
                RefreshDecision::ReportFailure => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    warn!(error = %err, "printer unavailable");
                    self.finish(claimed, Some(Outcome::Failed(err.to_string())));
                    return Ok(());
                }
                RefreshDecision::Propagate => {
                    error!(error = %err, "refresh aborted");
                    self.finish(claimed, None);
                    return Err(err);
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Snapshot> {
        self.client.update().await?;
        let files = self.client.file_names().await?;
        Ok(Snapshot::new(
            self.client.machine_status(),
            files,
            self.client.telemetry(),
        ))
    }

    /// Publish the outcome (if any) and notify listeners while the flag is
    /// still held, then release it.
    fn finish(&self, claimed: u64, outcome: Option<Outcome>) {
        if let Some(outcome) = outcome {
            let mut published = None;
            self.state.send_modify(|s| {
                match outcome {
                    Outcome::Published(snapshot) => {
                        s.snapshot = Some(Arc::new(snapshot));
                        s.last_update_success = true;
                        s.last_error = None;
                        s.last_updated = Some(Utc::now());
                    }
                    Outcome::Failed(reason) => {
                        s.last_update_success = false;
                        s.last_error = Some(reason);
                    }
                }
                if s.lifecycle == Lifecycle::Uninitialized {
                    s.lifecycle = Lifecycle::Ready;
                }
                published = Some(s.clone());
            });
            if let Some(state) = published {
                self.notify_listeners(&state);
            }
        }
        self.release(claimed);
    }

    fn notify_listeners(&self, state: &CoordinatorState) {
        // Clone out so a listener may add or remove listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(state);
        }
    }
}
