//! The pool state machine.
//!
//! All bookkeeping (counts, membership lists, the waiter queue, the reap
//! timer flag) lives in a single `PoolState` behind one
//! `parking_lot::Mutex`. Decisions are taken under the lock; side effects
//! that suspend (factory create/destroy, async validation, timers, deferred
//! dispenses) are collected as `Deferred` ops and spawned after the lock
//! is released. Every completion re-locks the state and re-enters the
//! dispenser, so no operation ever holds the lock across an await.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::{ResourceFactory, ValidationMode};
use crate::guard::PoolGuard;
use crate::log::LogLevel;

/// Cadence at which `drain` re-checks quiescence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An idle resource together with the moment it becomes reapable.
struct IdleSlot<T> {
    handle: Arc<T>,
    expires_at: Instant,
}

/// A pending acquire request.
struct Waiter<T> {
    id: u64,
    tx: oneshot::Sender<Result<Arc<T>>>,
    enqueued_at: Instant,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total resources alive or being created.
    pub size: usize,
    /// Resources idle in the available list.
    pub available: usize,
    /// Resources checked out by callers.
    pub in_use: usize,
    /// Resources undergoing asynchronous validation.
    pub validating: usize,
    /// Callers waiting in the acquire queue.
    pub waiting: usize,
    /// Total resources ever created.
    pub created: u64,
    /// Total resources ever destroyed.
    pub destroyed: u64,
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases back to the pool.
    pub total_releases: u64,
}

/// Mutable pool state, guarded by a single mutex.
struct PoolState<T> {
    available: VecDeque<IdleSlot<T>>,
    in_use: Vec<Arc<T>>,
    validating: Vec<Arc<T>>,
    waiters: VecDeque<Waiter<T>>,
    /// Resources alive or being born: available + in_use + validating +
    /// in-flight creations. Gates creation against `max`.
    count: usize,
    draining: bool,
    /// At most one reap timer may be pending.
    reap_scheduled: bool,
    /// Bumped to cancel a pending reap timer; the fired timer re-checks it.
    reap_epoch: u64,
    next_waiter_id: u64,
    created: u64,
    destroyed: u64,
    acquisitions: u64,
    releases: u64,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            available: VecDeque::new(),
            in_use: Vec::new(),
            validating: Vec::new(),
            waiters: VecDeque::new(),
            count: 0,
            draining: false,
            reap_scheduled: false,
            reap_epoch: 0,
            next_waiter_id: 0,
            created: 0,
            destroyed: 0,
            acquisitions: 0,
            releases: 0,
        }
    }

    /// Drop waiters whose receiver has gone away.
    fn prune_dead_waiters(&mut self) {
        self.waiters.retain(|w| !w.tx.is_closed());
    }

    fn is_available(&self, handle: &Arc<T>) -> bool {
        self.available
            .iter()
            .any(|slot| Arc::ptr_eq(&slot.handle, handle))
    }

    fn remove_in_use(&mut self, handle: &Arc<T>) -> bool {
        let before = self.in_use.len();
        self.in_use.retain(|h| !Arc::ptr_eq(h, handle));
        self.in_use.len() != before
    }
}

/// Side effects decided under the lock, executed after it is released.
enum Deferred<T> {
    /// Drive one factory creation; the slot is already reserved in `count`.
    Create,
    /// Start (or continue) the async-validation chain on this handle.
    Validate(Arc<T>),
    /// Run the factory's best-effort teardown.
    Destroy(Arc<T>),
    /// Re-enter the dispenser on a fresh scheduling turn.
    Dispense,
    /// Arm the reap timer for the given epoch.
    Reap(u64),
}

/// Inner shared state for the pool.
struct PoolInner<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Handle>>,
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Generic resource pool.
///
/// Mediates access to a bounded collection of handles produced by a
/// [`ResourceFactory`]: caches idle handles, creates new ones on demand up
/// to `max`, maintains a floor of `min`, validates handles before dispatch,
/// reaps idle ones past their timeout, and drains in an orderly fashion.
///
/// Handles are wrapped in [`Arc`] and identified by pointer; the pool never
/// inspects their contents.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool over the given factory.
    ///
    /// The minimum floor is not pre-warmed; it is enforced once destroy
    /// events start happening.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the configuration is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            pool = %config.name,
            min = config.min,
            max = config.max,
            "created resource pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState::new()),
            }),
        })
    }

    // -- Acquire / release / destroy ---------------------------------------

    /// Acquire a handle from the pool.
    ///
    /// Resolves when a handle is delivered, the configured acquire deadline
    /// expires, the creation assigned to this caller fails, or the pool is
    /// draining.
    ///
    /// # Errors
    /// [`Error::Draining`], [`Error::AcquireTimeout`], or [`Error::Factory`].
    pub async fn acquire(&self) -> Result<Arc<F::Handle>> {
        let (waiter_id, mut rx) = {
            let mut st = self.inner.state.lock();
            if st.draining {
                return Err(Error::draining(self.inner.config.name.as_str()));
            }
            let (tx, rx) = oneshot::channel();
            let waiter_id = st.next_waiter_id;
            st.next_waiter_id += 1;
            st.waiters.push_back(Waiter {
                id: waiter_id,
                tx,
                enqueued_at: Instant::now(),
            });
            let mut ops = Vec::new();
            self.dispense_locked(&mut st, &mut ops);
            drop(st);
            self.run_deferred(ops);
            (waiter_id, rx)
        };

        match self.inner.config.acquire_timeout {
            None => rx.await.map_err(|_| {
                Error::internal(self.inner.config.name.as_str(), "result channel closed")
            })?,
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(delivered) => delivered.map_err(|_| {
                    Error::internal(self.inner.config.name.as_str(), "result channel closed")
                })?,
                Err(_) => {
                    let removed = {
                        let mut st = self.inner.state.lock();
                        let before = st.waiters.len();
                        st.waiters.retain(|w| w.id != waiter_id);
                        st.waiters.len() != before
                    };
                    if removed {
                        self.log(LogLevel::Warn, "acquire timed out while waiting");
                        return Err(Error::acquire_timeout(
                            self.inner.config.name.as_str(),
                            limit,
                        ));
                    }
                    // Delivery raced the deadline; accept the late result.
                    rx.await.map_err(|_| {
                        Error::internal(self.inner.config.name.as_str(), "result channel closed")
                    })?
                }
            },
        }
    }

    /// Acquire a handle wrapped in an RAII guard that releases on drop.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub async fn checkout(&self) -> Result<PoolGuard<F>> {
        let handle = self.acquire().await?;
        Ok(PoolGuard::new(self.clone(), handle))
    }

    /// Return a handle to the pool.
    ///
    /// A handle that is already idle (double release) or that the pool did
    /// not deliver (foreign release) is reported at `Error` log level and
    /// the call changes nothing.
    pub fn release(&self, handle: Arc<F::Handle>) {
        let mut ops = Vec::new();
        {
            let mut st = self.inner.state.lock();
            if st.is_available(&handle) {
                self.log(
                    LogLevel::Error,
                    "release: handle is already in the available list (double release)",
                );
                return;
            }
            if !st.remove_in_use(&handle) {
                self.log(
                    LogLevel::Error,
                    "release: handle does not belong to this pool (foreign release)",
                );
                return;
            }
            st.releases += 1;
            self.add_available_locked(&mut st, handle, &mut ops);
            self.dispense_locked(&mut st, &mut ops);
        }
        self.run_deferred(ops);
    }

    /// Destroy a held handle instead of returning it.
    ///
    /// Unconditionally decrements the pool size (floored at zero), removes
    /// the handle from the available and in-use lists, runs the factory's
    /// teardown, and enforces the minimum floor. Callers must not destroy
    /// the same handle twice.
    pub fn destroy(&self, handle: Arc<F::Handle>) {
        let mut ops = Vec::new();
        {
            let mut st = self.inner.state.lock();
            self.log(LogLevel::Verbose, "destroying handle");
            self.destroy_locked(&mut st, handle, &mut ops);
            self.dispense_locked(&mut st, &mut ops);
        }
        self.run_deferred(ops);
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Initiate orderly shutdown.
    ///
    /// New acquires fail immediately with [`Error::Draining`]; in-flight
    /// work is allowed to complete. Resolves once the waiter queue is
    /// empty, no validations are in flight, and every live resource is
    /// back in the available list.
    pub async fn drain(&self) {
        {
            let mut st = self.inner.state.lock();
            st.draining = true;
        }
        self.log(LogLevel::Info, "draining pool, new acquires are rejected");
        loop {
            let quiescent = {
                let mut st = self.inner.state.lock();
                st.prune_dead_waiters();
                st.waiters.is_empty()
                    && st.validating.is_empty()
                    && st.available.len() == st.count
            };
            if quiescent {
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        self.log(LogLevel::Info, "drain complete, pool is quiescent");
    }

    /// Forcibly destroy every idle resource.
    ///
    /// Cancels the pending reap timer, snapshots the available list, clears
    /// it and destroys each snapshotted handle. In-use resources are left
    /// alone; unless the pool is draining or `min` is zero, the minimum
    /// floor will schedule replacement creations. Handles under
    /// asynchronous validation are not purged; their completions dispose of
    /// them through the normal dispense paths.
    pub fn destroy_all_now(&self) {
        let mut ops = Vec::new();
        {
            let mut st = self.inner.state.lock();
            self.log(LogLevel::Info, "force destroying all idle resources");
            st.reap_epoch = st.reap_epoch.wrapping_add(1);
            st.reap_scheduled = false;
            let doomed: Vec<_> = st.available.drain(..).map(|slot| slot.handle).collect();
            for handle in doomed {
                self.destroy_locked(&mut st, handle, &mut ops);
            }
        }
        self.run_deferred(ops);
    }

    // -- Introspection -----------------------------------------------------

    /// The pool's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Total resources alive or being created.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().count
    }

    /// Resources idle in the available list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.state.lock().available.len()
    }

    /// Resources currently checked out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    /// Callers waiting in the acquire queue.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// The configured ceiling.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.config.max
    }

    /// The configured floor.
    #[must_use]
    pub fn min_size(&self) -> usize {
        self.inner.config.min
    }

    /// Whether `drain` has begun.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Get a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let st = self.inner.state.lock();
        PoolStats {
            size: st.count,
            available: st.available.len(),
            in_use: st.in_use.len(),
            validating: st.validating.len(),
            waiting: st.waiters.len(),
            created: st.created,
            destroyed: st.destroyed,
            total_acquisitions: st.acquisitions,
            total_releases: st.releases,
        }
    }

    // -- Dispenser ---------------------------------------------------------

    /// The single decision procedure, run under the lock after every event.
    ///
    /// Sync validation mode serves at most one waiter per pass; async mode
    /// moves the head slot into the under-validation set and hands off to
    /// the validation chain. If waiters remain and there is headroom, one
    /// creation is started per pass.
    fn dispense_locked(
        &self,
        st: &mut PoolState<F::Handle>,
        ops: &mut Vec<Deferred<F::Handle>>,
    ) {
        st.prune_dead_waiters();
        if st.waiters.is_empty() {
            return;
        }
        self.log(
            LogLevel::Verbose,
            &format!(
                "dispense: {} waiting, {} available, size {}",
                st.waiters.len(),
                st.available.len(),
                st.count
            ),
        );
        match self.inner.factory.validation_mode() {
            ValidationMode::Sync => {
                while let Some(slot) = st.available.pop_front() {
                    if !self.inner.factory.validate(&slot.handle) {
                        self.log(
                            LogLevel::Verbose,
                            "dispense: validation failed, destroying handle",
                        );
                        self.destroy_locked(st, slot.handle, ops);
                        continue;
                    }
                    match st.waiters.pop_front() {
                        Some(waiter) => {
                            if self.fulfil_locked(st, slot.handle, waiter, ops) {
                                return;
                            }
                            // The receiver raced away; the handle went back
                            // to the available list, try the next waiter.
                            continue;
                        }
                        None => {
                            st.available.push_front(slot);
                            return;
                        }
                    }
                }
            }
            ValidationMode::Async => {
                if let Some(slot) = st.available.pop_front() {
                    st.validating.push(slot.handle.clone());
                    ops.push(Deferred::Validate(slot.handle));
                    return;
                }
            }
        }
        if st.count < self.inner.config.max {
            st.count += 1;
            ops.push(Deferred::Create);
        }
    }

    /// Deliver a handle to a waiter, moving it into the in-use list.
    ///
    /// Returns false when the waiter's receiver was already gone; the
    /// handle is reinserted into the available list instead of leaking.
    fn fulfil_locked(
        &self,
        st: &mut PoolState<F::Handle>,
        handle: Arc<F::Handle>,
        waiter: Waiter<F::Handle>,
        ops: &mut Vec<Deferred<F::Handle>>,
    ) -> bool {
        self.log(
            LogLevel::Verbose,
            &format!(
                "dispense: delivering handle after {}ms wait",
                waiter.enqueued_at.elapsed().as_millis()
            ),
        );
        match waiter.tx.send(Ok(handle.clone())) {
            Ok(()) => {
                st.in_use.push(handle);
                st.acquisitions += 1;
                true
            }
            Err(_) => {
                self.add_available_locked(st, handle, ops);
                false
            }
        }
    }

    /// Insert a handle into the available list (head or tail per config)
    /// with a fresh idle deadline, and arm the reap timer. The timer is
    /// never armed when idle refresh is disabled.
    fn add_available_locked(
        &self,
        st: &mut PoolState<F::Handle>,
        handle: Arc<F::Handle>,
        ops: &mut Vec<Deferred<F::Handle>>,
    ) {
        let slot = IdleSlot {
            handle,
            expires_at: Instant::now() + self.inner.config.idle_timeout,
        };
        if self.inner.config.return_to_head {
            st.available.push_front(slot);
        } else {
            st.available.push_back(slot);
        }
        if self.inner.config.refresh_idle && !st.reap_scheduled {
            st.reap_scheduled = true;
            ops.push(Deferred::Reap(st.reap_epoch));
        }
    }

    /// Remove a handle from the pool: decrement the count (floored),
    /// drop it from the membership lists, schedule the factory teardown,
    /// and enforce the minimum floor.
    fn destroy_locked(
        &self,
        st: &mut PoolState<F::Handle>,
        handle: Arc<F::Handle>,
        ops: &mut Vec<Deferred<F::Handle>>,
    ) {
        st.count = st.count.saturating_sub(1);
        st.available
            .retain(|slot| !Arc::ptr_eq(&slot.handle, &handle));
        st.in_use.retain(|h| !Arc::ptr_eq(h, &handle));
        st.destroyed += 1;
        ops.push(Deferred::Destroy(handle));
        self.ensure_minimum_locked(st, ops);
    }

    /// Schedule creations up to the floor unless the pool is draining.
    fn ensure_minimum_locked(
        &self,
        st: &mut PoolState<F::Handle>,
        ops: &mut Vec<Deferred<F::Handle>>,
    ) {
        if st.draining || st.count >= self.inner.config.min {
            return;
        }
        let shortfall = self.inner.config.min - st.count;
        self.log(
            LogLevel::Verbose,
            &format!("ensuring minimum: scheduling {shortfall} creations"),
        );
        st.count += shortfall;
        for _ in 0..shortfall {
            ops.push(Deferred::Create);
        }
    }

    // -- Deferred execution ------------------------------------------------

    fn run_deferred(&self, ops: Vec<Deferred<F::Handle>>) {
        for op in ops {
            match op {
                Deferred::Create => self.spawn_create(),
                Deferred::Validate(handle) => self.spawn_validate(handle),
                Deferred::Destroy(handle) => {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        pool.inner.factory.destroy(handle).await;
                    });
                }
                Deferred::Dispense => {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        pool.dispense_now();
                    });
                }
                Deferred::Reap(epoch) => {
                    let pool = self.clone();
                    let interval = pool.inner.config.reap_interval;
                    tokio::spawn(async move {
                        tokio::time::sleep(interval).await;
                        pool.reap(epoch);
                    });
                }
            }
        }
    }

    fn dispense_now(&self) {
        let mut ops = Vec::new();
        {
            let mut st = self.inner.state.lock();
            self.dispense_locked(&mut st, &mut ops);
        }
        self.run_deferred(ops);
    }

    // -- Creation pipeline -------------------------------------------------

    /// Drive one factory creation. The slot was reserved in `count` at
    /// decision time; the completion relocates or releases it.
    fn spawn_create(&self) {
        self.log(LogLevel::Verbose, "creating a new resource");
        let pool = self.clone();
        tokio::spawn(async move {
            let outcome = pool.inner.factory.create().await;
            let mut ops = Vec::new();
            {
                let mut st = pool.inner.state.lock();
                match outcome {
                    Err(source) => {
                        pool.log(
                            LogLevel::Error,
                            &format!("resource creation failed: {source}"),
                        );
                        st.count = st.count.saturating_sub(1);
                        st.prune_dead_waiters();
                        if let Some(waiter) = st.waiters.pop_front() {
                            let _ = waiter.tx.send(Err(Error::factory(
                                pool.inner.config.name.as_str(),
                                source,
                            )));
                        }
                        // Remaining waiters get fresh creations on the next
                        // scheduling turn.
                        ops.push(Deferred::Dispense);
                    }
                    Ok(handle) => {
                        st.created += 1;
                        let handle = Arc::new(handle);
                        st.prune_dead_waiters();
                        match st.waiters.pop_front() {
                            Some(waiter) => {
                                if !pool.fulfil_locked(&mut st, handle, waiter, &mut ops) {
                                    pool.dispense_locked(&mut st, &mut ops);
                                }
                            }
                            None => {
                                // The waiter was served elsewhere or timed
                                // out; pool the handle instead.
                                pool.add_available_locked(&mut st, handle, &mut ops);
                                pool.dispense_locked(&mut st, &mut ops);
                            }
                        }
                    }
                }
            }
            pool.run_deferred(ops);
        });
    }

    // -- Async validation chain --------------------------------------------

    /// The do-while-async loop: validate the candidate, then keep pulling
    /// slots from the available list until a valid handle finds no waiter
    /// (put back, stop) or the list empties (creation gate runs).
    fn spawn_validate(&self, handle: Arc<F::Handle>) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut candidate = handle;
            loop {
                let valid = pool.inner.factory.validate_async(&candidate).await;
                let mut ops = Vec::new();
                let next = {
                    let mut st = pool.inner.state.lock();
                    st.validating.retain(|h| !Arc::ptr_eq(h, &candidate));
                    st.prune_dead_waiters();
                    let mut stop = false;
                    if !valid {
                        pool.log(
                            LogLevel::Verbose,
                            "dispense: async validation failed, destroying handle",
                        );
                        pool.destroy_locked(&mut st, candidate, &mut ops);
                    } else if let Some(waiter) = st.waiters.pop_front() {
                        pool.fulfil_locked(&mut st, candidate, waiter, &mut ops);
                    } else {
                        // Nobody is waiting any more; further dispensing is
                        // unnecessary.
                        pool.add_available_locked(&mut st, candidate, &mut ops);
                        stop = true;
                    }
                    if stop {
                        None
                    } else if let Some(slot) = st.available.pop_front() {
                        st.validating.push(slot.handle.clone());
                        Some(slot.handle)
                    } else {
                        if !st.waiters.is_empty() && st.count < pool.inner.config.max {
                            st.count += 1;
                            ops.push(Deferred::Create);
                        }
                        None
                    }
                };
                pool.run_deferred(ops);
                match next {
                    Some(h) => candidate = h,
                    None => return,
                }
            }
        });
    }

    // -- Idle reaper -------------------------------------------------------

    /// One timed sweep. Collects at most `count - min` expired slots in
    /// list order, destroys them, dispenses, and re-arms the timer iff the
    /// available list is still non-empty. When idle refresh is disabled the
    /// sweep returns immediately, leaving the timer disarmed.
    fn reap(&self, epoch: u64) {
        let mut ops = Vec::new();
        {
            let mut st = self.inner.state.lock();
            if epoch != st.reap_epoch {
                // Cancelled by destroy_all_now while the timer was pending.
                return;
            }
            st.reap_scheduled = false;
            if !self.inner.config.refresh_idle {
                self.log(LogLevel::Verbose, "reap: idle refresh disabled, timer disarmed");
                return;
            }
            let max_removable = st.count.saturating_sub(self.inner.config.min);
            let now = Instant::now();
            let mut doomed = Vec::new();
            for slot in &st.available {
                if doomed.len() >= max_removable {
                    break;
                }
                if slot.expires_at <= now {
                    doomed.push(slot.handle.clone());
                }
            }
            if !doomed.is_empty() {
                self.log(
                    LogLevel::Verbose,
                    &format!("reap: removing {} idle resources", doomed.len()),
                );
            }
            for handle in doomed {
                self.destroy_locked(&mut st, handle, &mut ops);
            }
            self.dispense_locked(&mut st, &mut ops);
            if st.available.is_empty() {
                self.log(LogLevel::Verbose, "reap: all idle resources removed");
            } else {
                st.reap_scheduled = true;
                ops.push(Deferred::Reap(st.reap_epoch));
            }
        }
        self.run_deferred(ops);
    }

    // -- Diagnostics -------------------------------------------------------

    fn log(&self, level: LogLevel, message: &str) {
        let name = self.inner.config.name.as_str();
        match level {
            LogLevel::Verbose => tracing::trace!(pool = %name, "{message}"),
            LogLevel::Info => tracing::info!(pool = %name, "{message}"),
            LogLevel::Warn => tracing::warn!(pool = %name, "{message}"),
            LogLevel::Error => tracing::error!(pool = %name, "{message}"),
        }
        if let Some(sink) = &self.inner.config.log {
            sink.emit(level, message);
        }
    }
}
