/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The periodic real-time scheduler.
//!
//! # Period layout
//!
//! ```text
//! boundary ─┬─ drain events    (≤ min(queued, events_per_period), FIFO)
//!           ├─ Device::read    (registration order, active only)
//!           ├─ Thread::execute (descending priority, stable ties, active only)
//!           ├─ Device::write   (registration order, active only)
//!           └─ sleep until next absolute boundary
//! ```
//!
//! Events posted while the loop drains wait for the next period, so a burst
//! of posts can never stretch one period indefinitely.
//!
//! # Shared state
//!
//! | State | Writer | Guard |
//! |---|---|---|
//! | period | loop only (via an event) | atomic, lock-free reads |
//! | Device list | `insert_device` / `remove_device` | priority-inheritance mutex, also held by the loop while traversing |
//! | Thread list | `insert_thread` / `remove_thread` | as above |
//! | active flags | anyone | atomic per unit |
//! | event sender | posters, `stop` | `parking_lot` mutex; `None` once stopped |
//!
//! # Reentrancy
//! Every blocking or lock-taking operation checks two thread-local markers
//! and fails with [`RtError::Reentrant`] instead of deadlocking: one set on
//! the loop thread (event callbacks, unit hooks), one set while a
//! [`foreach_device`](System::foreach_device) or
//! [`foreach_thread`](System::foreach_thread) callback holds a collection
//! lock that the loop also needs.

pub mod error;
mod registry;
pub mod stats;

pub use error::{CancelReason, RtError};
pub use stats::LoopStats;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::device::{Device, DeviceHandle};
use crate::diag;
use crate::event::{self, Envelope, Event, EventContext, Pending, EVENT_UNSET};
use crate::os::mutex::PiMutex;
use crate::os::{self, Task, Timestep};
use crate::thread::{Thread, ThreadHandle, MAXIMUM_PRIORITY};

use registry::Registry;
use stats::StatsCell;

// ── Loop-thread marker ────────────────────────────────────────────────────────

thread_local! {
    static ON_LOOP_THREAD: Cell<bool> = const { Cell::new(false) };
    static IN_FOREACH: Cell<bool> = const { Cell::new(false) };
}

fn on_loop_thread() -> bool {
    ON_LOOP_THREAD.with(Cell::get)
}

fn ensure_off_loop(operation: &'static str) -> Result<(), RtError> {
    if on_loop_thread() || IN_FOREACH.with(Cell::get) {
        Err(RtError::Reentrant { operation })
    } else {
        Ok(())
    }
}

/// Marks the current thread as inside a foreach callback until dropped.
struct ForeachMark;

impl ForeachMark {
    fn enter() -> Self {
        IN_FOREACH.with(|m| m.set(true));
        ForeachMark
    }
}

impl Drop for ForeachMark {
    fn drop(&mut self) {
        IN_FOREACH.with(|m| m.set(false));
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    period_ns: AtomicU64,
    finished: AtomicBool,
    devices: PiMutex<Registry<DeviceHandle>>,
    threads: PiMutex<Registry<ThreadHandle>>,
    sender: Mutex<Option<Sender<Envelope>>>,
    stats: StatsCell,
    event_capacity: usize,
    events_per_period: usize,
}

impl Shared {
    fn enqueue(&self, envelope: Envelope) -> Result<(), RtError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(RtError::Stopped);
        };
        tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => RtError::ChannelFull {
                capacity: self.event_capacity,
            },
            TrySendError::Disconnected(_) => RtError::Stopped,
        })
    }

    /// No event can be queued once this returns.
    fn close_sender(&self) {
        self.sender.lock().take();
    }
}

// ── System ────────────────────────────────────────────────────────────────────

/// Process-wide singleton slot.
static INSTANCE: Mutex<Option<Arc<System>>> = parking_lot::const_mutex(None);

/// A running scheduler: one real-time task plus the collections it drives.
///
/// Normally reached through the process-wide instance
/// ([`initiate`](Self::initiate), [`get_instance`](Self::get_instance)).
/// Dropping the last reference stops the loop.
pub struct System {
    shared: Arc<Shared>,
    task: Mutex<Option<Task>>,
}

impl System {
    // ── Singleton ─────────────────────────────────────────────────────────────

    /// Start the process-wide System with `config`, or return the running
    /// one (in which case `config` is ignored).
    ///
    /// # Errors
    /// [`RtError::Creation`] when the real-time task cannot be created;
    /// [`RtError::InvalidPeriod`] for a zero period.
    pub fn initiate(config: &SystemConfig) -> Result<Arc<System>, RtError> {
        let mut slot = INSTANCE.lock();
        if let Some(system) = slot.as_ref() {
            debug!("System already running, configuration ignored");
            return Ok(Arc::clone(system));
        }
        let system = Arc::new(Self::spawn(config)?);
        *slot = Some(Arc::clone(&system));
        Ok(system)
    }

    /// The process-wide System, started with the default configuration on
    /// first use.
    pub fn get_instance() -> Result<Arc<System>, RtError> {
        if let Some(system) = Self::instance() {
            return Ok(system);
        }
        Self::initiate(&SystemConfig::default())
    }

    /// The process-wide System if one is running.
    pub fn instance() -> Option<Arc<System>> {
        INSTANCE.lock().clone()
    }

    /// Stop and release the process-wide System.  Returns `false` if none
    /// was running.
    pub fn shutdown_instance() -> Result<bool, RtError> {
        ensure_off_loop("shutdown_instance")?;
        let Some(system) = INSTANCE.lock().take() else {
            return Ok(false);
        };
        system.stop()?;
        Ok(true)
    }

    /// Start a System that is not registered as the process-wide instance.
    pub(crate) fn spawn(config: &SystemConfig) -> Result<System, RtError> {
        let loop_config = &config.system;
        if loop_config.period_ns == 0 {
            return Err(RtError::InvalidPeriod { period_ns: 0 });
        }
        os::initiate(&config.task)?;

        let event_capacity = loop_config.event_capacity.max(1);
        let (tx, rx) = bounded::<Envelope>(event_capacity);
        let shared = Arc::new(Shared {
            period_ns: AtomicU64::new(loop_config.period_ns),
            finished: AtomicBool::new(false),
            devices: PiMutex::new(Registry::with_capacity("device", loop_config.max_devices)),
            threads: PiMutex::new(Registry::with_capacity("thread", loop_config.max_threads)),
            sender: Mutex::new(Some(tx)),
            stats: StatsCell::default(),
            event_capacity,
            events_per_period: loop_config.events_per_period.max(1),
        });

        let loop_shared = Arc::clone(&shared);
        let task = os::create_task(&config.task, loop_config.period_ns, move |timestep| {
            run_loop(&loop_shared, &rx, timestep)
        })
        .map_err(|e| {
            diag::error_msg("Failed to create the real-time task", &e);
            RtError::from(e)
        })?;

        info!(
            period_ns = loop_config.period_ns,
            realtime = task.is_realtime(),
            event_capacity,
            events_per_period = shared.events_per_period,
            pi_mutex = shared.devices.priority_inheritance(),
            "System started"
        );

        Ok(System {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    // ── Period ────────────────────────────────────────────────────────────────

    /// Current period in nanoseconds.  Lock-free.
    pub fn period_ns(&self) -> u64 {
        self.shared.period_ns.load(Ordering::Acquire)
    }

    /// Change the period.  Blocks until the loop has adopted it, so
    /// [`period_ns`](Self::period_ns) reflects the new value on return.
    ///
    /// # Errors
    /// [`RtError::InvalidPeriod`] for `0` (the period is unchanged), plus
    /// any error of [`post_event`](Self::post_event).
    pub fn set_period(&self, period_ns: u64) -> Result<(), RtError> {
        ensure_off_loop("set_period")?;
        if period_ns == 0 {
            return Err(RtError::InvalidPeriod { period_ns });
        }
        match self.post_event(SetPeriodEvent { period_ns })? {
            0 => {
                info!(period_ns, "Period changed");
                Ok(())
            }
            _ => Err(RtError::InvalidPeriod { period_ns }),
        }
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Queue `event` and block until the loop has run it.  Returns the
    /// callback's value.
    ///
    /// # Errors
    /// * [`RtError::ChannelFull`] – the event channel is at capacity.
    /// * [`RtError::Stopped`] – the System no longer accepts events.
    /// * [`RtError::Cancelled`] – the loop stopped before running the event.
    /// * [`RtError::Reentrant`] – called from the loop thread.
    pub fn post_event<E: Event + 'static>(&self, event: E) -> Result<i32, RtError> {
        ensure_off_loop("post_event")?;
        self.submit(event)?.wait().map(|done| done.retval)
    }

    /// Like [`post_event`](Self::post_event), giving up after `timeout`
    /// with [`CancelReason::Timeout`].  The event stays queued and may still
    /// run; its result is then discarded.
    pub fn post_event_timeout<E: Event + 'static>(
        &self,
        event: E,
        timeout: Duration,
    ) -> Result<i32, RtError> {
        ensure_off_loop("post_event_timeout")?;
        self.submit(event)?
            .wait_timeout(timeout)
            .map(|done| done.retval)
    }

    /// Queue `event` without waiting and return [`EVENT_UNSET`].  The caller
    /// synchronises with the callback on its own.
    pub fn post_event_nonblocking<E: Event + 'static>(&self, event: E) -> Result<i32, RtError> {
        ensure_off_loop("post_event_nonblocking")?;
        self.submit(event)?;
        Ok(EVENT_UNSET)
    }

    /// Queue `event` and return a ticket for its result, including the event
    /// itself once executed.
    pub fn submit_event<E: Event + 'static>(&self, event: E) -> Result<Pending<E>, RtError> {
        ensure_off_loop("submit_event")?;
        self.submit(event)
    }

    fn submit<E: Event + 'static>(&self, event: E) -> Result<Pending<E>, RtError> {
        let (envelope, pending) = event::envelope(event);
        self.shared.enqueue(envelope)?;
        Ok(pending)
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    /// Register `device` at the end of the read/write order.  It is called
    /// from the next traversal on.
    pub fn insert_device(&self, device: Arc<dyn Device>) -> Result<DeviceHandle, RtError> {
        ensure_off_loop("insert_device")?;
        let handle = DeviceHandle::new(device);
        self.shared.devices.lock().push(handle.clone())?;
        info!(id = handle.id(), device = handle.name(), "Device inserted");
        Ok(handle)
    }

    /// Unregister a Device.  Once this returns the loop never calls it
    /// again.  `Ok(false)` if it was not registered.
    pub fn remove_device(&self, handle: &DeviceHandle) -> Result<bool, RtError> {
        ensure_off_loop("remove_device")?;
        let removed = self.shared.devices.lock().remove(handle.id()).is_some();
        if removed {
            info!(id = handle.id(), device = handle.name(), "Device removed");
        } else {
            debug!(id = handle.id(), "Device not registered, nothing removed");
        }
        Ok(removed)
    }

    /// Visit every registered Device in order, under the collection lock.
    ///
    /// The loop is held off while `f` runs, so System calls made from `f`
    /// (posting, inserting, removing, `set_period`, `stop`) fail with
    /// [`RtError::Reentrant`].
    pub fn foreach_device<F: FnMut(&DeviceHandle)>(&self, mut f: F) -> Result<(), RtError> {
        ensure_off_loop("foreach_device")?;
        let _mark = ForeachMark::enter();
        self.shared.devices.lock().iter().for_each(|h| f(h));
        Ok(())
    }

    pub fn device_count(&self) -> Result<usize, RtError> {
        ensure_off_loop("device_count")?;
        Ok(self.shared.devices.lock().len())
    }

    // ── Threads ───────────────────────────────────────────────────────────────

    /// Register `thread` by its priority; after every registered Thread of
    /// the same priority.
    ///
    /// # Errors
    /// [`RtError::InvalidPriority`] above [`MAXIMUM_PRIORITY`],
    /// [`RtError::RegistryFull`] when the collection is full.
    pub fn insert_thread(&self, thread: Arc<dyn Thread>) -> Result<ThreadHandle, RtError> {
        ensure_off_loop("insert_thread")?;
        let handle = ThreadHandle::new(thread);
        if handle.priority() > MAXIMUM_PRIORITY {
            return Err(RtError::InvalidPriority {
                priority: handle.priority(),
                max: MAXIMUM_PRIORITY,
            });
        }
        self.shared.threads.lock().insert_by_priority(handle.clone())?;
        info!(
            id = handle.id(),
            thread = handle.name(),
            priority = handle.priority(),
            "Thread inserted"
        );
        Ok(handle)
    }

    /// Unregister a Thread.  Once this returns the loop never executes it
    /// again.  `Ok(false)` if it was not registered.
    pub fn remove_thread(&self, handle: &ThreadHandle) -> Result<bool, RtError> {
        ensure_off_loop("remove_thread")?;
        let removed = self.shared.threads.lock().remove(handle.id()).is_some();
        if removed {
            info!(id = handle.id(), thread = handle.name(), "Thread removed");
        } else {
            debug!(id = handle.id(), "Thread not registered, nothing removed");
        }
        Ok(removed)
    }

    /// Visit every registered Thread in execution order, under the
    /// collection lock.  Same restrictions on `f` as
    /// [`foreach_device`](Self::foreach_device).
    pub fn foreach_thread<F: FnMut(&ThreadHandle)>(&self, mut f: F) -> Result<(), RtError> {
        ensure_off_loop("foreach_thread")?;
        let _mark = ForeachMark::enter();
        self.shared.threads.lock().iter().for_each(|h| f(h));
        Ok(())
    }

    pub fn thread_count(&self) -> Result<usize, RtError> {
        ensure_off_loop("thread_count")?;
        Ok(self.shared.threads.lock().len())
    }

    // ── State ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> LoopStats {
        self.shared.stats.snapshot()
    }

    /// `false` once the loop has been asked to stop or its task has
    /// returned.
    pub fn is_running(&self) -> bool {
        !self.shared.finished.load(Ordering::Acquire)
            && self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting events, let the loop finish its current period and
    /// join it.  Events still queued are cancelled.  Idempotent.
    pub fn stop(&self) -> Result<(), RtError> {
        ensure_off_loop("stop")?;
        self.halt();
        Ok(())
    }

    fn halt(&self) {
        self.shared.close_sender();
        self.shared.finished.store(true, Ordering::Release);

        if on_loop_thread() {
            // Cannot join ourselves; the loop exits after this period.
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            os::delete_task(task);
            let stats = self.stats();
            info!(
                periods = stats.periods,
                overruns = stats.overruns,
                events_executed = stats.events_executed,
                events_cancelled = stats.events_cancelled,
                "System stopped"
            );
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("period_ns", &self.period_ns())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ── Period change ─────────────────────────────────────────────────────────────

struct SetPeriodEvent {
    period_ns: u64,
}

impl Event for SetPeriodEvent {
    fn callback(&mut self, ctx: &mut EventContext<'_>) -> i32 {
        match ctx.set_period(self.period_ns) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }
}

// ── Real-time loop ────────────────────────────────────────────────────────────

fn run_loop(shared: &Shared, rx: &Receiver<Envelope>, timestep: &mut Timestep) {
    ON_LOOP_THREAD.with(|m| m.set(true));
    let _exit = LoopExit { shared, rx };

    info!(
        period_ns = timestep.period_ns(),
        realtime = timestep.is_realtime(),
        "Real-time loop running"
    );

    while !shared.finished.load(Ordering::Acquire) {
        let start = os::get_time();

        drain_events(shared, rx, timestep);
        if shared.finished.load(Ordering::Acquire) {
            break;
        }

        {
            let devices = shared.devices.lock();
            for d in devices.iter().filter(|d| d.is_active()) {
                d.device().read();
            }
        }
        {
            let threads = shared.threads.lock();
            for t in threads.iter().filter(|t| t.is_active()) {
                t.thread().execute();
            }
        }
        {
            let devices = shared.devices.lock();
            for d in devices.iter().filter(|d| d.is_active()) {
                d.device().write();
            }
        }

        let end = os::get_time();
        let overrun = end > timestep.next_wake_ns();
        let skipped = timestep.sleep_timestep();
        shared
            .stats
            .record_period(end.saturating_sub(start), overrun, skipped);
    }
}

/// Execute at most `min(queued now, events_per_period)` events, in FIFO order.
fn drain_events(shared: &Shared, rx: &Receiver<Envelope>, timestep: &mut Timestep) {
    let budget = rx.len().min(shared.events_per_period);
    if budget == 0 {
        return;
    }
    let mut ctx = EventContext::new(&shared.period_ns, &shared.finished, &shared.stats, timestep);
    let mut executed = 0;
    for _ in 0..budget {
        match rx.try_recv() {
            Ok(job) => {
                job.run(&mut ctx);
                executed += 1;
            }
            Err(_) => break,
        }
    }
    shared.stats.record_events(executed);
}

/// Runs when the loop exits, normally or by a panicking hook.
struct LoopExit<'a> {
    shared: &'a Shared,
    rx: &'a Receiver<Envelope>,
}

impl Drop for LoopExit<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Real-time loop panicked, scheduler stopped");
            diag::print_backtrace();
        }

        self.shared.close_sender();
        self.shared.finished.store(true, Ordering::Release);

        // Dropping an envelope wakes its waiter with `Cancelled(Stopped)`.
        let mut cancelled = 0;
        while let Ok(job) = self.rx.try_recv() {
            drop(job);
            cancelled += 1;
        }
        self.shared.stats.record_cancelled(cancelled);
        if cancelled > 0 {
            warn!(cancelled, "Queued events cancelled at shutdown");
        }

        ON_LOOP_THREAD.with(|m| m.set(false));
        info!(
            periods = self.shared.stats.snapshot().periods,
            "Real-time loop exited"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{from_fn, Completed};
    use crate::thread::Priority;
    use std::sync::atomic::AtomicUsize;
    use std::thread as std_thread;

    fn spawn_with(config: SystemConfig) -> Arc<System> {
        Arc::new(System::spawn(&config).unwrap())
    }

    fn spawn_test_system() -> Arc<System> {
        spawn_with(SystemConfig::testing().with_period_ns(200_000))
    }

    /// A system whose loop sleeps long enough to keep posted events queued.
    fn spawn_slow_system(capacity: usize) -> Arc<System> {
        let sys = spawn_with(
            SystemConfig::testing()
                .with_period_ns(300_000_000)
                .with_event_capacity(capacity),
        );
        // Returns right after a drain, so the loop now sleeps for a period.
        sys.post_event(from_fn(|_| 0)).unwrap();
        sys
    }

    /// Wait for the start of a fresh period.
    fn sync(sys: &System) {
        sys.post_event(from_fn(|_| 0)).unwrap();
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingDevice {
        tag: &'static str,
        log: Log,
    }

    impl Device for RecordingDevice {
        fn read(&self) {
            self.log.lock().push(format!("r:{}", self.tag));
        }
        fn write(&self) {
            self.log.lock().push(format!("w:{}", self.tag));
        }
    }

    struct RecordingThread {
        priority: Priority,
        tag: &'static str,
        log: Log,
    }

    impl Thread for RecordingThread {
        fn execute(&self) {
            self.log.lock().push(format!("x:{}", self.tag));
        }
        fn priority(&self) -> Priority {
            self.priority
        }
    }

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
        writes: AtomicUsize,
    }

    impl Device for Counter {
        fn read(&self) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        fn write(&self) {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Thread for Counter {
        fn execute(&self) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Counter {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::Relaxed)
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::Relaxed)
        }
    }

    /// Clear `log` from inside the loop, at the start of a period.
    fn clear_in_loop(sys: &System, log: &Log) {
        let log = Arc::clone(log);
        sys.post_event(from_fn(move |_| {
            log.lock().clear();
            0
        }))
        .unwrap();
    }

    // ── Period ────────────────────────────────────────────────────────────────

    #[test]
    fn default_period_then_set_period() {
        let sys = spawn_with(SystemConfig::testing());
        assert_eq!(sys.period_ns(), 1_000_000);

        sys.set_period(2_000_000).unwrap();
        assert_eq!(sys.period_ns(), 2_000_000);
    }

    #[test]
    fn zero_period_is_rejected_and_previous_kept() {
        let sys = spawn_test_system();
        let err = sys.set_period(0).unwrap_err();
        assert!(matches!(err, RtError::InvalidPeriod { period_ns: 0 }));
        assert_eq!(sys.period_ns(), 200_000);
    }

    #[test]
    fn zero_period_config_fails_to_spawn() {
        let err = System::spawn(&SystemConfig::testing().with_period_ns(0)).unwrap_err();
        assert!(matches!(err, RtError::InvalidPeriod { .. }));
    }

    #[test]
    fn period_change_is_visible_to_same_period_hooks() {
        /// Records what `System::period_ns` reports in the first `read`
        /// after being armed.
        struct PeriodWatcher {
            sys: Arc<System>,
            armed: AtomicBool,
            period_seen: AtomicU64,
            periods_seen: AtomicU64,
        }
        impl Device for PeriodWatcher {
            fn read(&self) {
                if self.armed.swap(false, Ordering::AcqRel) {
                    self.period_seen.store(self.sys.period_ns(), Ordering::Relaxed);
                    self.periods_seen
                        .store(self.sys.stats().periods, Ordering::Relaxed);
                }
            }
        }

        let sys = spawn_test_system();
        let watcher = Arc::new(PeriodWatcher {
            sys: Arc::clone(&sys),
            armed: AtomicBool::new(false),
            period_seen: AtomicU64::new(0),
            periods_seen: AtomicU64::new(u64::MAX),
        });
        let handle = sys.insert_device(watcher.clone()).unwrap();

        let arm = Arc::clone(&watcher);
        let event_period = sys
            .submit_event(from_fn(move |ctx| {
                ctx.set_period(400_000).unwrap();
                arm.armed.store(true, Ordering::Release);
                ctx.stats().periods as i32
            }))
            .unwrap()
            .wait()
            .unwrap()
            .retval;
        sync(&sys);

        assert_eq!(watcher.period_seen.load(Ordering::Relaxed), 400_000);
        assert_eq!(
            watcher.periods_seen.load(Ordering::Relaxed),
            event_period as u64,
            "read ran in a later period than the change"
        );
        assert_eq!(sys.period_ns(), 400_000);

        // The watcher holds the System; break the cycle.
        sys.remove_device(&handle).unwrap();
    }

    // ── Events ────────────────────────────────────────────────────────────────

    #[test]
    fn post_event_returns_callback_value() {
        let sys = spawn_test_system();
        assert_eq!(sys.post_event(from_fn(|_| 0)).unwrap(), 0);
        assert_eq!(sys.post_event(from_fn(|_| 42)).unwrap(), 42);
    }

    #[test]
    fn submit_event_hands_back_the_event() {
        struct PeriodReader {
            period_seen: u64,
        }
        impl Event for PeriodReader {
            fn callback(&mut self, ctx: &mut EventContext<'_>) -> i32 {
                self.period_seen = ctx.period_ns();
                1
            }
        }

        let sys = spawn_test_system();
        let done: Completed<PeriodReader> = sys
            .submit_event(PeriodReader { period_seen: 0 })
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(done.retval, 1);
        assert_eq!(done.event.period_seen, 200_000);
    }

    #[test]
    fn events_run_in_post_order() {
        let sys = spawn_test_system();
        let log: Log = Arc::default();
        for i in 0..5 {
            let log = Arc::clone(&log);
            let rc = sys
                .post_event_nonblocking(from_fn(move |_| {
                    log.lock().push(i.to_string());
                    0
                }))
                .unwrap();
            assert_eq!(rc, EVENT_UNSET);
        }
        sync(&sys);
        assert_eq!(*log.lock(), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn drain_is_capped_per_period() {
        let sys = spawn_with(
            SystemConfig::testing()
                .with_period_ns(300_000_000)
                .with_event_capacity(8)
                .with_events_per_period(2),
        );
        sync(&sys);

        let mut pendings = Vec::new();
        for _ in 0..4 {
            pendings.push(sys.submit_event(from_fn(|ctx| ctx.stats().periods as i32)).unwrap());
        }
        let periods: Vec<i32> = pendings
            .into_iter()
            .map(|p| p.wait().unwrap().retval)
            .collect();
        assert_eq!(periods[0], periods[1]);
        assert_eq!(periods[2], periods[3]);
        assert!(periods[2] > periods[1], "third event ran in the same period");
    }

    #[test]
    fn full_channel_rejects_post() {
        let sys = spawn_slow_system(1);
        sys.post_event_nonblocking(from_fn(|_| 0)).unwrap();
        let err = sys.post_event_nonblocking(from_fn(|_| 0)).unwrap_err();
        assert!(matches!(err, RtError::ChannelFull { capacity: 1 }));
    }

    #[test]
    fn timeout_reports_cancelled() {
        let sys = spawn_slow_system(4);
        let err = sys
            .post_event_timeout(from_fn(|_| 0), Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, RtError::Cancelled(CancelReason::Timeout)));
    }

    #[test]
    fn stop_cancels_queued_events_and_rejects_new_ones() {
        let sys = spawn_slow_system(4);
        let pending = sys.submit_event(from_fn(|_| 0)).unwrap();

        sys.stop().unwrap();
        assert!(!sys.is_running());
        assert!(matches!(
            pending.wait(),
            Err(RtError::Cancelled(CancelReason::Stopped))
        ));
        assert_eq!(sys.stats().events_cancelled, 1);
        assert!(matches!(
            sys.post_event(from_fn(|_| 0)),
            Err(RtError::Stopped)
        ));
        // Second stop is a no-op.
        sys.stop().unwrap();
    }

    #[test]
    fn request_stop_from_event_ends_loop() {
        let sys = spawn_test_system();
        sys.post_event(from_fn(|ctx| {
            ctx.request_stop();
            0
        }))
        .unwrap();
        assert!(!sys.is_running());
        let res = sys.post_event(from_fn(|_| 0));
        assert!(matches!(
            res,
            Err(RtError::Stopped) | Err(RtError::Cancelled(CancelReason::Stopped))
        ));
    }

    // ── Reentrancy ────────────────────────────────────────────────────────────

    #[test]
    fn posting_from_callback_is_rejected() {
        let sys = spawn_test_system();
        let inner = Arc::clone(&sys);
        let rc = sys
            .post_event(from_fn(move |_| {
                let nested = inner.post_event(from_fn(|_| 0));
                let stop = inner.stop();
                i32::from(
                    matches!(nested, Err(RtError::Reentrant { operation: "post_event" }))
                        && matches!(stop, Err(RtError::Reentrant { .. })),
                )
            }))
            .unwrap();
        assert_eq!(rc, 1);
        assert!(sys.is_running());
    }

    #[test]
    fn posting_from_foreach_is_rejected() {
        let sys = spawn_test_system();
        sys.insert_device(Arc::new(Counter::default())).unwrap();
        sys.insert_thread(Arc::new(Counter::default())).unwrap();

        let mut outcomes = Vec::new();
        sys.foreach_device(|_| {
            outcomes.push(sys.post_event(from_fn(|_| 0)));
            outcomes.push(sys.post_event_nonblocking(from_fn(|_| 0)));
            outcomes.push(sys.set_period(400_000).map(|()| 0));
            outcomes.push(
                sys.insert_device(Arc::new(Counter::default()))
                    .map(|_| 0),
            );
            outcomes.push(sys.stop().map(|()| 0));
        })
        .unwrap();
        sys.foreach_thread(|_| {
            outcomes.push(sys.submit_event(from_fn(|_| 0)).map(|_| 0));
            outcomes.push(sys.device_count().map(|n| n as i32));
        })
        .unwrap();

        assert_eq!(outcomes.len(), 7);
        for outcome in &outcomes {
            assert!(
                matches!(outcome, Err(RtError::Reentrant { .. })),
                "{outcome:?}"
            );
        }

        // The mark is gone once foreach returns.
        assert_eq!(sys.post_event(from_fn(|_| 9)).unwrap(), 9);
        assert_eq!(sys.device_count().unwrap(), 1);
        assert_eq!(sys.period_ns(), 200_000);
        assert!(sys.is_running());
    }

    #[test]
    fn foreach_mark_is_cleared_after_panicking_callback() {
        let sys = spawn_test_system();
        sys.insert_device(Arc::new(Counter::default())).unwrap();

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = sys.foreach_device(|_| panic!("callback failed"));
        }));
        assert!(caught.is_err());
        assert_eq!(sys.post_event(from_fn(|_| 1)).unwrap(), 1);
    }

    #[test]
    fn inserting_from_hook_is_rejected() {
        struct Meddler {
            sys: Mutex<Option<Arc<System>>>,
            rejected: AtomicBool,
        }
        impl Device for Meddler {
            fn read(&self) {
                if let Some(sys) = self.sys.lock().take() {
                    let res = sys.insert_device(Arc::new(Counter::default()));
                    self.rejected
                        .store(matches!(res, Err(RtError::Reentrant { .. })), Ordering::Relaxed);
                }
            }
        }

        let sys = spawn_test_system();
        let meddler = Arc::new(Meddler {
            sys: Mutex::new(Some(Arc::clone(&sys))),
            rejected: AtomicBool::new(false),
        });
        sys.insert_device(meddler.clone()).unwrap();
        sync(&sys);
        sync(&sys);
        assert!(meddler.rejected.load(Ordering::Relaxed));
        assert_eq!(sys.device_count().unwrap(), 1);
    }

    // ── Devices and Threads ───────────────────────────────────────────────────

    #[test]
    fn period_phases_follow_fixed_order() {
        let sys = spawn_test_system();
        let log: Log = Arc::default();
        for tag in ["a", "b"] {
            sys.insert_device(Arc::new(RecordingDevice {
                tag,
                log: Arc::clone(&log),
            }))
            .unwrap();
        }
        for (priority, tag) in [(5, "low"), (90, "high"), (20, "mid"), (20, "mid2")] {
            sys.insert_thread(Arc::new(RecordingThread {
                priority,
                tag,
                log: Arc::clone(&log),
            }))
            .unwrap();
        }

        clear_in_loop(&sys, &log);
        std_thread::sleep(Duration::from_millis(5));
        sys.stop().unwrap();

        let expected = [
            "r:a", "r:b", "x:high", "x:mid", "x:mid2", "x:low", "w:a", "w:b",
        ];
        let log = log.lock();
        assert!(log.len() >= expected.len());
        assert_eq!(log.len() % expected.len(), 0, "partial period in {log:?}");
        for period in log.chunks(expected.len()) {
            assert_eq!(period, expected);
        }
    }

    #[test]
    fn foreach_visits_in_order() {
        let sys = spawn_test_system();
        let d1 = sys.insert_device(Arc::new(Counter::default())).unwrap();
        let d2 = sys.insert_device(Arc::new(Counter::default())).unwrap();
        let t_low = sys.insert_thread(Arc::new(Counter::default())).unwrap();
        let log: Log = Arc::default();
        let t_high = sys
            .insert_thread(Arc::new(RecordingThread {
                priority: 70,
                tag: "t",
                log,
            }))
            .unwrap();

        let mut devices = Vec::new();
        sys.foreach_device(|h| devices.push(h.id())).unwrap();
        assert_eq!(devices, vec![d1.id(), d2.id()]);

        let mut threads = Vec::new();
        sys.foreach_thread(|h| threads.push(h.id())).unwrap();
        assert_eq!(threads, vec![t_high.id(), t_low.id()]);
        assert_eq!(sys.thread_count().unwrap(), 2);
    }

    #[test]
    fn removed_device_is_never_called_again() {
        let sys = spawn_test_system();
        let dev = Arc::new(Counter::default());
        let handle = sys.insert_device(dev.clone()).unwrap();
        sync(&sys);
        sync(&sys);
        assert!(dev.hits() > 0);

        assert!(sys.remove_device(&handle).unwrap());
        let after = dev.hits();
        std_thread::sleep(Duration::from_millis(5));
        assert_eq!(dev.hits(), after);

        // Unknown handle.
        assert!(!sys.remove_device(&handle).unwrap());
    }

    #[test]
    fn removed_thread_is_never_called_again() {
        let sys = spawn_test_system();
        let thread = Arc::new(Counter::default());
        let handle = sys.insert_thread(thread.clone()).unwrap();
        sync(&sys);
        sync(&sys);
        assert!(sys.remove_thread(&handle).unwrap());
        let after = thread.hits();
        std_thread::sleep(Duration::from_millis(5));
        assert_eq!(thread.hits(), after);
        assert_eq!(sys.thread_count().unwrap(), 0);
    }

    #[test]
    fn inactive_thread_is_skipped_until_reactivated() {
        let sys = spawn_test_system();
        let thread = Arc::new(Counter::default());
        let handle = sys.insert_thread(thread.clone()).unwrap();
        sync(&sys);

        handle.set_active(false);
        sync(&sys);
        let paused = thread.hits();
        std_thread::sleep(Duration::from_millis(5));
        assert_eq!(thread.hits(), paused);
        assert_eq!(sys.thread_count().unwrap(), 1, "deactivation must not remove");

        handle.set_active(true);
        sync(&sys);
        sync(&sys);
        assert!(thread.hits() > paused);
    }

    #[test]
    fn inactive_device_skips_read_and_write() {
        let sys = spawn_test_system();
        let dev = Arc::new(Counter::default());
        let handle = sys.insert_device(dev.clone()).unwrap();
        sync(&sys);
        sync(&sys);
        assert!(dev.hits() > 0);
        assert!(dev.writes() > 0);

        handle.set_active(false);
        assert!(!handle.is_active());
        sync(&sys);
        let (reads, writes) = (dev.hits(), dev.writes());
        std_thread::sleep(Duration::from_millis(5));
        assert_eq!(dev.hits(), reads);
        assert_eq!(dev.writes(), writes);
        assert_eq!(sys.device_count().unwrap(), 1, "deactivation must not remove");

        handle.set_active(true);
        sync(&sys);
        sync(&sys);
        assert!(dev.hits() > reads);
        assert!(dev.writes() > writes);
    }

    #[test]
    fn priority_above_maximum_is_rejected() {
        struct TooHigh;
        impl Thread for TooHigh {
            fn priority(&self) -> Priority {
                MAXIMUM_PRIORITY + 1
            }
        }
        let sys = spawn_test_system();
        let err = sys.insert_thread(Arc::new(TooHigh)).unwrap_err();
        assert!(matches!(err, RtError::InvalidPriority { priority: 101, max: 100 }));
        assert_eq!(sys.thread_count().unwrap(), 0);
    }

    #[test]
    fn stats_count_periods_and_events() {
        let sys = spawn_test_system();
        sync(&sys);
        sync(&sys);
        let s = sys.stats();
        assert!(s.periods >= 1);
        assert!(s.events_executed >= 2);
    }

    // ── Singleton ─────────────────────────────────────────────────────────────

    /// Serialises tests that touch the process-wide instance.
    static SINGLETON: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn singleton_lifecycle() {
        let _guard = SINGLETON.lock();
        let _ = System::shutdown_instance();

        assert!(System::instance().is_none());
        let first = System::initiate(&SystemConfig::testing()).unwrap();
        let again = System::get_instance().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        assert!(System::shutdown_instance().unwrap());
        assert!(!first.is_running());
        assert!(System::instance().is_none());
        assert!(!System::shutdown_instance().unwrap());
    }

    #[test]
    fn concurrent_initiate_yields_one_instance() {
        let _guard = SINGLETON.lock();
        let _ = System::shutdown_instance();

        let handles: Vec<_> = (0..8)
            .map(|_| std_thread::spawn(|| System::initiate(&SystemConfig::testing()).unwrap()))
            .collect();
        let systems: Vec<Arc<System>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &systems[1..] {
            assert!(Arc::ptr_eq(&systems[0], s));
        }
        assert!(Arc::ptr_eq(&systems[0], &System::get_instance().unwrap()));

        assert!(System::shutdown_instance().unwrap());
    }
}
