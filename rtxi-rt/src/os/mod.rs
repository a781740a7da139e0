/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Thin abstraction over the host's real-time task primitives.
//!
//! Everything the scheduler needs from the operating system goes through this
//! module:
//!
//! ```text
//! initiate()  ──►  create_task(config, period, entry)  ──►  entry(&mut Timestep)
//!                                                             │  loop {
//!                                                             │      ... work ...
//!                                                             │      timestep.sleep_timestep();
//!                                                             │  }
//! shutdown()  ◄──  delete_task(task)                     ◄────┘  returns
//! ```
//!
//! # Platform split
//!
//! | Host | Scheduling | Sleep | Clock |
//! |---|---|---|---|
//! | Linux | `SCHED_FIFO` via `pthread_setschedparam`, optional CPU pin, `mlockall` | `clock_nanosleep(TIMER_ABSTIME)` | `CLOCK_MONOTONIC` |
//! | Other | best-effort (normal thread priority) | `std::thread::sleep` | `std::time::Instant` |
//!
//! # Realtime fallback policy
//! When the host refuses `SCHED_FIFO` (missing `CAP_SYS_NICE`, non-Linux host),
//! [`create_task`] either fails with [`OsError::RealtimeUnavailable`]
//! (`require_realtime = true`) or logs a warning and runs the task best-effort.
//! The loop behaves identically in both modes; only jitter differs.
//! [`is_realtime`] reports which one was actually obtained.

pub mod mutex;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(not(target_os = "linux"))]
use fallback as platform;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Process-wide state ────────────────────────────────────────────────────────

/// Set by [`initiate`], cleared by [`shutdown`].
static INITIATED: AtomicBool = AtomicBool::new(false);

/// `true` while `mlockall` is in effect.
static MEMORY_LOCKED: AtomicBool = AtomicBool::new(false);

/// `true` once a task obtained `SCHED_FIFO`.
static REALTIME: AtomicBool = AtomicBool::new(false);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures of the OS task layer.
///
/// All of them surface synchronously to the caller of [`initiate`] or
/// [`create_task`]; nothing in this module fails later, inside the task.
#[derive(Debug, Error)]
pub enum OsError {
    /// The OS refused to create the execution context.
    #[error("failed to spawn task '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Realtime scheduling was required by the configuration but refused by
    /// the host.
    #[error("real-time scheduling unavailable for task '{name}': {reason}")]
    RealtimeUnavailable { name: String, reason: String },

    /// [`create_task`] was called before [`initiate`].
    #[error("OS task layer not initiated; call os::initiate() first")]
    NotInitiated,

    /// The task thread died before reporting how it was scheduled.
    #[error("task '{name}' exited before reporting its start-up state")]
    StartupLost { name: String },
}

// ── TaskConfig ────────────────────────────────────────────────────────────────

/// Scheduling parameters for a periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// OS thread name (visible in `top -H`, `ps -L`).
    pub name: String,

    /// Request `SCHED_FIFO` for the task thread.
    pub realtime: bool,

    /// `SCHED_FIFO` priority, clamped to 1–99.
    pub priority: i32,

    /// Pin the task thread to this CPU.
    pub cpu_affinity: Option<usize>,

    /// Lock all current and future pages at [`initiate`].
    pub lock_memory: bool,

    /// Fail task creation instead of falling back to best-effort scheduling.
    pub require_realtime: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: String::from("rtxi-rt"),
            realtime: true,
            priority: 80,
            cpu_affinity: None,
            lock_memory: true,
            require_realtime: false,
        }
    }
}

impl TaskConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// No realtime features at all: normal thread priority, no memory locking.
    pub fn minimal() -> Self {
        Self {
            realtime: false,
            lock_memory: false,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cpu_affinity(mut self, cpu: usize) -> Self {
        self.cpu_affinity = Some(cpu);
        self
    }

    pub fn with_lock_memory(mut self, enabled: bool) -> Self {
        self.lock_memory = enabled;
        self
    }

    pub fn with_require_realtime(mut self, required: bool) -> Self {
        self.require_realtime = required;
        self
    }
}

// ── Facility setup / teardown ─────────────────────────────────────────────────

/// Process-wide setup of the real-time facility.
///
/// Idempotent: only the first call after start-up (or after [`shutdown`])
/// does any work.  Memory locking failures are logged and tolerated.
///
/// # Errors
/// [`OsError::RealtimeUnavailable`] when `config.require_realtime` is set on a
/// host that cannot provide realtime scheduling at all.
pub fn initiate(config: &TaskConfig) -> Result<(), OsError> {
    if config.require_realtime && !platform::realtime_capable() {
        return Err(OsError::RealtimeUnavailable {
            name: config.name.clone(),
            reason: String::from("host does not permit real-time scheduling"),
        });
    }

    if INITIATED.swap(true, Ordering::AcqRel) {
        debug!("OS task layer already initiated");
        return Ok(());
    }

    if config.lock_memory {
        match platform::lock_memory() {
            Ok(()) => {
                MEMORY_LOCKED.store(true, Ordering::Release);
                info!("Memory locked (MCL_CURRENT | MCL_FUTURE)");
            }
            Err(e) => warn!(error = %e, "Could not lock memory, page faults may add jitter"),
        }
    }

    info!(
        realtime_capable = platform::realtime_capable(),
        "OS task layer initiated"
    );
    Ok(())
}

/// Process-wide teardown.  Safe to call at any time, including when
/// [`initiate`] never ran or failed half-way.
pub fn shutdown() {
    if MEMORY_LOCKED.swap(false, Ordering::AcqRel) {
        platform::unlock_memory();
    }
    if INITIATED.swap(false, Ordering::AcqRel) {
        info!("OS task layer shut down");
    }
}

/// Monotonic clock in nanoseconds.
///
/// Only meaningful as a difference between two readings.
pub fn get_time() -> u64 {
    platform::now_ns()
}

/// Whether a task actually obtained deterministic (`SCHED_FIFO`) scheduling.
pub fn is_realtime() -> bool {
    REALTIME.load(Ordering::Acquire)
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// Owner-side handle of a periodic task created by [`create_task`].
#[derive(Debug)]
pub struct Task {
    name: String,
    realtime: bool,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this task runs under `SCHED_FIFO`.
    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// `true` once the task's entry function has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Spawn a dedicated execution context running `entry`.
///
/// Scheduling parameters are applied inside the new thread before `entry`
/// runs; the outcome is reported back so failures surface here, not later.
/// `entry` receives the task's [`Timestep`], initialised with `period_ns`.
///
/// # Errors
/// * [`OsError::NotInitiated`] – [`initiate`] has not been called.
/// * [`OsError::Spawn`] – the OS could not create the thread.
/// * [`OsError::RealtimeUnavailable`] – `SCHED_FIFO` refused and
///   `config.require_realtime` is set.
pub fn create_task<F>(config: &TaskConfig, period_ns: u64, entry: F) -> Result<Task, OsError>
where
    F: FnOnce(&mut Timestep) + Send + 'static,
{
    if !INITIATED.load(Ordering::Acquire) {
        return Err(OsError::NotInitiated);
    }

    let (ready_tx, ready_rx) = bounded::<Result<bool, OsError>>(1);
    let task_config = config.clone();

    let handle = thread::Builder::new()
        .name(config.name.clone())
        .spawn(move || {
            let realtime = match apply_scheduling(&task_config) {
                Ok(realtime) => realtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(realtime)).is_err() {
                return;
            }
            drop(ready_tx);

            let mut timestep = Timestep::new(period_ns, realtime);
            entry(&mut timestep);
        })
        .map_err(|source| OsError::Spawn {
            name: config.name.clone(),
            source,
        })?;

    match ready_rx.recv() {
        Ok(Ok(realtime)) => {
            info!(
                task = %config.name,
                realtime,
                priority = config.priority,
                cpu = ?config.cpu_affinity,
                period_ns,
                "Task created"
            );
            Ok(Task {
                name: config.name.clone(),
                realtime,
                handle: Some(handle),
            })
        }
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(OsError::StartupLost {
                name: config.name.clone(),
            })
        }
    }
}

/// Join a task.  The entry function must already have observed its stop
/// request, otherwise this blocks until it does.
pub fn delete_task(mut task: Task) {
    if let Some(handle) = task.handle.take() {
        if handle.join().is_err() {
            warn!(task = %task.name, "Task panicked before it was deleted");
        } else {
            debug!(task = %task.name, "Task deleted");
        }
    }
}

/// Runs on the new task thread.  Returns whether `SCHED_FIFO` was obtained.
fn apply_scheduling(config: &TaskConfig) -> Result<bool, OsError> {
    if let Some(cpu) = config.cpu_affinity {
        if let Err(e) = platform::pin_to_cpu(cpu) {
            warn!(task = %config.name, cpu, error = %e, "Could not pin task to CPU");
        }
    }

    if !config.realtime {
        return Ok(false);
    }

    match platform::set_fifo_priority(config.priority) {
        Ok(()) => {
            REALTIME.store(true, Ordering::Release);
            Ok(true)
        }
        Err(e) if config.require_realtime => Err(OsError::RealtimeUnavailable {
            name: config.name.clone(),
            reason: e.to_string(),
        }),
        Err(e) => {
            warn!(
                task = %config.name,
                error = %e,
                "SCHED_FIFO refused, falling back to best-effort scheduling"
            );
            Ok(false)
        }
    }
}

// ── Timestep ──────────────────────────────────────────────────────────────────

/// Period bookkeeping of one task, owned by the task thread.
///
/// Boundaries are absolute: `boundary[n + 1] = boundary[n] + period`, so
/// execution time inside a period never accumulates as drift.
#[derive(Debug)]
pub struct Timestep {
    period_ns: u64,
    next_wake_ns: u64,
    realtime: bool,
}

impl Timestep {
    fn new(period_ns: u64, realtime: bool) -> Self {
        let period_ns = period_ns.max(1);
        Self {
            period_ns,
            next_wake_ns: get_time().saturating_add(period_ns),
            realtime,
        }
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Absolute time of the upcoming period boundary.
    pub fn next_wake_ns(&self) -> u64 {
        self.next_wake_ns
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// Change the cadence.  The boundary already scheduled is kept; the new
    /// period applies from that boundary on, never mid-period.
    pub fn set_period(&mut self, period_ns: u64) {
        self.period_ns = period_ns.max(1);
    }

    /// Block until the next period boundary.
    ///
    /// Returns the number of boundaries skipped because the work overran by
    /// more than a whole period.  Skipped boundaries are dropped, never
    /// replayed back-to-back.
    pub fn sleep_timestep(&mut self) -> u64 {
        platform::sleep_until_ns(self.next_wake_ns);

        let now = get_time();
        let mut next = self.next_wake_ns.saturating_add(self.period_ns);
        let mut skipped = 0;
        if now >= next {
            skipped = (now - self.next_wake_ns) / self.period_ns;
            next = self
                .next_wake_ns
                .saturating_add((skipped + 1).saturating_mul(self.period_ns));
        }
        self.next_wake_ns = next;
        skipped
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn test_config(name: &str) -> TaskConfig {
        TaskConfig::minimal().with_name(name)
    }

    // ── TaskConfig ────────────────────────────────────────────────────────────

    #[test]
    fn default_config_requests_realtime() {
        let cfg = TaskConfig::default();
        assert!(cfg.realtime);
        assert!(cfg.lock_memory);
        assert!(!cfg.require_realtime);
        assert_eq!(cfg.priority, 80);
        assert!(cfg.cpu_affinity.is_none());
    }

    #[test]
    fn minimal_config_disables_realtime_features() {
        let cfg = TaskConfig::minimal();
        assert!(!cfg.realtime);
        assert!(!cfg.lock_memory);
    }

    #[test]
    fn builder_sets_fields() {
        let cfg = TaskConfig::new()
            .with_name("loop")
            .with_priority(60)
            .with_cpu_affinity(3)
            .with_lock_memory(false)
            .with_require_realtime(true);
        assert_eq!(cfg.name, "loop");
        assert!(!cfg.lock_memory);
        assert_eq!(cfg.priority, 60);
        assert_eq!(cfg.cpu_affinity, Some(3));
        assert!(cfg.require_realtime);
    }

    // ── Clock ─────────────────────────────────────────────────────────────────

    #[test]
    fn get_time_is_monotonic() {
        let a = get_time();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = get_time();
        assert!(b > a);
        assert!(b - a >= 1_000_000, "slept 1ms but clock advanced {}ns", b - a);
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    #[test]
    fn task_runs_entry_and_joins() {
        initiate(&TaskConfig::minimal()).unwrap();

        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let task = create_task(&test_config("os-test-join"), 200_000, move |ts| {
            for _ in 0..5 {
                counter.fetch_add(1, Ordering::Relaxed);
                ts.sleep_timestep();
            }
        })
        .unwrap();

        assert_eq!(task.name(), "os-test-join");
        assert!(!task.is_realtime(), "minimal config never requests SCHED_FIFO");
        delete_task(task);
        assert_eq!(ticks.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn task_reports_finished_after_entry_returns() {
        initiate(&TaskConfig::minimal()).unwrap();

        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        let task = create_task(&test_config("os-test-finished"), 1_000_000, move |_| {
            let _ = gate.recv();
        })
        .unwrap();
        assert!(!task.is_finished());

        drop(release);
        let deadline = get_time() + 5_000_000_000;
        while !task.is_finished() && get_time() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(task.is_finished());
        delete_task(task);
    }

    #[test]
    fn timestep_keeps_absolute_cadence() {
        initiate(&TaskConfig::minimal()).unwrap();

        let elapsed = Arc::new(AtomicU64::new(0));
        let out = Arc::clone(&elapsed);
        let task = create_task(&test_config("os-test-cadence"), 1_000_000, move |ts| {
            let start = get_time();
            for _ in 0..10 {
                ts.sleep_timestep();
            }
            out.store(get_time() - start, Ordering::Relaxed);
        })
        .unwrap();
        delete_task(task);

        // Ten 1 ms periods: never shorter, and not wildly longer.
        let ns = elapsed.load(Ordering::Relaxed);
        assert!(ns >= 9_000_000, "ten periods took only {ns}ns");
        assert!(ns < 200_000_000, "ten periods took {ns}ns");
    }

    #[test]
    fn set_period_applies_from_next_boundary() {
        initiate(&TaskConfig::minimal()).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let out = Arc::clone(&seen);
        let task = create_task(&test_config("os-test-period"), 500_000, move |ts| {
            let before = ts.next_wake_ns();
            ts.set_period(2_000_000);
            // The boundary already scheduled does not move.
            assert_eq!(ts.next_wake_ns(), before);
            ts.sleep_timestep();
            out.store(ts.next_wake_ns() - before, Ordering::Relaxed);
        })
        .unwrap();
        delete_task(task);

        assert_eq!(seen.load(Ordering::Relaxed), 2_000_000);
    }

    #[test]
    fn overrun_reports_skipped_boundaries() {
        initiate(&TaskConfig::minimal()).unwrap();

        let skipped = Arc::new(AtomicU64::new(0));
        let out = Arc::clone(&skipped);
        let task = create_task(&test_config("os-test-overrun"), 1_000_000, move |ts| {
            // Overrun by several whole periods.
            std::thread::sleep(std::time::Duration::from_millis(5));
            out.store(ts.sleep_timestep(), Ordering::Relaxed);
            assert!(ts.next_wake_ns() > get_time());
        })
        .unwrap();
        delete_task(task);

        assert!(skipped.load(Ordering::Relaxed) >= 3);
    }
}
