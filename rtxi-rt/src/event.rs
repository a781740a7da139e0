/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! One-shot requests executed on the real-time thread.
//!
//! An [`Event`] is the only way for non-real-time code to read or change
//! loop state consistently: its [`callback`](Event::callback) runs on the
//! loop, at the start of a period, before any Device or Thread hook.
//!
//! ```text
//! caller                         real-time loop
//!   │ submit_event(ev) ──► channel ──► drain (≤ events_per_period)
//!   │                                    │ ev.callback(&mut ctx) -> i32
//!   │ pending.wait() ◄── completion ◄────┘ Completed { retval, event }
//! ```
//!
//! The completion slot is a single-use rendezvous: one executor, one waiter.
//! An event the loop drops without running (shutdown) disconnects its slot,
//! and the waiter sees [`CancelReason::Stopped`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::os::Timestep;
use crate::system::error::{CancelReason, RtError};
use crate::system::stats::{LoopStats, StatsCell};

/// Result code of an event that has not run yet.
pub const EVENT_UNSET: i32 = i32::MIN;

/// A request to run code on the real-time thread.
///
/// `callback` runs exactly once, inside the period budget: it must be short,
/// must not block, and must not call back into the System (such calls fail
/// with [`RtError::Reentrant`]).
pub trait Event: Send {
    fn callback(&mut self, ctx: &mut EventContext<'_>) -> i32;
}

/// Loop state handed to a running [`Event`].
///
/// Access is exclusive for the duration of the callback: no Device or
/// Thread hook runs concurrently.
pub struct EventContext<'a> {
    period_ns: &'a AtomicU64,
    finished: &'a AtomicBool,
    stats: &'a StatsCell,
    timestep: &'a mut Timestep,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        period_ns: &'a AtomicU64,
        finished: &'a AtomicBool,
        stats: &'a StatsCell,
        timestep: &'a mut Timestep,
    ) -> Self {
        Self {
            period_ns,
            finished,
            stats,
            timestep,
        }
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns.load(Ordering::Acquire)
    }

    /// Change the loop period.  The stored value is visible immediately; the
    /// task's cadence changes at the boundary already scheduled.
    pub fn set_period(&mut self, period_ns: u64) -> Result<(), RtError> {
        if period_ns == 0 {
            return Err(RtError::InvalidPeriod { period_ns });
        }
        self.timestep.set_period(period_ns);
        self.period_ns.store(period_ns, Ordering::Release);
        Ok(())
    }

    /// Ask the loop to exit once the current drain finishes.  No further
    /// Device or Thread hook runs.
    pub fn request_stop(&mut self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> LoopStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for EventContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("period_ns", &self.period_ns())
            .field("next_wake_ns", &self.timestep.next_wake_ns())
            .finish()
    }
}

// ── Closure adapter ───────────────────────────────────────────────────────────

/// [`Event`] built from a closure.  See [`from_fn`].
pub struct FnEvent<F>(F);

/// Wrap a closure as an [`Event`].
///
/// ```ignore
/// let rc = system.post_event(event::from_fn(|ctx| ctx.period_ns() as i32))?;
/// ```
pub fn from_fn<F>(f: F) -> FnEvent<F>
where
    F: FnMut(&mut EventContext<'_>) -> i32 + Send,
{
    FnEvent(f)
}

impl<F> fmt::Debug for FnEvent<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnEvent")
    }
}

impl<F> Event for FnEvent<F>
where
    F: FnMut(&mut EventContext<'_>) -> i32 + Send,
{
    fn callback(&mut self, ctx: &mut EventContext<'_>) -> i32 {
        (self.0)(ctx)
    }
}

// ── Envelope (loop side) ──────────────────────────────────────────────────────

/// Type-erased queued event.  Dropping it unexecuted cancels the waiter.
pub(crate) trait Job: Send {
    fn run(self: Box<Self>, ctx: &mut EventContext<'_>);
}

pub(crate) type Envelope = Box<dyn Job>;

struct Posted<E> {
    event: E,
    done: Sender<Completed<E>>,
}

impl<E: Event> Job for Posted<E> {
    fn run(self: Box<Self>, ctx: &mut EventContext<'_>) {
        let Posted { mut event, done } = *self;
        let retval = event.callback(ctx);
        // The waiter may have given up (timeout); the result is discarded.
        let _ = done.send(Completed { retval, event });
    }
}

/// Pair an event with its completion slot.
pub(crate) fn envelope<E: Event + 'static>(event: E) -> (Envelope, Pending<E>) {
    let (done, rx) = bounded(1);
    (Box::new(Posted { event, done }), Pending { rx })
}

// ── Pending / Completed (caller side) ─────────────────────────────────────────

/// An executed event, handed back to its poster.
#[derive(Debug)]
pub struct Completed<E> {
    /// Value returned by the callback.
    pub retval: i32,
    /// The event itself, with whatever the callback stored in it.
    pub event: E,
}

/// Ticket for an event submitted without waiting.
///
/// Dropping it abandons the result; the event still runs.
pub struct Pending<E> {
    rx: Receiver<Completed<E>>,
}

impl<E> Pending<E> {
    /// Poll without blocking.  `Ok(None)` while the event has not run.
    ///
    /// Once a result has been taken, later polls report
    /// [`CancelReason::Stopped`].
    pub fn try_wait(&mut self) -> Result<Option<Completed<E>>, RtError> {
        match self.rx.try_recv() {
            Ok(done) => Ok(Some(done)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(RtError::Cancelled(CancelReason::Stopped)),
        }
    }

    /// Block until the loop has run the event.
    pub fn wait(self) -> Result<Completed<E>, RtError> {
        self.rx
            .recv()
            .map_err(|_| RtError::Cancelled(CancelReason::Stopped))
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<Completed<E>, RtError> {
        self.rx.recv_timeout(timeout).map_err(cancel_reason)
    }

    pub fn wait_deadline(self, deadline: Instant) -> Result<Completed<E>, RtError> {
        self.rx.recv_deadline(deadline).map_err(cancel_reason)
    }
}

impl<E> fmt::Debug for Pending<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &!self.rx.is_empty())
            .finish()
    }
}

fn cancel_reason(e: RecvTimeoutError) -> RtError {
    match e {
        RecvTimeoutError::Timeout => RtError::Cancelled(CancelReason::Timeout),
        RecvTimeoutError::Disconnected => RtError::Cancelled(CancelReason::Stopped),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
