/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Loop statistics.
//!
//! Written by the real-time thread with relaxed atomics once per period and
//! read by anyone without a lock.  A snapshot is not a consistent cut across
//! fields; each counter is individually exact.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Completed periods.
    pub periods: u64,
    /// Periods whose work ended after the next boundary.
    pub overruns: u64,
    /// Boundaries dropped because of overruns.
    pub skipped_periods: u64,
    pub events_executed: u64,
    /// Events dropped unexecuted at shutdown.
    pub events_cancelled: u64,
    /// Work time of the last period (events, reads, executes, writes).
    pub last_busy_ns: u64,
    pub max_busy_ns: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    periods: AtomicU64,
    overruns: AtomicU64,
    skipped_periods: AtomicU64,
    events_executed: AtomicU64,
    events_cancelled: AtomicU64,
    last_busy_ns: AtomicU64,
    max_busy_ns: AtomicU64,
}

impl StatsCell {
    pub(crate) fn record_period(&self, busy_ns: u64, overrun: bool, skipped: u64) {
        self.periods.fetch_add(1, Ordering::Relaxed);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        if skipped > 0 {
            self.skipped_periods.fetch_add(skipped, Ordering::Relaxed);
        }
        self.last_busy_ns.store(busy_ns, Ordering::Relaxed);
        self.max_busy_ns.fetch_max(busy_ns, Ordering::Relaxed);
    }

    pub(crate) fn record_events(&self, n: u64) {
        if n > 0 {
            self.events_executed.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_cancelled(&self, n: u64) {
        if n > 0 {
            self.events_cancelled.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> LoopStats {
        LoopStats {
            periods: self.periods.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            skipped_periods: self.skipped_periods.load(Ordering::Relaxed),
            events_executed: self.events_executed.load(Ordering::Relaxed),
            events_cancelled: self.events_cancelled.load(Ordering::Relaxed),
            last_busy_ns: self.last_busy_ns.load(Ordering::Relaxed),
            max_busy_ns: self.max_busy_ns.load(Ordering::Relaxed),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
