/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error type returned by every [`System`](super::System) operation.
//!
//! | Variant | Raised by | State after the error |
//! |---|---|---|
//! | `Creation` | [`System::initiate`](super::System::initiate) | no System exists |
//! | `InvalidPeriod` | `set_period` | previous period retained |
//! | `InvalidPriority` | `insert_thread` | Thread not registered |
//! | `ChannelFull` | `post_event*`, `submit_event` | event dropped, never executed |
//! | `Reentrant` | any operation called on the loop thread | nothing changed |
//! | `Cancelled` | waiting on an event | see [`CancelReason`] |
//! | `Stopped` | `post_event*`, `submit_event` after `stop` | event dropped |
//! | `RegistryFull` | `insert_device`, `insert_thread` | unit not registered |

use thiserror::Error;

use crate::os::OsError;

/// Why a posted event will not deliver a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's deadline expired first.  The event is still queued and
    /// may run later; its result is discarded.
    Timeout,

    /// The loop stopped before servicing the event.  The callback never ran.
    Stopped,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Timeout => write!(f, "deadline expired"),
            CancelReason::Stopped => write!(f, "loop stopped before servicing the event"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RtError {
    /// The real-time task could not be created.  Fatal to initiation.
    #[error("real-time task creation failed: {0}")]
    Creation(#[from] OsError),

    #[error("invalid period {period_ns}ns: must be strictly positive")]
    InvalidPeriod { period_ns: u64 },

    #[error("thread priority {priority} exceeds maximum {max}")]
    InvalidPriority { priority: u32, max: u32 },

    #[error("event channel full (capacity {capacity})")]
    ChannelFull { capacity: usize },

    /// Called from inside the real-time loop (event callback or unit hook).
    /// The operation would wait on the loop itself.
    #[error("{operation} called from the real-time thread")]
    Reentrant { operation: &'static str },

    #[error("event cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("system stopped: no longer accepting events")]
    Stopped,

    #[error("{kind} registry full (capacity {capacity})")]
    RegistryFull { kind: &'static str, capacity: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
