/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Control-logic schedulable units.
//!
//! A [`Thread`] (scheduler sense, not an OS thread) has one per-period hook,
//! [`execute`](Thread::execute), called between the Device read and write
//! phases.  Threads run in descending [`Priority`] order; equal priorities
//! keep their registration order.

use std::fmt;
use std::sync::Arc;

use crate::unit::{next_id, ActiveFlag, UnitId};

/// Scheduling priority.  Higher runs earlier within a period.
pub type Priority = u32;

pub const MINIMUM_PRIORITY: Priority = 0;
pub const MAXIMUM_PRIORITY: Priority = 100;
pub const DEFAULT_PRIORITY: Priority = MAXIMUM_PRIORITY / 2;

/// Contract for units running per-period control logic.
///
/// Same rules as [`Device`](crate::Device): real-time thread only, never
/// blocking, no calls back into the System, failures reported through the
/// unit's own state.
pub trait Thread: Send + Sync {
    /// Called once per period, after all Device reads.
    fn execute(&self) {}

    /// Read once, when the Thread is inserted.  Must not exceed
    /// [`MAXIMUM_PRIORITY`].
    fn priority(&self) -> Priority {
        DEFAULT_PRIORITY
    }

    /// Name used in log messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A Thread registration, returned by
/// [`System::insert_thread`](crate::System::insert_thread).
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<ThreadSlot>,
}

struct ThreadSlot {
    id: UnitId,
    priority: Priority,
    active: ActiveFlag,
    thread: Arc<dyn Thread>,
}

impl ThreadHandle {
    pub(crate) fn new(thread: Arc<dyn Thread>) -> Self {
        let priority = thread.priority();
        Self {
            inner: Arc::new(ThreadSlot {
                id: next_id(),
                priority,
                active: ActiveFlag::new(true),
                thread,
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.thread.name()
    }

    /// Priority captured at insertion.
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn thread(&self) -> &Arc<dyn Thread> {
        &self.inner.thread
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Skip (`false`) or resume (`true`) this Thread from the next period on,
    /// keeping its place in the execution order.
    pub fn set_active(&self, active: bool) {
        self.inner.active.set(active);
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ThreadHandle {}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
