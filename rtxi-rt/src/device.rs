/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Hardware-facing schedulable units.
//!
//! A [`Device`] is called twice per period by the real-time loop: [`read`]
//! before any Thread executes and [`write`] after all of them have.  Both
//! hooks default to no-ops: the loop may reach a Device while its owner is
//! still building or tearing it down, so a hook must always be callable.
//!
//! Hooks report nothing back to the scheduler.  A Device that needs to signal
//! failure keeps its own status (an atomic flag, a counter) and lets the
//! control plane poll it.
//!
//! [`read`]: Device::read
//! [`write`]: Device::write

use std::fmt;
use std::sync::Arc;

use crate::unit::{next_id, ActiveFlag, UnitId};

/// Contract for units doing per-period hardware I/O.
///
/// Hooks run on the real-time thread only, never concurrently with each other
/// for the same registration.  They must not block and must not call back
/// into [`System`](crate::System); such calls are rejected with
/// [`RtError::Reentrant`](crate::RtError::Reentrant).
pub trait Device: Send + Sync {
    /// Called at the start of every period, in registration order.
    fn read(&self) {}

    /// Called at the end of every period, in registration order.
    fn write(&self) {}

    /// Name used in log messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A Device registration, returned by
/// [`System::insert_device`](crate::System::insert_device).
///
/// Cheap to clone; clones refer to the same registration.  Equality is
/// registration identity, so inserting the same Device twice yields two
/// unequal handles.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceSlot>,
}

struct DeviceSlot {
    id: UnitId,
    active: ActiveFlag,
    device: Arc<dyn Device>,
}

impl DeviceHandle {
    pub(crate) fn new(device: Arc<dyn Device>) -> Self {
        Self {
            inner: Arc::new(DeviceSlot {
                id: next_id(),
                active: ActiveFlag::new(true),
                device,
            }),
        }
    }

    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.device.name()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.inner.device
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Suspend (`false`) or resume (`true`) this Device without removing it.
    /// Takes effect from the loop's next traversal.
    pub fn set_active(&self, active: bool) {
        self.inner.active.set(active);
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for DeviceHandle {}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
