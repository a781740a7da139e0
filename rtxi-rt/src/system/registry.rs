/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pre-sized, ordered unit collections.
//!
//! Storage is reserved once at construction and never grows, so insertions
//! never allocate while the loop might be waiting on the collection lock.
//! A full registry rejects the insertion instead.

use crate::device::DeviceHandle;
use crate::thread::ThreadHandle;
use crate::unit::UnitId;

use super::error::RtError;

/// Anything stored in a [`Registry`].
pub(crate) trait Entry {
    fn entry_id(&self) -> UnitId;
}

impl Entry for DeviceHandle {
    fn entry_id(&self) -> UnitId {
        self.id()
    }
}

impl Entry for ThreadHandle {
    fn entry_id(&self) -> UnitId {
        self.id()
    }
}

#[derive(Debug)]
pub(crate) struct Registry<H> {
    kind: &'static str,
    entries: Vec<H>,
    capacity: usize,
}

impl<H: Entry> Registry<H> {
    pub(crate) fn with_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the end (registration order).
    pub(crate) fn push(&mut self, entry: H) -> Result<(), RtError> {
        let at = self.entries.len();
        self.insert_at(at, entry)
    }

    pub(crate) fn insert_at(&mut self, index: usize, entry: H) -> Result<(), RtError> {
        if self.entries.len() >= self.capacity {
            return Err(RtError::RegistryFull {
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Remove by identity, keeping the relative order of the rest.
    pub(crate) fn remove(&mut self, id: UnitId) -> Option<H> {
        let index = self.entries.iter().position(|e| e.entry_id() == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, H> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Registry<ThreadHandle> {
    /// Insert keeping descending priority order.  A new Thread goes after
    /// every existing Thread of the same priority.
    pub(crate) fn insert_by_priority(&mut self, thread: ThreadHandle) -> Result<(), RtError> {
        let priority = thread.priority();
        let at = self.entries.partition_point(|t| t.priority() >= priority);
        self.insert_at(at, thread)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::thread::{Priority, Thread};
    use std::sync::Arc;

    struct Dev;
    impl Device for Dev {}

    struct Prio(Priority);
    impl Thread for Prio {
        fn priority(&self) -> Priority {
            self.0
        }
    }

    fn thread(p: Priority) -> ThreadHandle {
        ThreadHandle::new(Arc::new(Prio(p)))
    }

    #[test]
    fn push_keeps_registration_order() {
        let mut reg = Registry::with_capacity("device", 4);
        let a = DeviceHandle::new(Arc::new(Dev));
        let b = DeviceHandle::new(Arc::new(Dev));
        reg.push(a.clone()).unwrap();
        reg.push(b.clone()).unwrap();
        let ids: Vec<_> = reg.iter().map(DeviceHandle::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn full_registry_rejects_insert() {
        let mut reg = Registry::with_capacity("device", 1);
        reg.push(DeviceHandle::new(Arc::new(Dev))).unwrap();
        let err = reg.push(DeviceHandle::new(Arc::new(Dev))).unwrap_err();
        assert!(matches!(
            err,
            RtError::RegistryFull {
                kind: "device",
                capacity: 1
            }
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_unknown_returns_none() {
        let mut reg: Registry<DeviceHandle> = Registry::with_capacity("device", 2);
        assert!(reg.remove(u64::MAX).is_none());
    }

    #[test]
    fn remove_preserves_order_of_rest() {
        let mut reg = Registry::with_capacity("device", 4);
        let hs: Vec<_> = (0..3).map(|_| DeviceHandle::new(Arc::new(Dev))).collect();
        for h in &hs {
            reg.push(h.clone()).unwrap();
        }
        assert_eq!(reg.remove(hs[1].id()), Some(hs[1].clone()));
        let ids: Vec<_> = reg.iter().map(DeviceHandle::id).collect();
        assert_eq!(ids, vec![hs[0].id(), hs[2].id()]);
    }

    #[test]
    fn threads_sorted_descending_with_stable_ties() {
        let mut reg = Registry::with_capacity("thread", 8);
        let a = thread(5);
        let b = thread(90);
        let c = thread(20);
        let d = thread(20);
        for t in [&a, &b, &c, &d] {
            reg.insert_by_priority(t.clone()).unwrap();
        }
        let ids: Vec<_> = reg.iter().map(ThreadHandle::id).collect();
        assert_eq!(ids, vec![b.id(), c.id(), d.id(), a.id()]);
    }
}
