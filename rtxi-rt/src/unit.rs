/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! State shared by Device and Thread registrations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Registration identity.  Unique for the lifetime of the process.
pub type UnitId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> UnitId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Single-word flag read by the loop every period and toggled by anyone,
/// without any scheduler lock.
#[derive(Debug)]
pub(crate) struct ActiveFlag(AtomicBool);

impl ActiveFlag {
    pub(crate) fn new(active: bool) -> Self {
        Self(AtomicBool::new(active))
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}
