/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Best-effort implementation for hosts without a realtime facility.

use std::io;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

pub fn now_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

pub fn sleep_until_ns(target_ns: u64) {
    let now = now_ns();
    if target_ns > now {
        std::thread::sleep(Duration::from_nanos(target_ns - now));
    }
}

pub fn set_fifo_priority(_priority: i32) -> io::Result<()> {
    Err(unsupported("SCHED_FIFO"))
}

pub fn pin_to_cpu(_cpu: usize) -> io::Result<()> {
    Err(unsupported("CPU pinning"))
}

pub fn lock_memory() -> io::Result<()> {
    Err(unsupported("memory locking"))
}

pub fn unlock_memory() {}

pub fn realtime_capable() -> bool {
    false
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{what} is not supported on this platform"),
    )
}
