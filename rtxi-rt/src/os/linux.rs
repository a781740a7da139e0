/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Linux implementation of the OS task layer primitives.

use std::io;
use std::mem;
use std::ptr;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// `CLOCK_MONOTONIC` in nanoseconds.
pub fn now_ns() -> u64 {
    // SAFETY: an all-zero timespec is a valid value.
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    // SAFETY: `ts` is a valid, writable timespec.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    (ts.tv_sec as u64)
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(ts.tv_nsec as u64)
}

/// Absolute sleep on `CLOCK_MONOTONIC`.  Restarted on `EINTR`; returns
/// immediately when `target_ns` is already in the past.
pub fn sleep_until_ns(target_ns: u64) {
    // SAFETY: an all-zero timespec is a valid value.
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = (target_ns / NANOS_PER_SEC) as libc::time_t;
    ts.tv_nsec = (target_ns % NANOS_PER_SEC) as libc::c_long;

    loop {
        // SAFETY: `ts` is valid for reads; the remainder pointer may be null
        // for absolute sleeps.
        let rc = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                ptr::null_mut(),
            )
        };
        if rc != libc::EINTR {
            break;
        }
    }
}

/// Put the calling thread under `SCHED_FIFO` with `priority` (clamped 1–99).
pub fn set_fifo_priority(priority: i32) -> io::Result<()> {
    // SAFETY: an all-zero sched_param is a valid value.
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    param.sched_priority = priority.clamp(1, 99);

    // SAFETY: `pthread_self()` is always a valid handle for the caller.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Restrict the calling thread to `cpu`.
pub fn pin_to_cpu(cpu: usize) -> io::Result<()> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("CPU {cpu} is outside the supported CPU set"),
        ));
    }

    // SAFETY: an all-zero cpu_set_t is the empty set.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    // SAFETY: `cpu` was range-checked above.
    unsafe { libc::CPU_SET(cpu, &mut set) };

    // SAFETY: `set` is a valid cpu_set_t of the size passed.
    let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Lock all current and future pages into RAM.
pub fn lock_memory() -> io::Result<()> {
    // SAFETY: plain syscall without pointer arguments.
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn unlock_memory() {
    // SAFETY: plain syscall without pointer arguments.
    unsafe { libc::munlockall() };
}

/// Whether this process may use `SCHED_FIFO` at all: root, or a non-zero
/// `RLIMIT_RTPRIO`.
pub fn realtime_capable() -> bool {
    // SAFETY: plain syscall without pointer arguments.
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }

    // SAFETY: an all-zero rlimit is a valid value.
    let mut limit: libc::rlimit = unsafe { mem::zeroed() };
    // SAFETY: `limit` is a valid, writable rlimit.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut limit) };
    rc == 0 && limit.rlim_cur > 0
}
