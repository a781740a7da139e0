/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Priority-inheritance mutex for data shared with the real-time loop.
//!
//! The loop takes the Device and Thread collection locks every period.  A
//! non-real-time mutator holding one of those locks must not be preempted
//! by medium-priority work while the loop waits on it, so on Linux the lock
//! is a pthread mutex with `PTHREAD_PRIO_INHERIT`: the holder is boosted to
//! the loop's priority until it unlocks.
//!
//! | Host | Backing | `priority_inheritance()` |
//! |---|---|---|
//! | Linux | pthread mutex, `PTHREAD_PRIO_INHERIT` | `true` |
//! | Linux, protocol refused | default pthread mutex | `false` |
//! | Other | `parking_lot::Mutex` | `false` |
//!
//! The mutex is not recursive and does not poison.

use std::fmt;

pub use imp::{PiMutex, PiMutexGuard};

#[cfg(target_os = "linux")]
mod imp {
    use std::cell::UnsafeCell;
    use std::marker::PhantomData;
    use std::mem::MaybeUninit;
    use std::ops::{Deref, DerefMut};

    pub struct PiMutex<T> {
        // Boxed: a pthread mutex must not move once initialised.
        raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
        inherit: bool,
        data: UnsafeCell<T>,
    }

    // SAFETY: `data` is only reachable through a guard, and guards are
    // serialised by the pthread mutex.
    unsafe impl<T: Send> Send for PiMutex<T> {}
    unsafe impl<T: Send> Sync for PiMutex<T> {}

    impl<T> PiMutex<T> {
        pub fn new(value: T) -> Self {
            let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
            // SAFETY: `raw` points at a statically initialised mutex nobody
            // else can reach yet.
            let inherit = unsafe { init_inherit(raw.get()) };
            Self {
                raw,
                inherit,
                data: UnsafeCell::new(value),
            }
        }

        pub fn lock(&self) -> PiMutexGuard<'_, T> {
            // SAFETY: `raw` is initialised and lives as long as `self`.
            let rc = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
            if let Err(e) = lock_outcome(rc) {
                tracing::error!(rc, error = %e, "pthread_mutex_lock failed, aborting");
                crate::diag::print_backtrace();
                std::process::abort();
            }
            PiMutexGuard {
                mutex: self,
                _not_send: PhantomData,
            }
        }

        pub fn priority_inheritance(&self) -> bool {
            self.inherit
        }
    }

    /// Map a pthread return code to an error.  pthread calls return the
    /// error number directly instead of setting `errno`.
    pub(super) fn lock_outcome(rc: libc::c_int) -> std::io::Result<()> {
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::from_raw_os_error(rc))
        }
    }

    impl<T> Drop for PiMutex<T> {
        fn drop(&mut self) {
            // SAFETY: no guard can outlive `self`, so the mutex is unlocked.
            unsafe { libc::pthread_mutex_destroy(self.raw.get()) };
        }
    }

    /// Re-initialise `raw` with the priority-inheritance protocol.  On any
    /// failure `raw` keeps its default initialiser and `false` is returned.
    unsafe fn init_inherit(raw: *mut libc::pthread_mutex_t) -> bool {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        if libc::pthread_mutexattr_init(attr.as_mut_ptr()) != 0 {
            return false;
        }
        let inherit = libc::pthread_mutexattr_setprotocol(attr.as_mut_ptr(), libc::PTHREAD_PRIO_INHERIT)
            == 0
            && libc::pthread_mutex_init(raw, attr.as_ptr()) == 0;
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        inherit
    }

    /// Unlocks on drop.  Not `Send`: a PI mutex must be released by the
    /// thread that acquired it.
    pub struct PiMutexGuard<'a, T> {
        mutex: &'a PiMutex<T>,
        _not_send: PhantomData<*const ()>,
    }

    // SAFETY: a shared guard only hands out `&T`.
    unsafe impl<T: Sync> Sync for PiMutexGuard<'_, T> {}

    impl<T> Deref for PiMutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            // SAFETY: the lock is held for the guard's lifetime.
            unsafe { &*self.mutex.data.get() }
        }
    }

    impl<T> DerefMut for PiMutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            // SAFETY: the lock is held for the guard's lifetime.
            unsafe { &mut *self.mutex.data.get() }
        }
    }

    impl<T> Drop for PiMutexGuard<'_, T> {
        fn drop(&mut self) {
            // SAFETY: this guard holds the lock on the current thread.
            unsafe { libc::pthread_mutex_unlock(self.mutex.raw.get()) };
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    pub type PiMutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;

    pub struct PiMutex<T> {
        inner: parking_lot::Mutex<T>,
    }

    impl<T> PiMutex<T> {
        pub fn new(value: T) -> Self {
            Self {
                inner: parking_lot::Mutex::new(value),
            }
        }

        pub fn lock(&self) -> PiMutexGuard<'_, T> {
            self.inner.lock()
        }

        pub fn priority_inheritance(&self) -> bool {
            false
        }
    }
}

impl<T> fmt::Debug for PiMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiMutex")
            .field("priority_inheritance", &self.priority_inheritance())
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
