/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! RTXI real-time core.
//!
//! A single periodic real-time loop drives registered Devices (hardware I/O)
//! and Threads (control logic); everything else talks to it through Events.
//!
//! ```text
//! lib.rs
//! ├── os/        – real-time task layer: SCHED_FIFO task, absolute sleep, clock, PI mutex
//! ├── event      – one-shot requests executed on the loop
//! ├── device     – Device contract and registration handle
//! ├── thread     – Thread contract, priorities, registration handle
//! ├── system/    – the scheduler singleton, its registries and statistics
//! ├── config/    – YAML loop configuration, user preferences
//! └── diag       – fatal-condition diagnostics
//! ```

pub mod config;
pub mod device;
pub mod diag;
pub mod event;
pub mod os;
pub mod system;
pub mod thread;

mod unit;

pub use config::SystemConfig;
pub use device::{Device, DeviceHandle};
pub use event::{Completed, Event, EventContext, Pending, EVENT_UNSET};
pub use system::{CancelReason, LoopStats, RtError, System};
pub use thread::{Priority, Thread, ThreadHandle};
pub use unit::UnitId;
