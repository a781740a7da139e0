/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Diagnostics for fatal or unexpected conditions.
//!
//! Never called from the per-period path.

use std::backtrace::Backtrace;
use std::error::Error;

use tracing::error;

/// Log `err` and its whole source chain under `context`.
pub fn error_msg(context: &str, err: &dyn Error) {
    error!(error = %err, chain = %source_chain(err), "{context}");
}

/// Log a backtrace of the calling thread.
pub fn print_backtrace() {
    let bt = Backtrace::force_capture();
    error!("Backtrace:\n{bt}");
}

fn source_chain(err: &dyn Error) -> String {
    let mut chain = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        chain.push_str(": ");
        chain.push_str(&e.to_string());
        cur = e.source();
    }
    chain
}

// ── Tests ─────────────────────────────────────────────────────────────────────
