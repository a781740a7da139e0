/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduling-latency probe.
//!
//! Registers a Thread that timestamps every period and reports how far the
//! period-to-period interval strays from the configured period.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use rtxi_rt::os;
use rtxi_rt::thread::{Priority, MAXIMUM_PRIORITY};
use rtxi_rt::{System, SystemConfig, Thread};

const BUCKETS: usize = 10;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Measure period jitter of the RTXI real-time loop.
#[derive(Debug, Parser)]
#[command(name = "rtxi-latency", long_about = None)]
struct Cli {
    /// Loop period in nanoseconds.
    #[arg(long = "period-ns", default_value_t = 1_000_000)]
    period_ns: u64,

    /// Measurement time in seconds.
    #[arg(long = "seconds", default_value_t = 10)]
    seconds: u64,

    /// Probe Thread priority (0–100).
    #[arg(long = "priority", default_value_t = MAXIMUM_PRIORITY)]
    priority: Priority,

    /// Histogram bucket width in microseconds.
    #[arg(long = "buckets-us", default_value_t = 10)]
    buckets_us: u64,
}

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Jitter recorder.  Written by the loop, read by anyone.
struct LatencyProbe {
    period_ns: u64,
    bucket_ns: u64,
    priority: Priority,
    last_ns: AtomicU64,
    samples: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    sum_ns: AtomicU64,
    histogram: [AtomicU64; BUCKETS],
}

impl LatencyProbe {
    fn new(period_ns: u64, bucket_us: u64, priority: Priority) -> Self {
        Self {
            period_ns,
            bucket_ns: bucket_us.max(1) * 1_000,
            priority,
            last_ns: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
            histogram: Default::default(),
        }
    }

    /// Record the period starting at `now_ns`.  The first call only sets the
    /// reference point.
    fn record(&self, now_ns: u64) {
        let last = self.last_ns.swap(now_ns, Ordering::Relaxed);
        if last == 0 {
            return;
        }
        let jitter = now_ns.saturating_sub(last).abs_diff(self.period_ns);

        self.samples.fetch_add(1, Ordering::Relaxed);
        self.min_ns.fetch_min(jitter, Ordering::Relaxed);
        self.max_ns.fetch_max(jitter, Ordering::Relaxed);
        self.sum_ns.fetch_add(jitter, Ordering::Relaxed);
        self.histogram[self.bucket(jitter)].fetch_add(1, Ordering::Relaxed);
    }

    /// Last bucket collects everything beyond the histogram range.
    fn bucket(&self, jitter_ns: u64) -> usize {
        (jitter_ns / self.bucket_ns).min(BUCKETS as u64 - 1) as usize
    }

    fn report(&self) -> Report {
        let samples = self.samples.load(Ordering::Relaxed);
        Report {
            samples,
            min_ns: if samples == 0 {
                0
            } else {
                self.min_ns.load(Ordering::Relaxed)
            },
            max_ns: self.max_ns.load(Ordering::Relaxed),
            avg_ns: self
                .sum_ns
                .load(Ordering::Relaxed)
                .checked_div(samples)
                .unwrap_or(0),
            histogram: std::array::from_fn(|i| self.histogram[i].load(Ordering::Relaxed)),
        }
    }
}

impl Thread for LatencyProbe {
    fn execute(&self) {
        self.record(os::get_time());
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &str {
        "latency-probe"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Report {
    samples: u64,
    min_ns: u64,
    max_ns: u64,
    avg_ns: u64,
    histogram: [u64; BUCKETS],
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        period_ns  = cli.period_ns,
        seconds    = cli.seconds,
        priority   = cli.priority,
        buckets_us = cli.buckets_us,
        "rtxi-latency starting"
    );

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        os::shutdown();
        process::exit(1);
    }
    os::shutdown();
}

async fn run(cli: Cli) -> Result<()> {
    let config = SystemConfig::default().with_period_ns(cli.period_ns);
    config.validate()?;

    let probe = Arc::new(LatencyProbe::new(cli.period_ns, cli.buckets_us, cli.priority));
    let registered = Arc::clone(&probe);

    let (system, handle) = tokio::task::spawn_blocking(move || {
        let system = System::initiate(&config).context("Cannot start the real-time system")?;
        let handle = system
            .insert_thread(registered)
            .context("Cannot register the probe")?;
        anyhow::Ok((system, handle))
    })
    .await
    .context("Start-up task failed")??;

    info!(realtime = os::is_realtime(), "Measuring");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.seconds)) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Cannot listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    tokio::task::spawn_blocking(move || {
        system.remove_thread(&handle)?;
        drop(system);
        System::shutdown_instance()
    })
    .await
    .context("Shutdown task failed")??;

    print_report(&probe.report(), cli.buckets_us);
    Ok(())
}

fn print_report(report: &Report, bucket_us: u64) {
    info!(
        samples = report.samples,
        min_us = report.min_ns / 1_000,
        avg_us = report.avg_ns / 1_000,
        max_us = report.max_ns / 1_000,
        "Jitter"
    );
    for (i, count) in report.histogram.iter().enumerate() {
        let lo = i as u64 * bucket_us;
        if i == BUCKETS - 1 {
            info!("  {:>6}us+        {}", lo, count);
        } else {
            info!("  {:>6}-{:<6}us  {}", lo, lo + bucket_us, count);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
