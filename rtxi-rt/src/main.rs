/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use rtxi_rt::config::prefs::UserPrefs;
use rtxi_rt::{os, System, SystemConfig};

// ── CLI argument definition ───────────────────────────────────────────────────

/// RTXI real-time core.
///
/// Example:
///   rtxi-rt -c rtxi.yaml -p 500000 -t 10
#[derive(Debug, Parser)]
#[command(
    name = "rtxi-rt",
    about = "RTXI real-time scheduler – runs the periodic loop",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML system configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Loop period in nanoseconds, applied after start-up.
    #[arg(short = 'p', long = "period-ns")]
    period_ns: Option<u64>,

    /// Run time in seconds; 0 runs until Ctrl-C.
    #[arg(short = 't', long = "duration", default_value_t = 0)]
    duration: u64,

    /// Path to the YAML user preferences file.
    #[arg(long = "prefs")]
    prefs: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(
        config    = ?cli.config,
        period_ns = ?cli.period_ns,
        duration  = cli.duration,
        prefs     = ?cli.prefs,
        "RTXI starting up"
    );

    // ── Load configuration ────────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match SystemConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load system configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using default settings");
            SystemConfig::default()
        }
    };

    if let Some(path) = &cli.prefs {
        match UserPrefs::load(path) {
            Ok(prefs) => info!(
                setfiles      = %prefs.setfiles_dir().display(),
                dynamomodels  = %prefs.dynamomodels_dir().display(),
                data          = %prefs.data_dir().display(),
                hdf_buffer_mb = prefs.hdf_buffer_mb(),
                "User preferences"
            ),
            Err(e) => warn!("Ignoring user preferences: {:#}", e),
        }
    }

    // ── Start the scheduler ───────────────────────────────────────────────────
    let system = match System::initiate(&config) {
        Ok(system) => system,
        Err(e) => {
            rtxi_rt::diag::error_msg("Failed to start the real-time system", &e);
            os::shutdown();
            process::exit(1);
        }
    };

    if let Some(period_ns) = cli.period_ns {
        let sys = system.clone();
        match tokio::task::spawn_blocking(move || sys.set_period(period_ns)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Could not apply period {}ns: {}", period_ns, e),
            Err(e) => error!("Period change task failed: {}", e),
        }
    }

    info!(
        period_ns = system.period_ns(),
        realtime = os::is_realtime(),
        "Running, press Ctrl-C to stop"
    );

    // ── Run until Ctrl-C or the requested duration ────────────────────────────
    let run_for = async {
        if cli.duration == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(cli.duration)).await;
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
            info!("Interrupted, shutting down");
        }
        _ = run_for => info!("Run time elapsed, shutting down"),
    }

    let stats = system.stats();
    info!(
        periods = stats.periods,
        overruns = stats.overruns,
        skipped = stats.skipped_periods,
        events = stats.events_executed,
        max_busy_ns = stats.max_busy_ns,
        "Loop statistics"
    );

    drop(system);
    match tokio::task::spawn_blocking(System::shutdown_instance).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(e) => error!("Shutdown task failed: {}", e),
    }
    os::shutdown();
}
