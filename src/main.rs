// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use betaloop::clock::MonotonicClock;
use betaloop::drivers::open_source;
use betaloop::safety::ConsoleConfirmer;
use betaloop::stimulator::MockStimulator;
use betaloop::stop::StopSignal;
use betaloop::types::AcquisitionMode;
use betaloop::{load_config, ClosedLoop};

/// Closed-loop beta-band neurostimulation controller
#[derive(Parser, Debug)]
#[command(name = "betaloop", version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = "configs/config.yaml")]
    config: PathBuf,

    /// Acquisition mode override: simulation or serial
    #[arg(short, long)]
    mode: Option<AcquisitionMode>,

    /// Session duration override in seconds
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Log filter (e.g. debug, info, betaloop=trace); defaults to RUST_LOG or info
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    match level {
        Some(filters) => env_logger::Builder::new().parse_filters(filters).init(),
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init()
        }
    }
}

/// Triggers `stop` on Ctrl-C. The handler lives on its own thread so the
/// control loop itself stays synchronous.
fn watch_interrupt(stop: StopSignal) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    thread::Builder::new()
        .name("ctrl-c".to_owned())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("[STOP] Ctrl-C received, ramping down.");
                        stop.trigger();
                    }
                    Err(e) => warn!("[STOP] cannot listen for Ctrl-C: {e}"),
                }
            })
        })
        .context("spawning Ctrl-C watcher")?;
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cfg.apply_overrides(cli.mode, cli.seconds);
    cfg.validate()?;

    let stop = StopSignal::new();
    watch_interrupt(stop.clone())?;

    let source = open_source(&cfg, &stop)?;
    let stimulator = MockStimulator::new(cfg.stimulator.steps_per_second);
    let mut session = ClosedLoop::from_config(
        &cfg,
        source,
        stimulator,
        Box::new(ConsoleConfirmer::new(stop.clone())),
        Box::new(MonotonicClock::new()),
        stop,
    )?;
    let summary = session.run()?;
    info!(
        "[SUMMARY] cycles={} changes={} end={}",
        summary.cycles, summary.changes, summary.end
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
