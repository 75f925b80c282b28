//! # soundcheck - Level meter and guitar tuner
//!
//! Headless front-end for soundcheck-core. It captures from the default
//! microphone, prints the level and the nearest guitar string a few times a
//! second, and can record a bench session to a JSON report.
//!
//! ## Architecture
//! - **Capture callback**: CPAL thread, pushes into the sample ring
//! - **Analysis thread**: soundcheck-core worker publishing snapshots
//! - **Main thread**: renders the latest snapshot and watches for quit or
//!   device loss
//!
//! Usage: `soundcheck [--config FILE] [--profile eco|full|auto] [--bench SECS]
//! [--report FILE] [--json] [--verbose]`. Press Enter to quit. With `--json`
//! every snapshot is written to stdout as one JSON line instead of the
//! status line.

mod display;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, select};
use soundcheck_core::bench::BenchRecorder;
use soundcheck_core::{
    AnalysisWorker, Analyzer, AudioStream, MeterConfig, ProfileKind, SnapshotCell, StreamHealth,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// How often a lost device is reopened.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    profile: Option<ProfileKind>,
    bench: Option<Duration>,
    report: Option<PathBuf>,
    json: bool,
    verbose: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| anyhow!("{name} expects a value"))
        };
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--profile" => {
                parsed.profile = Some(match value("--profile")?.as_str() {
                    "eco" => ProfileKind::Eco,
                    "full" => ProfileKind::Full,
                    "auto" => ProfileKind::Auto,
                    other => bail!("unknown profile '{other}' (expected eco, full or auto)"),
                })
            }
            "--bench" => {
                let secs: f32 = value("--bench")?
                    .parse()
                    .context("--bench expects a number of seconds")?;
                let duration = Duration::try_from_secs_f32(secs)
                    .context("--bench expects a non-negative number of seconds")?;
                parsed.bench = Some(duration);
            }
            "--report" => parsed.report = Some(PathBuf::from(value("--report")?)),
            "--json" => parsed.json = true,
            "--verbose" | "-v" => parsed.verbose = true,
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(parsed)
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e:#}");
            eprintln!(
                "Usage: soundcheck [--config FILE] [--profile eco|full|auto] [--bench SECS] [--report FILE] [--json] [--verbose]"
            );
            std::process::exit(2);
        }
    };

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<MeterConfig> {
    let mut config = match &args.config {
        Some(path) => MeterConfig::load(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?,
        None => MeterConfig::default(),
    };
    if let Some(profile) = args.profile {
        config.profile = profile;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let profile = config.performance_profile()?;
    info!(
        "Profile {:?}: {} Hz, window {} samples ({:?}), ring {} samples",
        config.profile,
        profile.sample_rate,
        profile.analysis_window_size,
        profile.window_duration(),
        profile.buffer_capacity
    );

    let mut stream = AudioStream::new(profile)?;
    stream.start().context("starting audio capture")?;

    let analyzer = Analyzer::new(&config, stream.profile());
    let cell = Arc::new(SnapshotCell::new(analyzer.initial_snapshot()));
    let refresh = config.refresh_interval(&profile);
    let worker = AnalysisWorker::spawn(
        stream.ring(),
        stream.monitor(),
        Arc::clone(&cell),
        analyzer,
        refresh,
        config.stall_timeout(),
    )?;

    let quit_rx = spawn_quit_listener();
    let mut bench = args.bench.map(|duration| {
        info!("Recording bench session for {:?}", duration);
        (Instant::now(), BenchRecorder::new(duration))
    });

    let ticker = crossbeam_channel::tick(refresh);
    let mut last_sequence = 0;
    let mut last_reconnect = Instant::now();
    let mut stdout = std::io::stdout();

    loop {
        select! {
            recv(quit_rx) -> _ => break,
            recv(ticker) -> _ => {
                let snapshot = cell.load();
                if snapshot.sequence == last_sequence {
                    continue;
                }
                last_sequence = snapshot.sequence;

                if args.json {
                    writeln!(stdout, "{}", serde_json::to_string(&*snapshot)?)?;
                } else {
                    let line = display::format_snapshot(&snapshot, config.cents_tuned_tolerance);
                    write!(stdout, "\r{line:<100}")?;
                    stdout.flush()?;
                }

                if snapshot.health == StreamHealth::Unavailable
                    && last_reconnect.elapsed() >= RECONNECT_INTERVAL
                {
                    last_reconnect = Instant::now();
                    match stream.start() {
                        Ok(()) => info!("Audio device reopened"),
                        Err(e) if e.is_recoverable() => warn!("{e}"),
                        Err(e) => return Err(e.into()),
                    }
                }

                if let Some((started, recorder)) = bench.as_mut() {
                    if snapshot.health == StreamHealth::Live
                        && !recorder.record(started.elapsed(), snapshot.level.instantaneous_dbfs)
                    {
                        break;
                    }
                }
            },
        }
    }
    if !args.json {
        writeln!(stdout)?;
    }

    // Capture stops first so nothing is pushed while the worker winds down.
    stream.stop();
    worker.shutdown();

    if let Some((_, recorder)) = bench {
        finish_bench(recorder, args.report)?;
    }
    Ok(())
}

fn finish_bench(recorder: BenchRecorder, report_path: Option<PathBuf>) -> Result<()> {
    if recorder.is_full() {
        info!("Bench session reached its maximum duration");
    } else {
        info!("Bench session ended early after {} readings", recorder.len());
    }
    let Some(report) = recorder.finish() else {
        warn!("Bench recording captured no readings");
        return Ok(());
    };

    println!(
        "Bench: {:.1} s, max {:.1} dBFS at {:.1} s, min {:.1} dBFS at {:.1} s, mean {:.1}, median {:.1}, std {:.2}",
        report.duration_secs,
        report.max_db,
        report.peak_time,
        report.min_db,
        report.min_time,
        report.mean_db,
        report.median_db,
        report.std_db
    );

    if let Some(path) = report_path {
        report
            .save(&path)
            .with_context(|| format!("writing bench report to {}", path.display()))?;
        info!("Bench report saved to {}", path.display());
    }
    Ok(())
}

/// Fires once when the user presses Enter or stdin closes.
fn spawn_quit_listener() -> Receiver<()> {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = quit_tx.send(());
    });
    quit_rx
}
