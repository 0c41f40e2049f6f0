mod capture;
mod supervisor;

use anyhow::Context;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use supervisor::{Supervisor, SupervisorSettings};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (.json, .toml or .yaml). Defaults to ~/dashcam.json
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Write the capture program's stderr to this file
    #[arg(long)]
    capture_log: Option<PathBuf>,
    /// Debug logging, including capture program output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args)?;

    let config_path = args.config.clone().unwrap_or_else(common::config::default_config_path);
    log::info!("Loading configuration from {}...", config_path.display());
    let config = Config::load_or_default(&config_path);

    log::info!("Configuration loaded:");
    log::info!("  Recordings directory: {}", config.recordings_dir.display());
    log::info!("  Max files to keep: {}", config.max_files);
    log::info!("  Recording length: {} seconds", config.recording_length_seconds);
    log::info!("  Codec: {}", config.codec);
    log::info!("  Audio recording enabled: {}", config.record_audio);

    let program = supervisor::preflight(&config).context("Startup check failed")?;
    log::info!("Using capture program {}", program.display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        log::info!("Received shutdown signal. Finishing current segment...");
        let _ = shutdown_tx.send(true);
    });

    let mut recorder = Supervisor::new(config, SupervisorSettings::default());
    let summary = recorder.run(shutdown_rx).await;
    log::info!(
        "Recorded {} segments ({} marked, {} unmarked, {} abandoned, {} launch failures, \
         {} killed), removed {} old recordings",
        summary.cycles,
        summary.marked,
        summary.unmarked,
        summary.abandoned,
        summary.launch_failures,
        summary.forced_stops,
        summary.removed
    );

    Ok(())
}

fn setup_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    let base_level = if args.capture_log.is_some() { log::LevelFilter::Debug } else { level };
    let verbose = args.verbose;

    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(base_level);

    // Main log: capture output only when verbose
    let mut main_log = fern::Dispatch::new()
        .level(level)
        .filter(move |metadata| verbose || metadata.target() != "capture_output")
        .chain(std::io::stdout());
    if let Some(path) = &args.log_file {
        main_log = main_log.chain(fern::log_file(path)?);
    }

    let mut dispatch = base_config.chain(main_log);

    if let Some(path) = &args.capture_log {
        let capture_log = fern::Dispatch::new()
            .level(log::LevelFilter::Debug)
            .filter(|metadata| metadata.target() == "capture_output")
            .chain(fern::log_file(path)?);
        dispatch = dispatch.chain(capture_log);
    }

    dispatch.apply()?;
    Ok(())
}
