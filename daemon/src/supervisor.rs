//! The record → mark → cleanup loop.
//!
//! One segment is in flight at a time. Each pass spawns the capture
//! program, races its exit against the segment deadline, stops it
//! (SIGINT, then SIGKILL after the grace window), marks the finished file
//! and every `cleanup_every` passes trims the marked set down to
//! `max_files`.

use crate::capture::{locate_program, CaptureCommand, CaptureError, StopOutcome};
use chrono::{DateTime, Local};
use common::{marker, retention, Config, MarkerValue, MARKER_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}. Please install it first.")]
    CaptureProgramMissing(#[source] CaptureError),
    #[error("failed to create recordings directory {path:?}: {source}")]
    RecordingsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal startup checks: the capture program must resolve and the
/// recordings directory must exist or be creatable.
pub fn preflight(config: &Config) -> Result<PathBuf, StartupError> {
    let program =
        locate_program(&config.capture_program).map_err(StartupError::CaptureProgramMissing)?;

    fs::create_dir_all(&config.recordings_dir).map_err(|source| StartupError::RecordingsDir {
        path: config.recordings_dir.clone(),
        source,
    })?;

    if let Err(e) = marker::probe_support(&config.recordings_dir) {
        log::warn!(
            "Recordings directory does not accept markers, retention will not remove anything: {}",
            e
        );
    }

    Ok(program)
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Wait after SIGINT before escalating to SIGKILL.
    pub grace_window: Duration,
    /// Pause after a failed launch or a failed segment.
    pub failure_backoff: Duration,
    /// Run retention every this many cycles.
    pub cleanup_every: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(2),
            cleanup_every: 10,
        }
    }
}

/// Chooses the marker value for a finished segment.
pub trait MarkerSource: Send {
    fn marker_for(&mut self, segment: &Path) -> MarkerValue;
}

/// Tags every segment as a standard recording.
pub struct StandardMarker;

impl MarkerSource for StandardMarker {
    fn marker_for(&mut self, _segment: &Path) -> MarkerValue {
        MarkerValue::Standard
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Marked(PathBuf, MarkerValue),
    /// Recorded, but the marker could not be written.
    Unmarked(PathBuf),
    /// The capture program failed before the deadline.
    Abandoned(PathBuf),
    LaunchFailed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub marked: u64,
    pub unmarked: u64,
    pub abandoned: u64,
    pub launch_failures: u64,
    /// Segments whose capture process had to be SIGKILLed.
    pub forced_stops: u64,
    pub removed: u64,
}

enum Ending {
    ExitedOnItsOwn,
    Stopped(StopOutcome),
}

pub struct Supervisor<M: MarkerSource = StandardMarker> {
    config: Config,
    capture: CaptureCommand,
    settings: SupervisorSettings,
    markers: M,
    summary: RunSummary,
}

impl Supervisor<StandardMarker> {
    pub fn new(config: Config, settings: SupervisorSettings) -> Self {
        Self::with_markers(config, settings, StandardMarker)
    }
}

impl<M: MarkerSource> Supervisor<M> {
    pub fn with_markers(config: Config, settings: SupervisorSettings, markers: M) -> Self {
        let capture = CaptureCommand::from_config(&config);
        Self {
            config,
            capture,
            settings,
            markers,
            summary: RunSummary::default(),
        }
    }

    #[cfg(test)]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Destination for a segment started at `now`. Second resolution.
    pub fn segment_path(&self, now: DateTime<Local>) -> PathBuf {
        let stamp = now.format("%Y-%m-%d_%H-%M-%S");
        self.config
            .recordings_dir
            .join(format!("{}{}", stamp, self.config.extension))
    }

    async fn record(&self, path: &Path) -> Result<Ending, CaptureError> {
        let length = self.config.recording_length_seconds;
        let mut process = self.capture.spawn(path)?;
        log::info!(
            "Starting recording: {} (duration: {} seconds, pid {})",
            process.output().display(),
            length,
            process.id().unwrap_or_default()
        );

        let exited = tokio::select! {
            status = process.wait() => Some(status),
            _ = tokio::time::sleep(Duration::from_secs(length)) => None,
        };

        match exited {
            Some(Ok(status)) if status.success() => {
                log::info!("Recording completed: {}", path.display());
                Ok(Ending::ExitedOnItsOwn)
            }
            Some(Ok(status)) => Err(CaptureError::Exited(status)),
            Some(Err(e)) => Err(e),
            None => {
                log::info!(
                    "Recording duration {} seconds reached, sending SIGINT to {}...",
                    length,
                    self.capture.program()
                );
                let outcome = process.stop(self.settings.grace_window).await?;
                match outcome {
                    StopOutcome::Graceful(status) if !status.success() => {
                        log::info!("{} finished with: {}", self.capture.program(), status)
                    }
                    StopOutcome::Forced(status) => {
                        log::warn!("{} was killed: {}", self.capture.program(), status)
                    }
                    StopOutcome::Graceful(_) => {}
                }
                log::info!("Recording completed: {}", path.display());
                Ok(Ending::Stopped(outcome))
            }
        }
    }

    fn finalize(&mut self, path: PathBuf) -> CycleOutcome {
        let value = self.markers.marker_for(&path);
        match marker::set_marker(&path, MARKER_NAME, value.as_str()) {
            Ok(()) => {
                self.summary.marked += 1;
                CycleOutcome::Marked(path, value)
            }
            Err(e) => {
                log::warn!("Failed to set marker on file '{}': {}", path.display(), e);
                self.summary.unmarked += 1;
                CycleOutcome::Unmarked(path)
            }
        }
    }

    fn cleanup(&mut self) {
        let dir = &self.config.recordings_dir;
        match retention::enforce_max_files(dir, MARKER_NAME, self.config.max_files) {
            Ok(report) => {
                self.summary.removed += report.removed.len() as u64;
                if !report.removed.is_empty() || !report.failed.is_empty() {
                    log::info!(
                        "Retention: {} marked, {} removed, {} failed",
                        report.marked,
                        report.removed.len(),
                        report.failed.len()
                    );
                }
            }
            Err(e) => log::warn!("Failed to cleanup old files: {}", e),
        }
    }

    /// One Idle → Launching → Recording → Stopping → Finalizing pass.
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.summary.cycles += 1;
        let path = self.segment_path(Local::now());

        let outcome = match self.record(&path).await {
            Ok(Ending::Stopped(StopOutcome::Forced(_))) => {
                self.summary.forced_stops += 1;
                self.finalize(path)
            }
            Ok(Ending::ExitedOnItsOwn) | Ok(Ending::Stopped(StopOutcome::Graceful(_))) => {
                self.finalize(path)
            }
            Err(e @ CaptureError::Spawn { .. }) | Err(e @ CaptureError::ProgramNotFound(_)) => {
                log::error!("Recording failed: {}", e);
                self.summary.launch_failures += 1;
                tokio::time::sleep(self.settings.failure_backoff).await;
                return CycleOutcome::LaunchFailed;
            }
            Err(e) => {
                log::error!("Recording failed: {} ({})", e, path.display());
                self.summary.abandoned += 1;
                tokio::time::sleep(self.settings.failure_backoff).await;
                return CycleOutcome::Abandoned(path);
            }
        };

        if self.summary.cycles % self.settings.cleanup_every.max(1) == 0 {
            self.cleanup();
        }

        outcome
    }

    /// Record segments until `shutdown` reads true.
    ///
    /// The flag is checked between segments only; a segment in progress
    /// always runs to its deadline.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> RunSummary {
        log::info!("Screen recorder started.");
        loop {
            if *shutdown.borrow() {
                log::info!("Screen recorder stopped.");
                break;
            }
            self.cycle().await;
        }
        self.summary.clone()
    }
}
