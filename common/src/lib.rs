pub mod config;
pub mod marker;
pub mod retention;

pub use config::Config;
pub use marker::{MarkerError, MarkerValue};
pub use retention::CleanupReport;

/// Config file name, looked up in the user's home directory.
pub const DEFAULT_CONFIG_FILE: &str = "dashcam.json";
pub const DEFAULT_CAPTURE_PROGRAM: &str = "wf-recorder";

/// Extended attribute (`user.dashcam`) that tags finished recordings.
pub const MARKER_NAME: &str = "dashcam";
