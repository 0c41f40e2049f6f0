use common::Config;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture program '{0}' not found in PATH")]
    ProgramNotFound(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for capture process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("capture process failed: {0}")]
    Exited(ExitStatus),
}

/// Resolve the capture executable through PATH.
pub fn locate_program(program: &str) -> Result<PathBuf, CaptureError> {
    which::which(program).map_err(|_| CaptureError::ProgramNotFound(program.to_string()))
}

/// How a segment's capture process was brought down at the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful(ExitStatus),
    Forced(ExitStatus),
}

#[derive(Debug, Clone)]
pub struct CaptureCommand {
    program: String,
    leading_args: Vec<String>,
    codec: String,
    record_audio: bool,
}

impl CaptureCommand {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.capture_program.clone(),
            leading_args: config.capture_args.clone(),
            codec: config.codec.clone(),
            record_audio: config.record_audio,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.push("-f".into());
        args.push(output.as_os_str().to_owned());

        if !self.codec.is_empty() {
            args.push("-c".into());
            args.push(self.codec.clone().into());
        }

        // wf-recorder's -a is passed only when audio is *off*; kept as observed.
        if !self.record_audio {
            args.push("-a".into());
        }

        args
    }

    pub fn spawn(&self, output: &Path) -> Result<CaptureProcess, CaptureError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(output));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.program.clone(), stderr));
        }

        Ok(CaptureProcess {
            child,
            output: output.to_path_buf(),
        })
    }
}

/// Log the capture program's stderr line by line.
///
/// The pipe stays open until the child closes it; dropping the read end
/// early would kill the recording with SIGPIPE on its next write.
async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                log::debug!(target: "capture_output", "{}: {}", program, line.trim_end());
            }
            Err(e) => {
                log::warn!("Could not read {} output, discarding the rest: {}", program, e);
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                return;
            }
        }
    }
}

/// A running capture subprocess writing one segment.
pub struct CaptureProcess {
    child: Child,
    output: PathBuf,
}

impl CaptureProcess {
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait(&mut self) -> Result<ExitStatus, CaptureError> {
        self.child.wait().await.map_err(CaptureError::Wait)
    }

    /// Ask the process to finish its container with SIGINT, then SIGKILL it
    /// if it is still alive after `grace`. Returns once the exit is observed.
    pub async fn stop(&mut self, grace: Duration) -> Result<StopOutcome, CaptureError> {
        let interrupted = match self.child.id() {
            Some(pid) => match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Could not send SIGINT to capture process {}: {}", pid, e);
                    false
                }
            },
            // Already reaped.
            None => true,
        };

        if interrupted {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => {
                    return status.map(StopOutcome::Graceful).map_err(CaptureError::Wait)
                }
                Err(_) => log::warn!(
                    "Capture process didn't respond to SIGINT within {:?}, killing it",
                    grace
                ),
            }
        }

        self.child.kill().await.map_err(CaptureError::Wait)?;
        let status = self.child.wait().await.map_err(CaptureError::Wait)?;
        Ok(StopOutcome::Forced(status))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Capture stand-in: parses `-f <out>`, then runs `body`.
    pub(crate) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let text = format!(
            "out=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 -f) out=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             {}\n",
            body
        );
        fs::write(&path, text).unwrap();
        path
    }

    /// Exits cleanly on SIGINT after appending to its output.
    pub(crate) const HONORS_SIGINT: &str = "trap 'echo finalized >> \"$out\"; exit 0' INT\n\
        echo recording > \"$out\"\n\
        while true; do sleep 0.05; done";

    pub(crate) const IGNORES_SIGINT: &str = "trap '' INT\n\
        echo recording > \"$out\"\n\
        while true; do sleep 0.05; done";

    /// Writes a non-UTF-8 line and keeps writing to stderr until SIGINT.
    pub(crate) const NOISY_STDERR: &str = "trap 'echo finalized >> \"$out\"; exit 0' INT\n\
        echo recording > \"$out\"\n\
        printf 'bad \\377\\n' >&2\n\
        while true; do echo frame >&2; sleep 0.05; done";

    pub(crate) const FAILS: &str = "echo partial > \"$out\"\nexit 3";

    fn command_for(script: &Path) -> CaptureCommand {
        CaptureCommand {
            program: "sh".to_string(),
            leading_args: vec![script.to_string_lossy().into_owned()],
            codec: String::new(),
            record_audio: true,
        }
    }

    #[test]
    fn test_args_default_config() {
        let mut config = Config::default();
        config.capture_args = vec!["-o".into(), "DP-1".into()];
        let cmd = CaptureCommand::from_config(&config);

        let args = cmd.args(Path::new("/rec/a.mkv"));
        assert_eq!(args, vec!["-o", "DP-1", "-f", "/rec/a.mkv", "-c", "libx265", "-a"]);
    }

    #[test]
    fn test_audio_flag_only_when_audio_disabled() {
        let mut config = Config::default();
        config.codec = String::new();
        config.record_audio = true;

        let args = CaptureCommand::from_config(&config).args(Path::new("out.mkv"));
        assert_eq!(args, vec!["-f", "out.mkv"]);
    }

    #[test]
    fn test_locate_missing_program() {
        let err = locate_program("definitely-not-a-capture-tool-xyz").unwrap_err();
        assert!(matches!(err, CaptureError::ProgramNotFound(_)));
        assert!(locate_program("sh").is_ok());
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let cmd = CaptureCommand {
            program: "/nonexistent/wf-recorder".to_string(),
            leading_args: Vec::new(),
            codec: String::new(),
            record_audio: false,
        };
        let err = cmd.spawn(Path::new("/tmp/never.mkv")).err().unwrap();
        assert!(matches!(err, CaptureError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "honors.sh", HONORS_SIGINT);
        let output = dir.path().join("seg.mkv");

        let mut process = command_for(&script).spawn(&output).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = process.stop(Duration::from_secs(5)).await.unwrap();
        match outcome {
            StopOutcome::Graceful(status) => assert!(status.success()),
            other => panic!("expected graceful stop, got {:?}", other),
        }
        assert!(process.id().is_none());
        let written = fs::read_to_string(&output).unwrap();
        assert!(written.contains("finalized"));
    }

    #[tokio::test]
    async fn test_forced_stop_after_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "stubborn.sh", IGNORES_SIGINT);
        let output = dir.path().join("seg.mkv");

        let mut process = command_for(&script).spawn(&output).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = process.stop(Duration::from_millis(200)).await.unwrap();
        match outcome {
            StopOutcome::Forced(status) => assert!(!status.success()),
            other => panic!("expected forced stop, got {:?}", other),
        }
        assert!(process.id().is_none());
    }

    #[tokio::test]
    async fn test_binary_stderr_does_not_break_capture() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "noisy.sh", NOISY_STDERR);
        let output = dir.path().join("seg.mkv");

        let mut process = command_for(&script).spawn(&output).unwrap();
        let early = tokio::time::timeout(Duration::from_millis(800), process.wait()).await;
        assert!(early.is_err(), "capture exited early: {:?}", early);

        let outcome = process.stop(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Graceful(status) if status.success()));
        assert!(fs::read_to_string(&output).unwrap().contains("finalized"));
    }

    #[tokio::test]
    async fn test_failed_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path(), "fails.sh", FAILS);
        let output = dir.path().join("seg.mkv");

        let mut process = command_for(&script).spawn(&output).unwrap();
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(process.output(), output.as_path());
    }
}
