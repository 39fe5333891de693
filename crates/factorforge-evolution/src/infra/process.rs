//! Platform process execution and data staging
//!
//! Everything platform specific about running external tools lives here:
//! which shell interprets a command line, and whether market data is
//! symlinked or copied into a workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Process execution errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("I/O error while running process: {0}")]
    Io(String),

    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Process exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
}

/// How a command line is handed to the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellStrategy {
    /// `sh -c <command>`
    Posix,
    /// `cmd /C <command>`
    Cmd,
}

impl ShellStrategy {
    /// Strategy of the host platform
    pub fn native() -> Self {
        if cfg!(windows) {
            ShellStrategy::Cmd
        } else {
            ShellStrategy::Posix
        }
    }

    fn program(&self) -> (&'static str, &'static str) {
        match self {
            ShellStrategy::Posix => ("sh", "-c"),
            ShellStrategy::Cmd => ("cmd", "/C"),
        }
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs shell command lines with a timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: ShellStrategy,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: ShellStrategy::native(),
            working_dir: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn with_shell(mut self, shell: ShellStrategy) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command`, feeding `stdin` if given. A non-zero exit is an error.
    pub async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<ProcessOutput, ProcessError> {
        let (program, flag) = self.shell.program();
        let mut cmd = Command::new(program);
        cmd.arg(flag)
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), stdin) {
            let input = input.to_vec();
            // written concurrently so a chatty child cannot deadlock on a full stdout
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ProcessError::Io(e.to_string()))?,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(%command, elapsed_ms, "Process timed out");
                return Err(ProcessError::Timeout { elapsed_ms });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ProcessError::Failed {
                status: output.status.code(),
                stderr,
            });
        }
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout,
            stderr,
            elapsed: started.elapsed(),
        })
    }
}

/// How a data directory is made visible inside a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    Symlink,
    Copy,
}

impl LinkStrategy {
    /// Symlinks on Unix, copies elsewhere
    pub fn native() -> Self {
        if cfg!(unix) {
            LinkStrategy::Symlink
        } else {
            LinkStrategy::Copy
        }
    }

    /// Make `source` available at `target`. An existing target is left alone.
    pub fn link(&self, source: &Path, target: &Path) -> std::io::Result<()> {
        if target.exists() {
            debug!(target = %target.display(), "Link target already present");
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match self {
            LinkStrategy::Symlink => symlink(source, target),
            LinkStrategy::Copy => copy_recursive(source, target),
        }
    }

    /// Stage `data_dir` into `workspace` under its own file name
    pub fn stage(&self, data_dir: &Path, workspace: &Path) -> std::io::Result<PathBuf> {
        let name = data_dir.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("data dir has no name: {}", data_dir.display()),
            )
        })?;
        let target = workspace.join(name);
        self.link(data_dir, &target)?;
        Ok(target)
    }
}

#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    copy_recursive(source, target)
}

fn copy_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(target)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(source, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_stdin() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let output = runner.run("cat", Some(b"{\"ok\":true}")).await.unwrap();
        assert_eq!(output.stdout, "{\"ok\":true}");
        assert_eq!(output.status, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let err = runner.run("echo broken >&2; exit 3", None).await.unwrap_err();
        match err {
            ProcessError::Failed { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        assert!(matches!(
            runner.run("sleep 5", None).await,
            Err(ProcessError::Timeout { .. })
        ));
    }

    #[test]
    fn test_copy_strategy_stages_tree() {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir(data.path().join("daily")).unwrap();
        std::fs::write(data.path().join("daily").join("close.csv"), "1,2,3").unwrap();
        let workspace = tempfile::tempdir().unwrap();

        let staged = LinkStrategy::Copy.stage(data.path(), workspace.path()).unwrap();
        let copied = std::fs::read_to_string(staged.join("daily").join("close.csv")).unwrap();
        assert_eq!(copied, "1,2,3");

        // staging twice is a no-op
        LinkStrategy::Copy.stage(data.path(), workspace.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_strategy() {
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("volume.csv"), "9").unwrap();
        let workspace = tempfile::tempdir().unwrap();

        let staged = LinkStrategy::Symlink.stage(data.path(), workspace.path()).unwrap();
        assert!(std::fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(staged.join("volume.csv")).unwrap(), "9");
    }
}
