// Process seam: every subprocess the engine starts goes through a ProcessLauncher

use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command as TokioCommand};

use super::errors::DownloadError;
use super::utils::{run_output_with_timeout, spawn_error};

/// Boxed output pipe of a running process
pub type OutputStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Captured result of a finished process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle to a spawned, still-running process
#[async_trait]
pub trait RunningProcess: Send {
    fn take_stdout(&mut self) -> Option<OutputStream>;

    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Wait for exit; returns the exit code (`None` if killed by a signal)
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts subprocesses
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run to completion, capturing stdout and stderr
    async fn output(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, DownloadError>;

    /// Spawn with piped stdout/stderr
    fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn RunningProcess>, DownloadError>;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|s| Box::pin(s) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|s| Box::pin(s) as OutputStream)
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        self.child.wait().await.map(|status| status.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        match self.child.kill().await {
            // already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn output(
        &self,
        program: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, DownloadError> {
        run_output_with_timeout(program, args, timeout).await
    }

    fn spawn(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn RunningProcess>, DownloadError> {
        let child = TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        Ok(Box::new(TokioProcess { child }))
    }
}
