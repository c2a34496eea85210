// Anonymizing proxy (tor) bootstrap coordinator
//
// Spawns tor with notice-level logging on stdout and waits for the bootstrap
// marker. Process start failure and early exit race against the marker; the
// first signal decides the outcome.

use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use super::errors::ProxyError;
use super::process::{OutputStream, ProcessLauncher, RunningProcess};
use super::tools::ExecutableSet;

/// Log line printed once the circuit is established
pub const BOOTSTRAP_MARKER: &str = "Bootstrapped 100% (done): Done";

/// Command line for one proxy launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLaunch {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl ProxyLaunch {
    /// Build the launch from resolved binaries; `None` when no proxy binary exists
    pub fn from_executables(set: &ExecutableSet, socks_addr: &str) -> Option<Self> {
        let executable = set.proxy.clone()?;
        let port = socks_addr
            .rsplit(':')
            .next()
            .filter(|p| p.parse::<u16>().is_ok())
            .unwrap_or("9050");

        let mut args = vec![
            "--SocksPort".to_string(),
            port.to_string(),
            "--Log".to_string(),
            "notice stdout".to_string(),
        ];
        if let Some(data_dir) = &set.proxy_data_dir {
            args.push("--DataDirectory".to_string());
            args.push(data_dir.to_string_lossy().to_string());
        }
        if let Some(torrc) = &set.proxy_config {
            args.push("--config-file".to_string());
            args.push(torrc.to_string_lossy().to_string());
        } else if set.proxy_data_dir.is_some() {
            log::warn!("[Proxy] Bundled torrc not found, using tor defaults");
        }

        Some(Self { executable, args })
    }
}

/// A bootstrapped proxy. Call `shutdown` when the work behind it is done.
pub struct ProxyHandle {
    process: Box<dyn RunningProcess>,
    drains: Vec<JoinHandle<()>>,
}

impl ProxyHandle {
    pub async fn shutdown(mut self) {
        if let Err(e) = self.process.kill().await {
            log::warn!("[Proxy] Failed to kill proxy: {}", e);
        }
        let _ = self.process.wait().await;
        for drain in self.drains.drain(..) {
            drain.abort();
        }
        log::info!("[Proxy] Proxy stopped");
    }
}

/// Keep reading a pipe so the proxy never blocks on a full buffer
fn drain(stream: OutputStream, label: &'static str, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if verbose {
                log::info!("[Proxy:{}] {}", label, line);
            } else {
                log::trace!("[Proxy:{}] {}", label, line);
            }
        }
    })
}

/// Start the proxy and wait until it reports a finished bootstrap
pub async fn start_proxy(
    launcher: &dyn ProcessLauncher,
    executable: &Path,
    args: &[String],
    verbose: bool,
) -> Result<ProxyHandle, ProxyError> {
    log::info!("[Proxy] Starting {}", executable.display());

    let mut process = launcher
        .spawn(executable, args)
        .map_err(|e| ProxyError::Start(e.to_string()))?;

    let stdout = match process.take_stdout() {
        Some(s) => s,
        None => {
            let _ = process.kill().await;
            return Err(ProxyError::StreamClosed);
        }
    };
    let mut drains: Vec<JoinHandle<()>> = process
        .take_stderr()
        .map(|stderr| drain(stderr, "stderr", verbose))
        .into_iter()
        .collect();

    let mut lines = BufReader::new(stdout).lines();

    let outcome: Result<(), ProxyError> = loop {
        tokio::select! {
            biased;
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if verbose {
                        log::info!("[Proxy] {}", line);
                    } else {
                        log::debug!("[Proxy] {}", line);
                    }
                    if line.contains(BOOTSTRAP_MARKER) {
                        break Ok(());
                    }
                }
                Ok(None) => {
                    // stdout closed before the marker; report how the process ended
                    let code = process.wait().await.ok().flatten();
                    break Err(ProxyError::Exited { code });
                }
                Err(e) => break Err(ProxyError::Io(e)),
            },
            status = process.wait() => {
                let code = status.ok().flatten();
                break Err(ProxyError::Exited { code });
            }
        }
    };

    match outcome {
        Ok(()) => {
            log::info!("[Proxy] Bootstrap complete");
            drains.push(drain(Box::pin(lines.into_inner()), "stdout", verbose));
            Ok(ProxyHandle { process, drains })
        }
        Err(e) => {
            log::warn!("[Proxy] Bootstrap failed: {}", e);
            let _ = process.kill().await;
            for d in drains {
                d.abort();
            }
            Err(e)
        }
    }
}
