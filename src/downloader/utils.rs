// Helper functions shared by the extractor, proxy and pipeline

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::downloader::errors::DownloadError;
use crate::downloader::process::ProcessOutput;

#[derive(Debug, Deserialize)]
struct SimpleIp {
    ip: String,
}

/// Run command to completion, optionally bounded by a timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[String],
    timeout_after: Option<Duration>,
) -> Result<ProcessOutput, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program.display()))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program.display()))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let waited = match timeout_after {
        Some(limit) => match timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(DownloadError::ExecutionError(format!(
                    "{} timed out after {}s",
                    program.display(),
                    limit.as_secs()
                )));
            }
        },
        None => child.wait().await,
    };

    let status = waited.map_err(|e| {
        DownloadError::ExecutionError(format!("Failed to wait for {}: {}", program.display(), e))
    })?;
    let stdout = join_pipe(stdout_task, "stdout").await?;
    let stderr = join_pipe(stderr_task, "stderr").await?;

    Ok(ProcessOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("{} task failed: {}", name, e)))?
        .map_err(|e| DownloadError::ExecutionError(format!("Failed to read {}: {}", name, e)))
}

/// Map a spawn failure: a missing binary is fatal, anything else is an execution failure
pub fn spawn_error(program: &Path, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(format!("{}: {}", program.display(), e))
    } else {
        DownloadError::ExecutionError(format!("Failed to start {}: {}", program.display(), e))
    }
}

/// Get external IP address via HTTP services (with optional proxy)
pub async fn get_external_ip(proxy: Option<&str>) -> Option<String> {
    log::debug!("[IpCheck] Starting IP check with proxy: {:?}", proxy);

    let client_builder = reqwest::Client::builder().timeout(Duration::from_secs(10));

    let client_builder = match proxy {
        Some(proxy_url) => match reqwest::Proxy::all(proxy_url) {
            Ok(p) => client_builder.proxy(p),
            Err(e) => {
                log::warn!("[IpCheck] Invalid proxy URL {}: {}", proxy_url, e);
                return None;
            }
        },
        None => client_builder,
    };

    let client = match client_builder.build() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("[IpCheck] Failed to build client: {}", e);
            return None;
        }
    };

    let services = [
        "https://api.ipify.org?format=json",
        "https://ipinfo.io/json",
        "https://checkip.amazonaws.com",
    ];

    for service in services {
        log::debug!("[IpCheck] Trying service: {}", service);
        match client.get(service).send().await {
            Ok(response) => {
                if let Ok(text) = response.text().await {
                    if let Ok(simple) = serde_json::from_str::<SimpleIp>(&text) {
                        log::debug!("[IpCheck] Success: {}", simple.ip);
                        return Some(simple.ip);
                    }
                    // checkip answers in plain text
                    let trimmed = text.trim();
                    if !trimmed.is_empty() && trimmed.parse::<std::net::IpAddr>().is_ok() {
                        return Some(trimmed.to_string());
                    }
                }
            }
            Err(e) => {
                log::debug!("[IpCheck] Service {} failed: {}", service, e);
            }
        }
    }

    log::warn!("[IpCheck] All services failed");
    None
}

/// Origin IP embedded in a signed media URL (`...&ip=1.2.3.4&...`)
pub fn ip_from_media_url(url: &str) -> Option<String> {
    lazy_static::lazy_static! {
        static ref IP_PARAM_RE: Regex = Regex::new(r"[?&/]ip[=/]([0-9A-Fa-f:.%]+)").unwrap();
    }

    IP_PARAM_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("%3A", ":"))
        .filter(|ip| ip.parse::<std::net::IpAddr>().is_ok())
}

/// Whether a query looks like a URL rather than search text
pub fn is_url(query: &str) -> bool {
    lazy_static::lazy_static! {
        static ref URL_RE: Regex = Regex::new(r"^(?i)(https?://|www\.)\S+$").unwrap();
    }
    URL_RE.is_match(query.trim())
}

/// Parse as number, else NaN
pub fn parse_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => f64::NAN,
    }
}

/// Lenient numeric field: absent/null is `None`, anything else coerces with `parse_number`
pub fn deserialize_loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_number(&v)),
    })
}

/// Lenient string field: numbers are stringified, other non-strings dropped
pub fn deserialize_loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Format file size for display (binary units, two decimals above bytes)
pub fn format_size(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if !bytes.is_finite() {
        return "NaN".to_string();
    }

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.2} KB", bytes / KB)
    } else if bytes < GB {
        format!("{:.2} MB", bytes / MB)
    } else {
        format!("{:.2} GB", bytes / GB)
    }
}

/// Make a string safe to use as a file name component
pub fn sanitize_filename(name: &str) -> String {
    lazy_static::lazy_static! {
        static ref UNSAFE_RE: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1F]+"#).unwrap();
        static ref SPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    }

    let cleaned = UNSAFE_RE.replace_all(name, "");
    let collapsed = SPACE_RE.replace_all(cleaned.trim(), "_");
    let truncated: String = collapsed.chars().take(120).collect();
    if truncated.is_empty() {
        "untitled".to_string()
    } else {
        truncated
    }
}

/// Convert seconds to `H:MM:SS` / `M:SS`
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
