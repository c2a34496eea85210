use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::errors::DownloadError;
use super::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Environment override for the bundle directory
pub const BUNDLE_DIR_ENV: &str = "YTDLX_BUNDLE_DIR";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry policy for extractor invocations
    pub retry: RetryPolicy,
    /// User agent passed to the extractor
    pub user_agent: String,
    /// Local SOCKS5 address the proxy listens on
    pub socks_addr: String,
    /// Directory holding bundled binaries (`context/<platform>/...`)
    pub bundle_dir: Option<PathBuf>,
    /// Upper bound for one extractor run
    pub extractor_timeout_secs: u64,
    /// Where file-mode downloads land when the job names no directory
    pub default_output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            socks_addr: "127.0.0.1:9050".to_string(),
            bundle_dir: None,
            extractor_timeout_secs: 120,
            default_output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, or defaults if path is None or the file doesn't exist.
    /// `YTDLX_BUNDLE_DIR` overrides the bundle directory either way.
    pub fn load(path: Option<&Path>) -> Result<Self, DownloadError> {
        let mut config = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)?;
                config = serde_json::from_str(&content).map_err(|e| {
                    DownloadError::Validation(format!(
                        "Failed to parse config {}: {}",
                        config_path.display(),
                        e
                    ))
                })?;
            }
        }

        if let Ok(dir) = std::env::var(BUNDLE_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.bundle_dir = Some(PathBuf::from(dir));
            }
        }

        Ok(config)
    }

    /// Proxy URL handed to the extractor and the IP probe
    pub fn socks_proxy_url(&self) -> String {
        format!("socks5://{}", self.socks_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.socks_proxy_url(), "socks5://127.0.0.1:9050");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.extractor_timeout_secs, 120);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"socks_addr": "127.0.0.1:9150", "retry": {{"max_attempts": 5}}}}"#).unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.socks_addr, "127.0.0.1:9150");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = EngineConfig::load(Some(Path::new("/no/such/ytdlx.json"))).unwrap();
        assert_eq!(config.socks_addr, "127.0.0.1:9050");
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EngineConfig::load(Some(file.path())),
            Err(DownloadError::Validation(_))
        ));
    }
}
