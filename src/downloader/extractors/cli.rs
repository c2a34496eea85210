// CLI InfoExtractor - runs the bundled yt-dlp compatible binary in single-JSON mode

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{ExtractorConfig, InfoExtractor};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::RawVideoInfo;
use crate::downloader::process::ProcessLauncher;
use crate::downloader::utils::is_url;

/// CLI-based info extractor
pub struct CliInfoExtractor {
    binary_path: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
}

impl CliInfoExtractor {
    pub fn new(binary_path: PathBuf, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            binary_path,
            launcher,
        }
    }

    /// Build command arguments
    pub fn build_args(query: &str, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
            "--prefer-insecure".to_string(),
            "--geo-bypass".to_string(),
            "--user-agent".to_string(),
            config.user_agent.clone(),
        ];

        if let Some(proxy) = &config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        if let Some(transcoder) = &config.transcoder {
            args.push("--ffmpeg-location".to_string());
            args.push(transcoder.to_string_lossy().to_string());
        }

        let trimmed = query.trim();
        if is_url(trimmed) {
            args.push("--no-playlist".to_string());
            args.push(trimmed.to_string());
        } else {
            args.push(format!("ytsearch1:{}", trimmed));
        }
        args
    }

    /// Parse JSON output; search results are unwrapped to their first entry
    pub fn parse_json(stdout: &[u8]) -> Result<RawVideoInfo, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let mut json: serde_json::Value = serde_json::from_str(json_str.trim())
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

        if json.get("formats").is_none() {
            if let Some(entries) = json.get_mut("entries").and_then(|e| e.as_array_mut()) {
                if entries.is_empty() {
                    return Err(DownloadError::ParseError("Search returned no results".to_string()));
                }
                json = entries.swap_remove(0);
            }
        }

        if !json.get("formats").map_or(false, |f| f.is_array()) {
            return Err(DownloadError::ParseError("No formats array in JSON".to_string()));
        }

        serde_json::from_value(json)
            .map_err(|e| DownloadError::ParseError(format!("Unexpected document shape: {}", e)))
    }

    /// Short reason for logs: first ERROR line, else the last non-empty line
    fn failure_reason(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        text.lines()
            .map(|l| l.trim())
            .find(|l| l.starts_with("ERROR:"))
            .or_else(|| text.lines().rev().map(|l| l.trim()).find(|l| !l.is_empty()))
            .unwrap_or("no output")
            .chars()
            .take(300)
            .collect()
    }
}

#[async_trait]
impl InfoExtractor for CliInfoExtractor {
    fn name(&self) -> &'static str {
        "cli-ytprobe"
    }

    async fn fetch(&self, query: &str, config: &ExtractorConfig) -> Result<Vec<u8>, DownloadError> {
        let args = Self::build_args(query, config);
        if config.verbose {
            log::info!("[Extractor] {} {}", self.binary_path.display(), args.join(" "));
        } else {
            log::debug!("[Extractor] {} {}", self.binary_path.display(), args.join(" "));
        }

        let timeout = (config.timeout_seconds > 0).then(|| Duration::from_secs(config.timeout_seconds));
        let output = self
            .launcher
            .output(&self.binary_path, &args, timeout)
            .await?;

        if output.success() {
            Ok(output.stdout)
        } else {
            let reason = Self::failure_reason(&output.stderr);
            log::warn!("[Extractor] exit {:?}: {}", output.code, reason);
            Err(DownloadError::ExecutionError(format!(
                "extractor exited with {:?}: {}",
                output.code, reason
            )))
        }
    }

    fn parse(&self, stdout: &[u8]) -> Result<RawVideoInfo, DownloadError> {
        Self::parse_json(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::process::testing::{failed_output, ok_output, FakeLauncher};

    #[test]
    fn test_args_with_proxy_and_transcoder() {
        let config = ExtractorConfig::default()
            .with_proxy(Some("socks5://127.0.0.1:9050".to_string()))
            .with_transcoder(Some(PathBuf::from("/b/ffmpeg.bin")))
            .with_user_agent("UA/1.0");

        let args = CliInfoExtractor::build_args("https://youtu.be/abc", &config);

        assert_eq!(args[0], "--dump-single-json");
        assert!(args.contains(&"--no-check-certificates".to_string()));
        assert!(args.contains(&"--geo-bypass".to_string()));
        assert!(args.windows(2).any(|w| w == ["--user-agent", "UA/1.0"]));
        assert!(args.windows(2).any(|w| w == ["--proxy", "socks5://127.0.0.1:9050"]));
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/b/ffmpeg.bin"]));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn test_search_text_becomes_search_query() {
        let args = CliInfoExtractor::build_args("  lofi beats ", &ExtractorConfig::default());
        assert_eq!(args.last().unwrap(), "ytsearch1:lofi beats");
        assert!(!args.contains(&"--proxy".to_string()));
        assert!(!args.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn test_parse_unwraps_search_entries() {
        let doc = r#"{"_type":"playlist","entries":[{"id":"first","formats":[]},{"id":"second","formats":[]}]}"#;
        let info = CliInfoExtractor::parse_json(doc.as_bytes()).unwrap();
        assert_eq!(info.id.as_deref(), Some("first"));
    }

    #[test]
    fn test_parse_rejects_malformed_documents() {
        assert!(matches!(
            CliInfoExtractor::parse_json(b"{not json"),
            Err(DownloadError::ParseError(_))
        ));
        assert!(matches!(
            CliInfoExtractor::parse_json(br#"{"id":"x"}"#),
            Err(DownloadError::ParseError(_))
        ));
        assert!(matches!(
            CliInfoExtractor::parse_json(br#"{"entries":[]}"#),
            Err(DownloadError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_maps_exit_code_to_execution_error() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_output(Ok(failed_output(1, "WARNING: x\nERROR: HTTP Error 429: Too Many Requests\n")));
        launcher.push_output(Ok(ok_output("{}")));

        let extractor = CliInfoExtractor::new(PathBuf::from("ytprobe"), launcher.clone());
        let config = ExtractorConfig::default();

        let err = extractor.fetch("https://youtu.be/abc", &config).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("HTTP Error 429"));

        let body = extractor.fetch("https://youtu.be/abc", &config).await.unwrap();
        assert_eq!(body, b"{}");
        assert_eq!(launcher.output_count(), 2);
    }
}
