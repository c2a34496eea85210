// Extraction engine: resolver, optional proxy, retrying extractor, categorization

use async_trait::async_trait;
use std::sync::Arc;

use super::config::EngineConfig;
use super::errors::DownloadError;
use super::extractors::{CliInfoExtractor, ExtractorConfig, InfoExtractor};
use super::format_selector::FormatSelector;
use super::lifecycle::Lifecycle;
use super::models::{DownloadJob, EngineResult, ExtractionRequest};
use super::pipeline::Pipeline;
use super::process::{ProcessLauncher, TokioLauncher};
use super::proxy::{start_proxy, ProxyHandle, ProxyLaunch};
use super::tools::{ExecutableResolver, ExecutableSet};
use super::utils::{get_external_ip, ip_from_media_url};

/// Observes the public IP the extractor's requests come from
#[async_trait]
pub trait IpProbe: Send + Sync {
    async fn observe(&self, proxy: Option<&str>) -> Option<String>;
}

/// Asks public IP services, through the proxy when one is active
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpIpProbe;

#[async_trait]
impl IpProbe for HttpIpProbe {
    async fn observe(&self, proxy: Option<&str>) -> Option<String> {
        get_external_ip(proxy).await
    }
}

pub struct Engine {
    config: EngineConfig,
    resolver: Arc<ExecutableResolver>,
    launcher: Arc<dyn ProcessLauncher>,
    ip_probe: Arc<dyn IpProbe>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let resolver = Arc::new(ExecutableResolver::new(config.bundle_dir.clone()));
        Self::with_parts(config, resolver, Arc::new(TokioLauncher), Arc::new(HttpIpProbe))
    }

    pub fn with_parts(
        config: EngineConfig,
        resolver: Arc<ExecutableResolver>,
        launcher: Arc<dyn ProcessLauncher>,
        ip_probe: Arc<dyn IpProbe>,
    ) -> Self {
        Self {
            config,
            resolver,
            launcher,
            ip_probe,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ExecutableResolver {
        &self.resolver
    }

    /// Start the proxy; any failure means this request runs without it
    async fn start_tor(&self, executables: &ExecutableSet, verbose: bool) -> Option<ProxyHandle> {
        let launch = match ProxyLaunch::from_executables(executables, &self.config.socks_addr) {
            Some(launch) => launch,
            None => {
                log::warn!("[Proxy] Proxy binary not available, continuing without Tor");
                return None;
            }
        };

        match start_proxy(self.launcher.as_ref(), &launch.executable, &launch.args, verbose).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("[Proxy] {}; continuing without Tor", e);
                None
            }
        }
    }

    /// Extract, categorize and normalize one video
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<EngineResult, DownloadError> {
        let executables = self.resolver.resolve()?;

        let proxy = if request.use_tor {
            self.start_tor(&executables, request.verbose).await
        } else {
            None
        };
        let proxy_url = proxy.as_ref().map(|_| self.config.socks_proxy_url());

        let extractor = CliInfoExtractor::new(executables.extractor.clone(), self.launcher.clone());
        let extractor_config = ExtractorConfig::default()
            .with_proxy(proxy_url.clone())
            .with_transcoder(executables.transcoder.clone())
            .with_user_agent(self.config.user_agent.clone())
            .with_timeout(self.config.extractor_timeout_secs)
            .with_verbose(request.verbose);

        log::info!(
            "[Extractor] Extracting '{}' (tor: {})",
            request.query,
            proxy_url.is_some()
        );

        let query = request.query.as_str();
        let (cli, cli_config) = (&extractor, &extractor_config);
        let fetch = self.config.retry.run(move |attempt| async move {
            log::debug!("[Extractor] Attempt {} via {}", attempt, cli.name());
            cli.fetch(query, cli_config).await
        });
        let probe = self.ip_probe.observe(proxy_url.as_deref());
        let (fetched, observed_ip) = tokio::join!(fetch, probe);

        if let Some(handle) = proxy {
            handle.shutdown().await;
        }

        let stdout = fetched?;
        let info = extractor.parse(&stdout)?;

        let ip_address = observed_ip.or_else(|| {
            info.formats
                .iter()
                .filter_map(|f| f.url.as_deref())
                .find_map(ip_from_media_url)
        });
        log::debug!("[Extractor] Source IP: {:?}", ip_address);

        let result = FormatSelector::build_result(&info, ip_address);
        log::info!(
            "[Extractor] '{}': {} formats",
            result.meta_data.title,
            info.formats.len()
        );
        Ok(result)
    }

    /// Run a transcoding job against an extraction result
    pub async fn download(&self, result: &EngineResult, job: DownloadJob) -> Result<Lifecycle, DownloadError> {
        let executables = self.resolver.resolve()?;
        let pipeline = Pipeline::from_executables(
            self.launcher.clone(),
            &executables,
            self.config.default_output_dir.clone(),
        );
        pipeline.run(result, job).await
    }

    /// Extract, then download
    pub async fn run(&self, request: &ExtractionRequest, job: DownloadJob) -> Result<Lifecycle, DownloadError> {
        let result = self.extract(request).await?;
        self.download(&result, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::ErrorCategory;
    use crate::downloader::lifecycle::Completion;
    use crate::downloader::models::{JobKind, OutputMode, Selection};
    use crate::downloader::process::testing::{failed_output, ok_output, FakeLauncher, FakeProcessSpec};
    use crate::downloader::proxy::BOOTSTRAP_MARKER;
    use std::path::PathBuf;
    use std::time::Duration;

    const DOC: &str = r#"{
        "id": "abc",
        "title": "Clip",
        "duration": 10,
        "formats": [
            {"format_id": "140", "format_note": "medium", "filesize": 3000,
             "url": "https://r1.example/videoplayback?expire=1&ip=203.0.113.9&id=1"},
            {"format_id": "136", "format_note": "720p", "filesize": 30000, "url": "https://r1.example/v"},
            {"format_id": "sb0", "format_note": "storyboard", "filesize": 10, "url": "https://r1.example/sb"}
        ]
    }"#;

    struct FixedProbe(Option<&'static str>);

    #[async_trait]
    impl IpProbe for FixedProbe {
        async fn observe(&self, _proxy: Option<&str>) -> Option<String> {
            self.0.map(|s| s.to_string())
        }
    }

    fn executables(with_proxy: bool) -> ExecutableSet {
        ExecutableSet {
            extractor: PathBuf::from("/b/ytprobe.bin"),
            transcoder: Some(PathBuf::from("/b/ffmpeg.bin")),
            prober: None,
            proxy: with_proxy.then(|| PathBuf::from("/b/TorBrowser/tor/tor")),
            proxy_data_dir: None,
            proxy_config: None,
        }
    }

    fn engine(launcher: Arc<FakeLauncher>, probe: Option<&'static str>, with_proxy: bool) -> Engine {
        let _ = env_logger::builder().is_test(true).try_init();
        Engine::with_parts(
            EngineConfig::default(),
            Arc::new(ExecutableResolver::preset(executables(with_proxy))),
            launcher,
            Arc::new(FixedProbe(probe)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_output(Ok(failed_output(1, "ERROR: Unable to download webpage")));
        launcher.push_output(Ok(failed_output(1, "ERROR: Unable to download webpage")));
        launcher.push_output(Ok(ok_output(DOC)));

        let engine = engine(launcher.clone(), Some("198.51.100.4"), false);
        let start = tokio::time::Instant::now();
        let result = engine.extract(&ExtractionRequest::new("https://youtu.be/abc")).await.unwrap();

        assert_eq!(launcher.output_count(), 3);
        // 1000ms then 2000ms backoff
        assert!(start.elapsed() >= Duration::from_millis(3_000));
        assert!(start.elapsed() < Duration::from_millis(10_000));
        assert_eq!(result.meta_data.id, "abc");
        assert_eq!(result.best_audio_low.as_ref().unwrap().format_id, "140");
        assert_eq!(result.video_low[0].format_id, "136");
        assert_eq!(result.ip_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_last_error() {
        let launcher = Arc::new(FakeLauncher::new());
        for _ in 0..3 {
            launcher.push_output(Ok(failed_output(1, "ERROR: HTTP Error 503")));
        }

        let engine = engine(launcher.clone(), None, false);
        let err = engine.extract(&ExtractionRequest::new("abc")).await.unwrap_err();

        assert!(matches!(err, DownloadError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.category(), ErrorCategory::Extraction);
        assert_eq!(launcher.output_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_json_is_not_retried() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_output(Ok(ok_output("<html>blocked</html>")));

        let engine = engine(launcher.clone(), None, false);
        let err = engine.extract(&ExtractionRequest::new("https://youtu.be/abc")).await.unwrap_err();

        assert!(matches!(err, DownloadError::ParseError(_)));
        assert_eq!(launcher.output_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_extractor_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new());
        let engine = Engine::with_parts(
            EngineConfig::default(),
            Arc::new(ExecutableResolver::bundle_only(dir.path().to_path_buf())),
            launcher.clone(),
            Arc::new(FixedProbe(None)),
        );

        let err = engine.extract(&ExtractionRequest::new("https://youtu.be/abc")).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
        assert_eq!(launcher.output_count(), 0);
    }

    #[tokio::test]
    async fn test_ip_falls_back_to_media_url() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_output(Ok(ok_output(DOC)));

        let engine = engine(launcher, None, false);
        let result = engine.extract(&ExtractionRequest::new("https://youtu.be/abc")).await.unwrap();
        assert_eq!(result.ip_address.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_proxy_failure_falls_back_to_direct() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_spawn(Ok(FakeProcessSpec {
            stdout: "[warn] Could not bind to 127.0.0.1:9050: Address already in use\n".into(),
            exit_code: Some(1),
            ..Default::default()
        }));
        launcher.push_output(Ok(ok_output(DOC)));

        let engine = engine(launcher.clone(), None, true);
        let request = ExtractionRequest::new("https://youtu.be/abc").with_tor(true);
        engine.extract(&request).await.unwrap();

        assert_eq!(launcher.spawn_count(), 1);
        let extractor_args = launcher.recorded_args().pop().unwrap();
        assert!(!extractor_args.contains(&"--proxy".to_string()));
    }

    #[tokio::test]
    async fn test_bootstrapped_proxy_is_used_then_stopped() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_spawn(Ok(FakeProcessSpec {
            stdout: format!("Bootstrapped 10% (conn_done)\n{}\n", BOOTSTRAP_MARKER),
            // never exits on its own; shutdown must kill it
            exit_code: None,
            ..Default::default()
        }));
        launcher.push_output(Ok(ok_output(DOC)));

        let engine = engine(launcher.clone(), Some("185.220.101.1"), true);
        let request = ExtractionRequest::new("https://youtu.be/abc").with_tor(true);
        let result = engine.extract(&request).await.unwrap();

        let extractor_args = launcher.recorded_args().pop().unwrap();
        assert!(extractor_args
            .windows(2)
            .any(|w| w == ["--proxy", "socks5://127.0.0.1:9050"]));
        assert_eq!(result.ip_address.as_deref(), Some("185.220.101.1"));
        assert_eq!(launcher.kill_count(), 1);
    }

    fn bootstrapping_tor() -> FakeProcessSpec {
        FakeProcessSpec {
            stdout: format!("{}\n", BOOTSTRAP_MARKER),
            exit_code: None,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_stopped_after_exhausted_retries() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_spawn(Ok(bootstrapping_tor()));
        for _ in 0..3 {
            launcher.push_output(Ok(failed_output(1, "ERROR: HTTP Error 429")));
        }

        let engine = engine(launcher.clone(), None, true);
        let request = ExtractionRequest::new("https://youtu.be/abc").with_tor(true);
        let err = engine.extract(&request).await.unwrap_err();

        assert!(matches!(err, DownloadError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(launcher.output_count(), 3);
        assert_eq!(launcher.kill_count(), 1);
    }

    #[tokio::test]
    async fn test_proxy_stopped_after_parse_failure() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_spawn(Ok(bootstrapping_tor()));
        launcher.push_output(Ok(ok_output("not json")));

        let engine = engine(launcher.clone(), None, true);
        let request = ExtractionRequest::new("https://youtu.be/abc").with_tor(true);
        let err = engine.extract(&request).await.unwrap_err();

        assert!(matches!(err, DownloadError::ParseError(_)));
        assert_eq!(launcher.kill_count(), 1);
    }

    #[tokio::test]
    async fn test_run_metadata_job() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push_output(Ok(ok_output(DOC)));

        let engine = engine(launcher.clone(), None, false);
        let job = DownloadJob::new(JobKind::AudioOnly, Selection::Lowest).with_mode(OutputMode::Metadata);
        let lifecycle = engine
            .run(&ExtractionRequest::new("https://youtu.be/abc"), job)
            .await
            .unwrap();

        match lifecycle.wait().await.unwrap() {
            Completion::Metadata(report) => {
                assert_eq!(report.audio.unwrap().format_id, "140");
                assert!(report.video.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(launcher.spawn_count(), 0);
    }
}
