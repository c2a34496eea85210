// InfoExtractor trait and common types

use async_trait::async_trait;
use std::path::PathBuf;

use crate::downloader::config::DEFAULT_USER_AGENT;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::RawVideoInfo;

/// Configuration for one info extraction
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// SOCKS5 proxy URL
    pub proxy: Option<String>,
    /// Transcoder location handed to the extractor
    pub transcoder: Option<PathBuf>,
    pub user_agent: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub verbose: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            transcoder: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 120,
            verbose: false,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_transcoder(mut self, path: Option<PathBuf>) -> Self {
        self.transcoder = path;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Trait for info extractors
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// One invocation returning the raw JSON document bytes. No retries here.
    async fn fetch(&self, query: &str, config: &ExtractorConfig) -> Result<Vec<u8>, DownloadError>;

    /// Parse a fetched document
    fn parse(&self, stdout: &[u8]) -> Result<RawVideoInfo, DownloadError>;
}
