// Downloader module - extraction engine, proxy bootstrap and transcoding pipeline

pub mod config;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod proxy;
pub mod retry;
pub mod tools;
pub mod utils;

pub use config::EngineConfig;
pub use errors::{DownloadError, ErrorCategory, ProxyError};
pub use format_selector::FormatSelector;
pub use lifecycle::{Completion, Lifecycle, PipelineEvent};
pub use models::{
    DownloadJob, DownloadProgress, EngineResult, ExtractionRequest, FormatRecord, JobKind,
    MetaData, MetadataReport, OutputMode, PlayableFormat, Selection,
};
pub use orchestrator::{Engine, HttpIpProbe, IpProbe};
pub use pipeline::Pipeline;
pub use process::{ProcessLauncher, RunningProcess, TokioLauncher};
pub use proxy::{start_proxy, ProxyHandle, ProxyLaunch, BOOTSTRAP_MARKER};
pub use retry::RetryPolicy;
pub use tools::{ExecutableResolver, ExecutableSet, ToolType};
