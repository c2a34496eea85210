//! Video metadata extraction, stream categorization and transcoding.
//!
//! [`Engine::extract`] runs the bundled extractor (optionally behind a Tor
//! proxy) and buckets every reported stream; [`Engine::download`] turns a
//! result into a file, a live stream or a metadata report.

pub mod downloader;

pub use downloader::{
    Completion, DownloadError, DownloadJob, Engine, EngineConfig, EngineResult,
    ExecutableResolver, ExtractionRequest, JobKind, Lifecycle, OutputMode, Pipeline,
    PipelineEvent, Selection,
};
