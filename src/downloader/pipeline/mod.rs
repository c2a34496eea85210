// Transcoding pipeline
//
// Validates a job against an extraction result, builds the transcoder command
// and drives it on a background task, reporting over a Lifecycle channel.

pub mod command;
pub mod filters;
pub mod progress;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::command::{build_command, output_filename, select_streams, TranscodeCommand};
use self::progress::{parse_progress, StatusLines};
use super::errors::DownloadError;
use super::lifecycle::{EventSink, Lifecycle, PipelineEvent};
use super::models::{DownloadJob, EngineResult, MetadataReport, OutputMode};
use super::process::{ProcessLauncher, RunningProcess};
use super::tools::ExecutableSet;

/// stderr lines kept for the failure message
const STDERR_TAIL: usize = 8;
/// Stream mode relay between transcoder stdout and the consumer
const STREAM_BUFFER: usize = 64 * 1024;

pub struct Pipeline {
    launcher: Arc<dyn ProcessLauncher>,
    transcoder: Option<PathBuf>,
    default_output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        transcoder: Option<PathBuf>,
        default_output_dir: PathBuf,
    ) -> Self {
        Self {
            launcher,
            transcoder,
            default_output_dir,
        }
    }

    pub fn from_executables(
        launcher: Arc<dyn ProcessLauncher>,
        executables: &ExecutableSet,
        default_output_dir: PathBuf,
    ) -> Self {
        Self::new(launcher, executables.transcoder.clone(), default_output_dir)
    }

    /// Check a job before anything is spawned
    fn validate(&self, job: &DownloadJob) -> Result<(), DownloadError> {
        match (job.mode, &job.output_dir) {
            (OutputMode::Metadata, Some(_)) => {
                return Err(DownloadError::Validation(
                    "Metadata mode cannot be combined with an output directory".to_string(),
                ))
            }
            (OutputMode::Stream, Some(_)) => {
                return Err(DownloadError::Validation(
                    "Stream mode cannot be combined with an output directory".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(name) = &job.filter {
            filters::resolve(name, job.kind)?;
        }
        Ok(())
    }

    /// Start a job. Validation errors are returned directly; everything after
    /// the transcoder starts arrives through the returned Lifecycle.
    pub async fn run(&self, result: &EngineResult, job: DownloadJob) -> Result<Lifecycle, DownloadError> {
        self.validate(&job)?;
        let filter = job
            .filter
            .as_deref()
            .map(|name| filters::resolve(name, job.kind))
            .transpose()?;
        let streams = select_streams(result, &job)?;
        let (mut sink, lifecycle) = Lifecycle::channel();

        if job.mode == OutputMode::Metadata {
            let report = MetadataReport {
                meta_data: result.meta_data.clone(),
                audio: streams.audio,
                video: streams.video,
                filename: output_filename(&result.meta_data.title, &job),
                ip_address: result.ip_address.clone(),
            };
            log::info!("[Pipeline] Metadata for '{}'", report.filename);
            sink.emit(PipelineEvent::Metadata(Box::new(report)));
            return Ok(lifecycle);
        }

        let transcoder = self.transcoder.as_deref().ok_or_else(|| {
            DownloadError::Validation("Transcoder binary is not available".to_string())
        })?;
        let output_dir = job
            .output_dir
            .clone()
            .unwrap_or_else(|| self.default_output_dir.clone());
        let cmd = build_command(transcoder, result, &job, &streams, filter, &output_dir)?;

        let launcher = self.launcher.clone();
        let cancel = lifecycle.cancellation();
        let duration = result.meta_data.duration;
        let mode = job.mode;
        tokio::spawn(async move {
            drive(launcher, cmd, mode, duration, sink, cancel).await;
        });

        Ok(lifecycle)
    }
}

async fn remove_partial(cmd: &TranscodeCommand) {
    if let Some(path) = &cmd.output_path {
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::info!("[Pipeline] Removed partial output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[Pipeline] Could not remove {}: {}", path.display(), e),
        }
    }
}

async fn abort(process: &mut Box<dyn RunningProcess>, cmd: &TranscodeCommand, sink: &mut EventSink, error: DownloadError) {
    let _ = process.kill().await;
    let _ = process.wait().await;
    remove_partial(cmd).await;
    sink.fail(error);
}

async fn drive(
    launcher: Arc<dyn ProcessLauncher>,
    cmd: TranscodeCommand,
    mode: OutputMode,
    duration: f64,
    mut sink: EventSink,
    cancel: CancellationToken,
) {
    let command_line = cmd.display();
    log::info!("[Pipeline] {}", command_line);
    sink.emit(PipelineEvent::Start {
        command: command_line,
    });

    if let Some(parent) = cmd.output_path.as_ref().and_then(|p| p.parent()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            sink.fail(e.into());
            return;
        }
    }

    // the consumer gets its handle before the transcoder starts producing
    let relay = (mode == OutputMode::Stream).then(|| {
        let (reader, writer) = tokio::io::duplex(STREAM_BUFFER);
        sink.emit(PipelineEvent::Ready {
            filename: cmd.filename.clone(),
            stream: Box::pin(reader),
        });
        writer
    });

    let mut process = match launcher.spawn(&cmd.program, &cmd.args) {
        Ok(p) => p,
        Err(e) => {
            log::error!("[Pipeline] Failed to start transcoder: {}", e);
            sink.fail(e);
            return;
        }
    };

    let stdout = process.take_stdout();
    let mut relay_task: Option<JoinHandle<std::io::Result<u64>>> = None;
    match (relay, stdout) {
        (Some(mut writer), Some(mut stream)) => {
            relay_task = Some(tokio::spawn(async move {
                tokio::io::copy(&mut stream, &mut writer).await
            }));
        }
        (Some(_), None) => {
            let error = DownloadError::Transcode("transcoder stdout unavailable".to_string());
            abort(&mut process, &cmd, &mut sink, error).await;
            return;
        }
        (None, Some(mut stream)) => {
            tokio::spawn(async move {
                let mut devnull = tokio::io::sink();
                let _ = tokio::io::copy(&mut stream, &mut devnull).await;
            });
        }
        (None, None) => {}
    }

    let mut stderr = process.take_stderr().map(|s| StatusLines::new(BufReader::new(s)));
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

    let status = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("[Pipeline] Cancelled");
                if let Some(task) = &relay_task {
                    task.abort();
                }
                abort(&mut process, &cmd, &mut sink, DownloadError::Cancelled).await;
                return;
            }
            line = async { stderr.as_mut()?.next_line().await.ok().flatten() }, if stderr.is_some() => {
                match line {
                    Some(line) => {
                        if let Some(p) = parse_progress(&line, duration) {
                            sink.emit(PipelineEvent::Progress(p));
                        } else {
                            log::debug!("[Pipeline] {}", line);
                            if tail.len() == STDERR_TAIL {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    None => stderr = None,
                }
            }
            status = process.wait() => break status,
        }
    };

    // pick up whatever stderr still holds after exit
    if let Some(lines) = stderr.as_mut() {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(p) = parse_progress(&line, duration) {
                sink.emit(PipelineEvent::Progress(p));
                continue;
            }
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    match status {
        Ok(Some(0)) => {
            if let Some(mut task) = relay_task {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log::info!("[Pipeline] Cancelled while the consumer was draining");
                        task.abort();
                        remove_partial(&cmd).await;
                        sink.fail(DownloadError::Cancelled);
                        return;
                    }
                    copied = &mut task => match copied {
                        Ok(Ok(bytes)) => log::debug!("[Pipeline] Relayed {} bytes", bytes),
                        Ok(Err(e)) => log::warn!("[Pipeline] Stream consumer went away: {}", e),
                        Err(e) => log::warn!("[Pipeline] Stream relay failed: {}", e),
                    },
                }
            }
            let output = cmd
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| cmd.filename.clone());
            log::info!("[Pipeline] Finished {}", output);
            sink.emit(PipelineEvent::End { output });
        }
        Ok(code) => {
            let reason = tail.back().cloned().unwrap_or_else(|| "no output".to_string());
            log::error!("[Pipeline] Transcoder exited with {:?}: {}", code, reason);
            remove_partial(&cmd).await;
            sink.fail(DownloadError::Transcode(format!(
                "transcoder exited with {:?}: {}",
                code, reason
            )));
        }
        Err(e) => {
            remove_partial(&cmd).await;
            sink.fail(e.into());
        }
    }
}
