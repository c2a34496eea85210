// Lifecycle events shared by pipeline consumers
//
// A running job reports over a single-consumer channel. Exactly one terminal
// event (End, Metadata or Error) is delivered; nothing follows it.

use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{DownloadProgress, MetadataReport};
use super::process::OutputStream;

pub enum PipelineEvent {
    /// Command line resolved, transcoder about to start
    Start { command: String },
    Progress(DownloadProgress),
    /// Stream mode: the consumer must drain `stream`
    Ready { filename: String, stream: OutputStream },
    /// Metadata mode terminal success
    Metadata(Box<MetadataReport>),
    /// Terminal success with the final output name
    End { output: String },
    Error(DownloadError),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Progress(_) => "progress",
            Self::Ready { .. } => "ready",
            Self::Metadata(_) => "metadata",
            Self::End { .. } => "end",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Metadata(_) | Self::End { .. } | Self::Error(_))
    }
}

impl fmt::Debug for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { command } => f.debug_struct("Start").field("command", command).finish(),
            Self::Progress(p) => f.debug_tuple("Progress").field(p).finish(),
            Self::Ready { filename, .. } => f
                .debug_struct("Ready")
                .field("filename", filename)
                .finish_non_exhaustive(),
            Self::Metadata(m) => f.debug_tuple("Metadata").field(m).finish(),
            Self::End { output } => f.debug_struct("End").field("output", output).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// Successful terminal outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Output(String),
    Metadata(Box<MetadataReport>),
}

/// Producer side; drops anything sent after the terminal event
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    finished: bool,
}

impl EventSink {
    /// Returns false when the event was suppressed or nobody is listening
    pub fn emit(&mut self, event: PipelineEvent) -> bool {
        if self.finished {
            log::debug!("[Lifecycle] Dropping '{}' after terminal event", event.name());
            return false;
        }
        if event.is_terminal() {
            self.finished = true;
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn fail(&mut self, error: DownloadError) -> bool {
        self.emit(PipelineEvent::Error(error))
    }
}

/// Consumer side of one running job
pub struct Lifecycle {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
    cancel: CancellationToken,
    terminated: bool,
}

impl Lifecycle {
    pub fn channel() -> (EventSink, Lifecycle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSink {
                tx,
                finished: false,
            },
            Lifecycle {
                rx,
                cancel: CancellationToken::new(),
                terminated: false,
            },
        )
    }

    /// Token the producer watches for cancellation
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the producer to stop; it reports `Error(Cancelled)`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, `None` once the terminal event has been received
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        if self.terminated {
            return None;
        }
        let event = self.rx.recv().await;
        match &event {
            Some(e) if e.is_terminal() => self.terminated = true,
            None => self.terminated = true,
            _ => {}
        }
        event
    }

    /// Drain to the terminal event. A `Ready` stream seen on the way is dropped,
    /// so stream-mode callers should use `next` instead.
    pub async fn wait(mut self) -> Result<Completion, DownloadError> {
        while let Some(event) = self.next().await {
            match event {
                PipelineEvent::End { output } => return Ok(Completion::Output(output)),
                PipelineEvent::Metadata(report) => return Ok(Completion::Metadata(report)),
                PipelineEvent::Error(e) => return Err(e),
                PipelineEvent::Progress(p) => {
                    log::debug!("[Lifecycle] {:.1}% at {}", p.percent, p.timemark);
                }
                other => log::debug!("[Lifecycle] {}", other.name()),
            }
        }
        Err(DownloadError::Transcode(
            "pipeline ended without a terminal event".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(percent: f64) -> PipelineEvent {
        PipelineEvent::Progress(DownloadProgress {
            percent,
            timemark: "00:00:01.00".to_string(),
            speed: None,
        })
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_event() {
        let (mut sink, mut lifecycle) = Lifecycle::channel();

        assert!(sink.emit(PipelineEvent::Start { command: "ffmpeg".into() }));
        assert!(sink.emit(progress(50.0)));
        assert!(sink.emit(PipelineEvent::End { output: "out.mkv".into() }));
        assert!(!sink.emit(progress(99.0)));
        assert!(!sink.fail(DownloadError::Cancelled));
        drop(sink);

        let mut names = Vec::new();
        while let Some(event) = lifecycle.next().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["start", "progress", "end"]);
    }

    #[tokio::test]
    async fn test_wait_returns_error() {
        let (mut sink, lifecycle) = Lifecycle::channel();
        sink.emit(progress(10.0));
        sink.fail(DownloadError::Transcode("exit 1".into()));

        let err = lifecycle.wait().await.unwrap_err();
        assert!(matches!(err, DownloadError::Transcode(_)));
    }

    #[tokio::test]
    async fn test_dropped_producer_without_terminal() {
        let (sink, lifecycle) = Lifecycle::channel();
        drop(sink);
        assert!(lifecycle.wait().await.is_err());
    }

    #[test]
    fn test_cancel_flags_token() {
        let (_sink, lifecycle) = Lifecycle::channel();
        let token = lifecycle.cancellation();
        assert!(!token.is_cancelled());
        lifecycle.cancel();
        assert!(token.is_cancelled());
    }
}
