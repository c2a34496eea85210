// Transcoder stderr progress parsing

use regex::Regex;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::downloader::models::DownloadProgress;

/// `HH:MM:SS.xx` -> seconds
pub fn timemark_seconds(timemark: &str) -> Option<f64> {
    let mut parts = timemark.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a transcoder status line like:
/// frame=  240 fps= 48 q=-1.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=2.01x
///
/// `duration` is the media length in seconds; percent is NaN when unknown.
pub fn parse_progress(line: &str, duration: f64) -> Option<DownloadProgress> {
    lazy_static::lazy_static! {
        static ref TIME_RE: Regex = Regex::new(r"time=\s*(-?\d+:\d{2}:\d{2}(?:\.\d+)?)").unwrap();
        static ref SPEED_RE: Regex = Regex::new(r"speed=\s*([\d.]+x|N/A)").unwrap();
    }

    let caps = TIME_RE.captures(line)?;
    let timemark = caps.get(1)?.as_str().to_string();
    // negative timemarks show up before the first packet
    if timemark.starts_with('-') {
        return None;
    }
    let elapsed = timemark_seconds(&timemark)?;

    let percent = if duration.is_finite() && duration > 0.0 {
        (elapsed / duration * 100.0).clamp(0.0, 100.0)
    } else {
        f64::NAN
    };

    let speed = SPEED_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| s != "N/A");

    Some(DownloadProgress {
        percent,
        timemark,
        speed,
    })
}

/// Line reader over transcoder stderr. Status updates are redrawn with `\r`,
/// so both `\r` and `\n` end a line. Empty lines are skipped.
pub struct StatusLines<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> StatusLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Next line, `None` at end of stream. Cancel safe: a partial line stays
    /// buffered across calls.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(self.take_line());
            }
            let (used, complete) = match available.iter().position(|b| *b == b'\r' || *b == b'\n') {
                Some(end) => {
                    self.pending.extend_from_slice(&available[..end]);
                    (end + 1, true)
                }
                None => {
                    self.pending.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.reader.consume(used);
            if complete {
                if let Some(line) = self.take_line() {
                    return Ok(Some(line));
                }
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}
