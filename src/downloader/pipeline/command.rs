// Stream selection and transcoder command construction

use std::path::{Path, PathBuf};

use super::filters::{FilterKind, NamedFilter};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{
    DownloadJob, EngineResult, FormatRecord, JobKind, OutputMode, PlayableFormat, Selection,
};
use crate::downloader::utils::sanitize_filename;

/// Container for audio-only jobs; keeps the cover art next to the audio track
pub const AUDIO_CONTAINER: (&str, &str) = ("avi", "avi");
pub const VIDEO_CONTAINER: (&str, &str) = ("matroska", "mkv");

/// Streams chosen for one job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedStreams {
    pub audio: Option<PlayableFormat>,
    pub video: Option<PlayableFormat>,
}

fn matches_quality(record: &FormatRecord, quality: &str) -> bool {
    let q = quality.trim();
    if q.is_empty() {
        return false;
    }
    if record.format_note.eq_ignore_ascii_case(q) || record.resolution.eq_ignore_ascii_case(q) {
        return true;
    }
    // "720p" against a record that only reports 1280x720
    q.strip_suffix('p')
        .and_then(|h| h.parse::<f64>().ok())
        .map_or(false, |h| record.height == h)
}

fn by_format_id<'a>(result: &'a EngineResult, id: &str) -> Option<&'a FormatRecord> {
    [
        &result.audio_high,
        &result.audio_low,
        &result.video_high,
        &result.video_low,
        &result.manifest_high,
        &result.manifest_low,
        &result.audio_high_drc,
        &result.audio_low_drc,
        &result.video_high_hdr,
        &result.video_low_hdr,
    ]
    .into_iter()
    .flatten()
    .find(|r| r.format_id == id)
}

fn missing(what: &str, selection: &Selection) -> DownloadError {
    DownloadError::Validation(format!("No {} stream matches '{}'", what, selection.label()))
}

fn select_audio(result: &EngineResult, job: &DownloadJob) -> Result<PlayableFormat, DownloadError> {
    let found = match (&job.selection, job.kind) {
        (Selection::Lowest, _) => result.best_audio_low.clone(),
        (Selection::Highest, _) => result.best_audio_high.clone(),
        (Selection::Quality(q), JobKind::AudioOnly) => result
            .audio_high
            .iter()
            .find(|r| matches_quality(r, q))
            .map(PlayableFormat::from),
        (Selection::FormatId(id), JobKind::AudioOnly) => {
            by_format_id(result, id).map(PlayableFormat::from)
        }
        // the selection targets the video track; pair it with the best audio
        _ => result.best_audio_high.clone(),
    };
    found.ok_or_else(|| missing("audio", &job.selection))
}

fn select_video(result: &EngineResult, job: &DownloadJob) -> Result<PlayableFormat, DownloadError> {
    let found = match &job.selection {
        Selection::Lowest => result.best_video_low.clone(),
        Selection::Highest => result.best_video_high.clone(),
        Selection::Quality(q) => result
            .manifest_high
            .iter()
            .chain(result.video_high.iter())
            .find(|r| matches_quality(r, q))
            .map(PlayableFormat::from),
        Selection::FormatId(id) => by_format_id(result, id).map(PlayableFormat::from),
    };
    found.ok_or_else(|| missing("video", &job.selection))
}

/// Pick the streams a job needs; a missing stream is a validation error
pub fn select_streams(result: &EngineResult, job: &DownloadJob) -> Result<SelectedStreams, DownloadError> {
    let audio = match job.kind {
        JobKind::AudioOnly | JobKind::AudioVideo => Some(select_audio(result, job)?),
        JobKind::VideoOnly => None,
    };
    let video = match job.kind {
        JobKind::VideoOnly | JobKind::AudioVideo => Some(select_video(result, job)?),
        JobKind::AudioOnly => None,
    };

    for stream in audio.iter().chain(video.iter()) {
        if stream.url.is_empty() {
            return Err(DownloadError::Validation(format!(
                "Stream {} has no URL",
                stream.format_id
            )));
        }
    }
    Ok(SelectedStreams { audio, video })
}

/// `<title>_<label>[_<filter>].<ext>`
pub fn output_filename(title: &str, job: &DownloadJob) -> String {
    let mut stem = format!("{}_{}", title, job.selection.label());
    if let Some(filter) = &job.filter {
        stem.push('_');
        stem.push_str(filter);
    }
    let ext = match job.kind {
        JobKind::AudioOnly => AUDIO_CONTAINER.1,
        _ => VIDEO_CONTAINER.1,
    };
    format!("{}.{}", sanitize_filename(&stem), ext)
}

/// A fully resolved transcoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub filename: String,
    /// Target file; `None` when writing to stdout
    pub output_path: Option<PathBuf>,
}

impl TranscodeCommand {
    /// Human-readable command line for logs and the `Start` event
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) || arg.is_empty() {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Incremental builder, in input order
pub struct TranscodeCommandBuilder {
    program: PathBuf,
    forwarded_ip: Option<String>,
    args: Vec<String>,
    inputs: usize,
}

impl TranscodeCommandBuilder {
    pub fn new(program: &Path, forwarded_ip: Option<String>) -> Self {
        Self {
            program: program.to_path_buf(),
            forwarded_ip,
            args: vec![
                "-hide_banner".to_string(),
                "-nostdin".to_string(),
                "-y".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-stats".to_string(),
            ],
            inputs: 0,
        }
    }

    /// Add an input; network inputs carry the origin header. Returns the input index.
    pub fn input(&mut self, url: &str) -> usize {
        if url.starts_with("http://") || url.starts_with("https://") {
            if let Some(ip) = &self.forwarded_ip {
                self.args.push("-headers".to_string());
                self.args.push(format!("X-Forwarded-For: {}\r\n", ip));
            }
        }
        self.args.push("-i".to_string());
        self.args.push(url.to_string());
        self.inputs += 1;
        self.inputs - 1
    }

    pub fn option(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.args.push(name.to_string());
        self.args.push(value.into());
        self
    }

    pub fn flag(&mut self, name: &str) -> &mut Self {
        self.args.push(name.to_string());
        self
    }

    pub fn finish(mut self, format: &str, target: &str, filename: String, output_path: Option<PathBuf>) -> TranscodeCommand {
        self.args.push("-f".to_string());
        self.args.push(format.to_string());
        self.args.push(target.to_string());
        TranscodeCommand {
            program: self.program,
            args: self.args,
            filename,
            output_path,
        }
    }
}

/// Build the transcoder command for a validated job
pub fn build_command(
    transcoder: &Path,
    result: &EngineResult,
    job: &DownloadJob,
    streams: &SelectedStreams,
    filter: Option<&NamedFilter>,
    output_dir: &Path,
) -> Result<TranscodeCommand, DownloadError> {
    let filename = output_filename(&result.meta_data.title, job);
    let output_path = match job.mode {
        OutputMode::File => Some(output_dir.join(&filename)),
        _ => None,
    };
    let target = output_path
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "pipe:1".to_string());

    let mut cmd = TranscodeCommandBuilder::new(transcoder, result.ip_address.clone());

    match job.kind {
        JobKind::AudioOnly => {
            let audio = streams
                .audio
                .as_ref()
                .ok_or_else(|| DownloadError::Validation("Audio stream required".to_string()))?;

            let thumbnail = result.meta_data.thumbnail.trim();
            let cover = (!thumbnail.is_empty()).then(|| cmd.input(thumbnail));
            let track = cmd.input(&audio.url);

            cmd.option("-map", format!("{}:a:0", track));
            if let Some(cover) = cover {
                cmd.option("-map", format!("{}:v:0", cover))
                    .option("-c:v", "mjpeg");
            }
            if let Some(f) = filter {
                cmd.option("-filter:a", f.expression);
            }
            cmd.option("-c:a", "libmp3lame").option("-b:a", "192k");

            Ok(cmd.finish(AUDIO_CONTAINER.0, &target, filename, output_path))
        }
        JobKind::VideoOnly | JobKind::AudioVideo => {
            let video = streams
                .video
                .as_ref()
                .ok_or_else(|| DownloadError::Validation("Video stream required".to_string()))?;

            let picture = cmd.input(&video.url);
            let sound = match (&streams.audio, job.kind) {
                (Some(audio), JobKind::AudioVideo) => Some(cmd.input(&audio.url)),
                _ => None,
            };

            cmd.option("-map", format!("{}:v:0", picture));
            match sound {
                Some(sound) => {
                    cmd.option("-map", format!("{}:a:0", sound));
                }
                None => {
                    cmd.flag("-an");
                }
            }

            match filter {
                None => {
                    cmd.option("-c", "copy");
                }
                Some(f) if f.kind == FilterKind::Video => {
                    cmd.option("-filter:v", f.expression);
                    if sound.is_some() {
                        cmd.option("-c:a", "copy");
                    }
                }
                Some(f) => {
                    cmd.option("-filter:a", f.expression).option("-c:v", "copy");
                }
            }

            Ok(cmd.finish(VIDEO_CONTAINER.0, &target, filename, output_path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::format_selector::FormatSelector;
    use crate::downloader::models::{RawFormat, RawVideoInfo};
    use crate::downloader::pipeline::filters;

    fn fmt(id: &str, note: &str, size: f64, url: &str) -> RawFormat {
        RawFormat {
            format_id: Some(id.into()),
            format_note: Some(note.into()),
            filesize: Some(size),
            url: Some(url.into()),
            protocol: Some("https".into()),
            ..Default::default()
        }
    }

    fn sample_result() -> EngineResult {
        let mut hls = fmt("hls-720", "720p", f64::NAN, "https://m/720.m3u8");
        hls.filesize = None;
        hls.protocol = Some("m3u8_native".into());
        hls.resolution = Some("1280x720".into());
        hls.height = Some(720.0);
        hls.vbr = Some(2500.0);

        let info = RawVideoInfo {
            title: Some("My Clip: Live".into()),
            thumbnail: Some("https://i/thumb.jpg".into()),
            formats: vec![
                fmt("139", "low", 1_000.0, "https://a/139"),
                fmt("140", "medium", 3_000.0, "https://a/140"),
                fmt("160", "144p", 5_000.0, "https://v/160"),
                fmt("137", "1080p", 90_000.0, "https://v/137"),
                hls,
            ],
            ..Default::default()
        };
        FormatSelector::build_result(&info, Some("203.0.113.7".into()))
    }

    fn arg_pairs(cmd: &TranscodeCommand) -> Vec<(String, String)> {
        cmd.args
            .windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect()
    }

    #[test]
    fn test_audio_job_embeds_cover_and_header() {
        let result = sample_result();
        let job = DownloadJob::new(JobKind::AudioOnly, Selection::Highest).with_filter("bassboost");
        let streams = select_streams(&result, &job).unwrap();
        let filter = filters::resolve("bassboost", job.kind).unwrap();

        let cmd = build_command(
            Path::new("/b/ffmpeg.bin"),
            &result,
            &job,
            &streams,
            Some(filter),
            Path::new("/out"),
        )
        .unwrap();

        let pairs = arg_pairs(&cmd);
        let inputs: Vec<_> = pairs.iter().filter(|(k, _)| k == "-i").map(|(_, v)| v.as_str()).collect();
        assert_eq!(inputs, vec!["https://i/thumb.jpg", "https://a/140"]);

        let headers = pairs.iter().filter(|(k, _)| k == "-headers").count();
        assert_eq!(headers, 2);
        assert!(pairs.contains(&("-headers".into(), "X-Forwarded-For: 203.0.113.7\r\n".into())));
        assert!(pairs.contains(&("-filter:a".into(), "bass=g=10,dynaudnorm=f=150".into())));
        assert!(pairs.contains(&("-f".into(), "avi".into())));
        assert_eq!(cmd.filename, "My_Clip_Live_Highest_bassboost.avi");
        assert_eq!(cmd.output_path, Some(PathBuf::from("/out/My_Clip_Live_Highest_bassboost.avi")));
    }

    #[test]
    fn test_video_job_copies_without_filter() {
        let result = sample_result();
        let job = DownloadJob::new(JobKind::AudioVideo, Selection::Quality("720p".into()))
            .with_mode(OutputMode::Stream);
        let streams = select_streams(&result, &job).unwrap();
        assert_eq!(streams.video.as_ref().unwrap().format_id, "hls-720");
        assert_eq!(streams.audio.as_ref().unwrap().format_id, "140");

        let cmd = build_command(Path::new("ffmpeg"), &result, &job, &streams, None, Path::new("/out")).unwrap();
        let pairs = arg_pairs(&cmd);

        assert!(pairs.contains(&("-c".into(), "copy".into())));
        assert!(pairs.contains(&("-map".into(), "0:v:0".into())));
        assert!(pairs.contains(&("-map".into(), "1:a:0".into())));
        assert_eq!(cmd.args.last().unwrap(), "pipe:1");
        assert_eq!(cmd.output_path, None);
        assert!(cmd.filename.ends_with(".mkv"));
    }

    #[test]
    fn test_video_filter_reencodes_picture_only() {
        let result = sample_result();
        let job = DownloadJob::new(JobKind::VideoOnly, Selection::Lowest);
        let streams = select_streams(&result, &job).unwrap();
        assert!(streams.audio.is_none());
        assert_eq!(streams.video.as_ref().unwrap().format_id, "160");

        let filter = filters::resolve("rotate90", job.kind).unwrap();
        let cmd = build_command(Path::new("ffmpeg"), &result, &job, &streams, Some(filter), Path::new(".")).unwrap();
        let pairs = arg_pairs(&cmd);

        assert!(pairs.contains(&("-filter:v".into(), "rotate=PI/2".into())));
        assert!(cmd.args.contains(&"-an".to_string()));
        assert!(!pairs.contains(&("-c".into(), "copy".into())));
    }

    #[test]
    fn test_missing_stream_is_validation_error() {
        let result = sample_result();
        let job = DownloadJob::new(JobKind::VideoOnly, Selection::Quality("4320p".into()));
        assert!(matches!(
            select_streams(&result, &job),
            Err(DownloadError::Validation(_))
        ));

        let job = DownloadJob::new(JobKind::AudioOnly, Selection::FormatId("999".into()));
        assert!(select_streams(&result, &job).is_err());
    }

    #[test]
    fn test_format_id_selection() {
        let result = sample_result();
        let job = DownloadJob::new(JobKind::AudioOnly, Selection::FormatId("139".into()));
        let streams = select_streams(&result, &job).unwrap();
        assert_eq!(streams.audio.unwrap().url, "https://a/139");
    }

    #[test]
    fn test_no_header_without_ip() {
        let mut cmd = TranscodeCommandBuilder::new(Path::new("ffmpeg"), None);
        cmd.input("https://a/1");
        let built = cmd.finish("matroska", "pipe:1", "x.mkv".into(), None);
        assert!(!built.args.contains(&"-headers".to_string()));
        assert!(built.display().starts_with("ffmpeg -hide_banner"));
    }
}
