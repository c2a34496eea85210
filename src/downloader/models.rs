// Common data models for extraction and transcoding

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::utils::{deserialize_loose_f64, deserialize_loose_string, format_duration, format_size};

/// One extraction call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    /// URL or search text
    pub query: String,
    pub use_tor: bool,
    pub verbose: bool,
}

impl ExtractionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_tor: false,
            verbose: false,
        }
    }

    pub fn with_tor(mut self, enabled: bool) -> Self {
        self.use_tor = enabled;
        self
    }

    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }
}

/// Stream variant exactly as the extractor reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFormat {
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub format_id: Option<String>,
    /// Label such as "720p" or "128k (DRC)"
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub format_note: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub ext: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub container: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub manifest_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub resolution: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub vcodec: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub dynamic_range: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub filesize: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub tbr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub vbr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub asr: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub fps: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub width: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub height: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub audio_channels: Option<f64>,
    /// Extractor-internal ranking hints
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub quality: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub source_preference: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub language_preference: Option<f64>,
    #[serde(default)]
    pub has_drm: Option<Value>,
    #[serde(default)]
    pub http_headers: Option<Value>,
    #[serde(default)]
    pub downloader_options: Option<Value>,
}

impl RawFormat {
    pub fn note(&self) -> &str {
        self.format_note.as_deref().unwrap_or("")
    }

    pub fn is_drc(&self) -> bool {
        self.note().contains("DRC")
    }

    pub fn is_hdr(&self) -> bool {
        self.note().contains("HDR")
    }

    /// HDR flagged either by label or by reported dynamic range
    pub fn is_hdr_variant(&self) -> bool {
        self.is_hdr()
            || self
                .dynamic_range
                .as_deref()
                .map_or(false, |range| range.to_ascii_uppercase().starts_with("HDR"))
    }

    pub fn is_dynamic_variant(&self) -> bool {
        self.is_drc() || self.is_hdr_variant()
    }

    /// Segmented-streaming (playlist based) protocol
    pub fn is_manifest(&self) -> bool {
        self.protocol
            .as_deref()
            .map_or(false, |p| p.starts_with("m3u8") || p == "http_dash_segments")
    }
}

/// Normalized stream record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRecord {
    pub format_id: String,
    pub format_note: String,
    pub format: String,
    pub protocol: String,
    pub ext: String,
    pub container: Option<String>,
    pub url: String,
    pub manifest_url: Option<String>,
    pub resolution: String,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub dynamic_range: Option<String>,
    pub language: Option<String>,
    pub filesize: f64,
    /// Human-readable filesize
    #[serde(rename = "filesizeP")]
    pub filesize_p: String,
    pub tbr: f64,
    pub vbr: f64,
    pub abr: f64,
    pub asr: f64,
    pub fps: f64,
    pub width: f64,
    pub height: f64,
    pub audio_channels: f64,
    pub quality: f64,
    pub source_preference: f64,
    pub language_preference: f64,
    pub has_drm: bool,
    pub http_headers: Option<Value>,
}

fn nan_or(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

impl From<&RawFormat> for FormatRecord {
    fn from(raw: &RawFormat) -> Self {
        let filesize = nan_or(raw.filesize);
        Self {
            format_id: raw.format_id.clone().unwrap_or_default(),
            format_note: raw.note().to_string(),
            format: raw.format.clone().unwrap_or_default(),
            protocol: raw.protocol.clone().unwrap_or_default(),
            ext: raw.ext.clone().unwrap_or_default(),
            container: raw.container.clone(),
            url: raw.url.clone().unwrap_or_default(),
            manifest_url: raw.manifest_url.clone(),
            resolution: raw.resolution.clone().unwrap_or_default(),
            vcodec: raw.vcodec.clone(),
            acodec: raw.acodec.clone(),
            dynamic_range: raw.dynamic_range.clone(),
            language: raw.language.clone(),
            filesize,
            filesize_p: format_size(filesize),
            tbr: nan_or(raw.tbr),
            vbr: nan_or(raw.vbr),
            abr: nan_or(raw.abr),
            asr: nan_or(raw.asr),
            fps: nan_or(raw.fps),
            width: nan_or(raw.width),
            height: nan_or(raw.height),
            audio_channels: nan_or(raw.audio_channels),
            quality: nan_or(raw.quality),
            source_preference: nan_or(raw.source_preference),
            language_preference: nan_or(raw.language_preference),
            has_drm: raw.has_drm.as_ref().map_or(false, |v| match v {
                Value::Bool(b) => *b,
                Value::String(s) => !s.is_empty() && s != "false",
                _ => false,
            }),
            http_headers: raw.http_headers.clone(),
        }
    }
}

/// Best-selection record: only what playback needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayableFormat {
    pub format_id: String,
    pub format_note: String,
    pub format: String,
    pub protocol: String,
    pub ext: String,
    pub container: Option<String>,
    pub url: String,
    pub resolution: String,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub dynamic_range: Option<String>,
    pub language: Option<String>,
    pub filesize: f64,
    #[serde(rename = "filesizeP")]
    pub filesize_p: String,
    pub tbr: f64,
    pub vbr: f64,
    pub abr: f64,
    pub asr: f64,
    pub fps: f64,
    pub width: f64,
    pub height: f64,
    pub audio_channels: f64,
}

impl From<&FormatRecord> for PlayableFormat {
    fn from(r: &FormatRecord) -> Self {
        Self {
            format_id: r.format_id.clone(),
            format_note: r.format_note.clone(),
            format: r.format.clone(),
            protocol: r.protocol.clone(),
            ext: r.ext.clone(),
            container: r.container.clone(),
            url: r.url.clone(),
            resolution: r.resolution.clone(),
            vcodec: r.vcodec.clone(),
            acodec: r.acodec.clone(),
            dynamic_range: r.dynamic_range.clone(),
            language: r.language.clone(),
            filesize: r.filesize,
            filesize_p: r.filesize_p.clone(),
            tbr: r.tbr,
            vbr: r.vbr,
            abr: r.abr,
            asr: r.asr,
            fps: r.fps,
            width: r.width,
            height: r.height,
            audio_channels: r.audio_channels,
        }
    }
}

/// Top-level extractor document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub channel_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub channel_follower_count: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub uploader: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub uploader_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub uploader_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub view_count: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub like_count: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub comment_count: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_f64")]
    pub age_limit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub upload_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub live_status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub webpage_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub original_url: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<Value>>,
    #[serde(default)]
    pub tags: Option<Vec<Value>>,
    pub formats: Vec<RawFormat>,
}

/// Descriptive video attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel: String,
    pub channel_id: String,
    pub channel_url: String,
    pub channel_follower_count: f64,
    pub uploader: String,
    pub uploader_id: String,
    pub uploader_url: String,
    pub duration: f64,
    pub duration_string: String,
    pub thumbnail: String,
    pub view_count: f64,
    pub like_count: f64,
    pub comment_count: f64,
    pub age_limit: f64,
    /// Raw `YYYYMMDD`
    pub upload_date: Option<String>,
    /// `YYYY-MM-DD`
    pub upload_date_iso: Option<String>,
    pub live_status: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub webpage_url: String,
    pub original_url: String,
}

fn string_list(values: &Option<Vec<Value>>) -> Vec<String> {
    values
        .iter()
        .flatten()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

/// `20240131` -> `2024-01-31`
pub fn upload_date_iso(raw: &str) -> Option<String> {
    let format = time::format_description::parse("[year][month][day]").ok()?;
    let date = time::Date::parse(raw.trim(), &format).ok()?;
    Some(format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    ))
}

impl From<&RawVideoInfo> for MetaData {
    fn from(info: &RawVideoInfo) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let duration = nan_or(info.duration);
        Self {
            id: text(&info.id),
            title: text(&info.title),
            description: text(&info.description),
            channel: text(&info.channel),
            channel_id: text(&info.channel_id),
            channel_url: text(&info.channel_url),
            channel_follower_count: nan_or(info.channel_follower_count),
            uploader: text(&info.uploader),
            uploader_id: text(&info.uploader_id),
            uploader_url: text(&info.uploader_url),
            duration,
            duration_string: format_duration(duration),
            thumbnail: text(&info.thumbnail),
            view_count: nan_or(info.view_count),
            like_count: nan_or(info.like_count),
            comment_count: nan_or(info.comment_count),
            age_limit: nan_or(info.age_limit),
            upload_date: info.upload_date.clone(),
            upload_date_iso: info.upload_date.as_deref().and_then(upload_date_iso),
            live_status: info.live_status.clone(),
            categories: string_list(&info.categories),
            tags: string_list(&info.tags),
            webpage_url: text(&info.webpage_url),
            original_url: text(&info.original_url),
        }
    }
}

/// Normalized extraction result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    #[serde(rename = "BestAudioLow")]
    pub best_audio_low: Option<PlayableFormat>,
    #[serde(rename = "BestAudioHigh")]
    pub best_audio_high: Option<PlayableFormat>,
    #[serde(rename = "BestVideoLow")]
    pub best_video_low: Option<PlayableFormat>,
    #[serde(rename = "BestVideoHigh")]
    pub best_video_high: Option<PlayableFormat>,
    #[serde(rename = "AudioLow")]
    pub audio_low: Vec<FormatRecord>,
    #[serde(rename = "AudioHigh")]
    pub audio_high: Vec<FormatRecord>,
    #[serde(rename = "AudioLowDRC")]
    pub audio_low_drc: Vec<FormatRecord>,
    #[serde(rename = "AudioHighDRC")]
    pub audio_high_drc: Vec<FormatRecord>,
    #[serde(rename = "VideoLow")]
    pub video_low: Vec<FormatRecord>,
    #[serde(rename = "VideoHigh")]
    pub video_high: Vec<FormatRecord>,
    #[serde(rename = "VideoLowHDR")]
    pub video_low_hdr: Vec<FormatRecord>,
    #[serde(rename = "VideoHighHDR")]
    pub video_high_hdr: Vec<FormatRecord>,
    #[serde(rename = "ManifestLow")]
    pub manifest_low: Vec<FormatRecord>,
    #[serde(rename = "ManifestHigh")]
    pub manifest_high: Vec<FormatRecord>,
    #[serde(rename = "metaData")]
    pub meta_data: MetaData,
    /// Source IP observed during extraction, forwarded to the transcoder
    pub ip_address: Option<String>,
}

/// Which streams a download combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    AudioOnly,
    VideoOnly,
    AudioVideo,
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::AudioOnly => "Audio",
            JobKind::VideoOnly => "Video",
            JobKind::AudioVideo => "AudioVideo",
        }
    }
}

/// Target stream selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    Lowest,
    Highest,
    /// Resolution ("720p", "1280x720") or bitrate label ("medium", "128k")
    Quality(String),
    FormatId(String),
}

impl Selection {
    pub fn label(&self) -> String {
        match self {
            Selection::Lowest => "Lowest".to_string(),
            Selection::Highest => "Highest".to_string(),
            Selection::Quality(q) => q.clone(),
            Selection::FormatId(id) => format!("f{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Write a file into the output directory
    File,
    /// Hand the transcoder's stdout to the caller
    Stream,
    /// Report the selected streams, run nothing
    Metadata,
}

/// Download options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub kind: JobKind,
    pub selection: Selection,
    /// Named filter from the filter table
    pub filter: Option<String>,
    pub mode: OutputMode,
    /// Explicit output directory; only valid with `OutputMode::File`
    pub output_dir: Option<PathBuf>,
}

impl DownloadJob {
    pub fn new(kind: JobKind, selection: Selection) -> Self {
        Self {
            kind,
            selection,
            filter: None,
            mode: OutputMode::File,
            output_dir: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// Transcoder progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// 0..=100, NaN when the duration is unknown
    pub percent: f64,
    /// Position reached, `HH:MM:SS.xx`
    pub timemark: String,
    pub speed: Option<String>,
}

/// Terminal payload of a metadata-only job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataReport {
    #[serde(rename = "metaData")]
    pub meta_data: MetaData,
    pub audio: Option<PlayableFormat>,
    pub video: Option<PlayableFormat>,
    pub filename: String,
    pub ip_address: Option<String>,
}
