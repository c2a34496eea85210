// Named filter table

use crate::downloader::errors::DownloadError;
use crate::downloader::models::JobKind;

/// Which stream a filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedFilter {
    pub name: &'static str,
    pub kind: FilterKind,
    /// Filter-graph expression passed to the transcoder
    pub expression: &'static str,
}

const fn audio(name: &'static str, expression: &'static str) -> NamedFilter {
    NamedFilter {
        name,
        kind: FilterKind::Audio,
        expression,
    }
}

const fn video(name: &'static str, expression: &'static str) -> NamedFilter {
    NamedFilter {
        name,
        kind: FilterKind::Video,
        expression,
    }
}

pub const FILTERS: &[NamedFilter] = &[
    audio("bassboost", "bass=g=10,dynaudnorm=f=150"),
    audio("echo", "aecho=0.8:0.9:1000:0.3"),
    audio("flanger", "flanger"),
    audio("nightcore", "aresample=48000,asetrate=48000*1.25"),
    audio("panning", "apulsator=hz=0.08"),
    audio("phaser", "aphaser=in_gain=0.4"),
    audio("reverse", "areverse"),
    audio("slow", "atempo=0.8"),
    audio("speed", "atempo=2"),
    audio("subboost", "asubboost"),
    audio("superslow", "atempo=0.5"),
    audio("superspeed", "atempo=3"),
    audio("surround", "surround"),
    audio("vaporwave", "aresample=48000,asetrate=48000*0.8"),
    audio("vibrato", "vibrato=f=6.5"),
    video("grayscale", "colorchannelmixer=.3:.4:.3:0:.3:.4:.3:0:.3:.4:.3"),
    video("invert", "negate"),
    video("rotate90", "rotate=PI/2"),
    video("rotate180", "rotate=PI"),
    video("rotate270", "rotate=3*PI/2"),
    video("flipHorizontal", "hflip"),
    video("flipVertical", "vflip"),
];

pub fn lookup(name: &str) -> Option<&'static NamedFilter> {
    FILTERS.iter().find(|f| f.name == name)
}

/// Resolve a filter name for a job, rejecting unknown names and mismatched kinds
pub fn resolve(name: &str, kind: JobKind) -> Result<&'static NamedFilter, DownloadError> {
    let filter = lookup(name)
        .ok_or_else(|| DownloadError::Validation(format!("Unknown filter '{}'", name)))?;

    let compatible = match (filter.kind, kind) {
        (FilterKind::Audio, JobKind::VideoOnly) => false,
        (FilterKind::Video, JobKind::AudioOnly) => false,
        _ => true,
    };
    if !compatible {
        return Err(DownloadError::Validation(format!(
            "Filter '{}' cannot be applied to a {} job",
            name,
            kind.label()
        )));
    }
    Ok(filter)
}
