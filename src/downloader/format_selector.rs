// FormatSelector - stream categorization and best selection
//
// Converts the extractor's raw format list into keyed buckets:
// - Manifest (segmented streaming) buckets keyed by resolution, ranked by video bitrate
// - Audio/Video buckets keyed by format note, ranked by filesize
// - DRC audio and HDR video buckets, keyed by format note
// - Overall best low/high audio and video, drawn from the "low" buckets

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::models::{EngineResult, FormatRecord, MetaData, PlayableFormat, RawFormat, RawVideoInfo};

/// Lowest and highest record per key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatBucket {
    pub low: BTreeMap<String, RawFormat>,
    pub high: BTreeMap<String, RawFormat>,
}

impl FormatBucket {
    /// Keep the record if it is a new extreme for `key`
    fn offer(&mut self, key: &str, record: &RawFormat, metric: fn(&RawFormat) -> f64) {
        let replace_low = self
            .low
            .get(key)
            .map_or(true, |current| rank(record, current, metric) == Ordering::Less);
        if replace_low {
            self.low.insert(key.to_string(), record.clone());
        }

        let replace_high = self
            .high
            .get(key)
            .map_or(true, |current| rank(record, current, metric) == Ordering::Greater);
        if replace_high {
            self.high.insert(key.to_string(), record.clone());
        }
    }

    /// Last writer wins, no comparison
    fn overwrite(&mut self, key: &str, record: &RawFormat) {
        self.low.insert(key.to_string(), record.clone());
        self.high.insert(key.to_string(), record.clone());
    }
}

/// All buckets built from one format list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorizedFormats {
    pub audio: FormatBucket,
    pub video: FormatBucket,
    pub manifest: FormatBucket,
    pub audio_drc: FormatBucket,
    pub video_hdr: FormatBucket,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestSelection {
    pub audio_low: Option<RawFormat>,
    pub audio_high: Option<RawFormat>,
    pub video_low: Option<RawFormat>,
    pub video_high: Option<RawFormat>,
}

fn filesize(f: &RawFormat) -> f64 {
    f.filesize.unwrap_or(f64::NAN)
}

fn video_bitrate(f: &RawFormat) -> f64 {
    f.vbr.unwrap_or(f64::NAN)
}

/// Total order: metric first, then format id and url so ties never depend on input order
fn rank(a: &RawFormat, b: &RawFormat, metric: fn(&RawFormat) -> f64) -> Ordering {
    metric(a)
        .total_cmp(&metric(b))
        .then_with(|| a.format_id.cmp(&b.format_id))
        .then_with(|| a.url.cmp(&b.url))
}

/// Format selector with bucketing and best detection
pub struct FormatSelector;

impl FormatSelector {
    /// Bucket every record of the `formats` array
    pub fn categorize(formats: &[RawFormat]) -> CategorizedFormats {
        let mut buckets = CategorizedFormats::default();

        for format in formats {
            // Manifest buckets ignore the storyboard/default exclusion
            if format.is_manifest() {
                let vbr = video_bitrate(format);
                if vbr.is_finite() && vbr != 0.0 {
                    let key = format.resolution.as_deref().unwrap_or("");
                    buckets.manifest.offer(key, format, video_bitrate);
                }
            }

            let note = format.note();
            if note == "storyboard" || note == "Default" {
                continue;
            }

            // Filesize drives every remaining comparison
            if !filesize(format).is_finite() {
                continue;
            }

            if format.is_drc() {
                buckets.audio_drc.overwrite(note, format);
            } else if format.is_hdr_variant() {
                buckets.video_hdr.offer(note, format, filesize);
            } else if note.contains('p') {
                buckets.video.offer(note, format, filesize);
            } else {
                buckets.audio.offer(note, format, filesize);
            }
        }

        buckets
    }

    /// Overall extremes. Both are taken from the "low" buckets.
    pub fn select_best(buckets: &CategorizedFormats) -> BestSelection {
        let (audio_low, audio_high) = Self::extremes(buckets.audio.low.values());
        let (video_low, video_high) = Self::extremes(buckets.video.low.values());

        BestSelection {
            audio_low,
            audio_high,
            video_low,
            video_high,
        }
    }

    fn extremes<'a>(
        records: impl Iterator<Item = &'a RawFormat>,
    ) -> (Option<RawFormat>, Option<RawFormat>) {
        let mut low: Option<&RawFormat> = None;
        let mut high: Option<&RawFormat> = None;

        for record in records.filter(|r| filesize(r).is_finite()) {
            if low.map_or(true, |l| rank(record, l, filesize) == Ordering::Less) {
                low = Some(record);
            }
            if high.map_or(true, |h| rank(record, h, filesize) == Ordering::Greater) {
                high = Some(record);
            }
        }

        (low.cloned(), high.cloned())
    }

    /// Categorize, select and normalize a parsed extractor document
    pub fn build_result(info: &RawVideoInfo, ip_address: Option<String>) -> EngineResult {
        let buckets = Self::categorize(&info.formats);
        let best = Self::select_best(&buckets);

        let playable = |r: &Option<RawFormat>| {
            r.as_ref()
                .map(|raw| PlayableFormat::from(&FormatRecord::from(raw)))
        };

        log::debug!(
            "[FormatSelector] {} formats -> audio {} / video {} / manifest {} / drc {} / hdr {}",
            info.formats.len(),
            buckets.audio.low.len(),
            buckets.video.low.len(),
            buckets.manifest.low.len(),
            buckets.audio_drc.low.len(),
            buckets.video_hdr.low.len()
        );

        EngineResult {
            best_audio_low: playable(&best.audio_low),
            best_audio_high: playable(&best.audio_high),
            best_video_low: playable(&best.video_low),
            best_video_high: playable(&best.video_high),
            audio_low: Self::standard(&buckets.audio.low),
            audio_high: Self::standard(&buckets.audio.high),
            audio_low_drc: Self::all(&buckets.audio_drc.low),
            audio_high_drc: Self::all(&buckets.audio_drc.high),
            video_low: Self::standard(&buckets.video.low),
            video_high: Self::standard(&buckets.video.high),
            video_low_hdr: Self::all(&buckets.video_hdr.low),
            video_high_hdr: Self::all(&buckets.video_hdr.high),
            manifest_low: Self::all(&buckets.manifest.low),
            manifest_high: Self::all(&buckets.manifest.high),
            meta_data: MetaData::from(info),
            ip_address,
        }
    }

    /// Standard buckets never expose DRC/HDR variants
    fn standard(bucket: &BTreeMap<String, RawFormat>) -> Vec<FormatRecord> {
        bucket
            .values()
            .filter(|r| !r.is_dynamic_variant())
            .map(FormatRecord::from)
            .collect()
    }

    fn all(bucket: &BTreeMap<String, RawFormat>) -> Vec<FormatRecord> {
        bucket.values().map(FormatRecord::from).collect()
    }
}
