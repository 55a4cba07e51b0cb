//! Data model for extractor output.
//!
//! The extractor emits a loosely typed JSON document; this module pins the
//! fields the service cares about and ignores everything else. Formats are
//! re-sorted by quality before they leave the API.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static RESOLUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)x(\d+)").expect("resolution pattern"));

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").expect("number"));

/// Metadata document as decoded from the extractor's `--dump-json` output.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
    #[serde(default)]
    pub subtitles: HashMap<String, Vec<RawSubtitleTrack>>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubtitleTrack {
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Whether a format carries video, audio, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatKind {
    #[serde(rename = "video+audio")]
    VideoAudio,
    #[serde(rename = "video-only")]
    VideoOnly,
    #[serde(rename = "audio-only")]
    AudioOnly,
    #[serde(rename = "unknown")]
    Unknown,
}

/// A single available format, normalized for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: Option<String>,
    pub audio_bitrate: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub filesize: Option<u64>,
    pub format_type: FormatKind,
}

/// A subtitle track exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtitle {
    pub language: String,
    pub format: String,
    pub auto_generated: bool,
}

/// Normalized video metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
    pub duration: u64,
    pub author: String,
    pub upload_date: String,
    pub view_count: u64,
    pub thumbnail_url: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<VideoFormat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<Vec<Subtitle>>,
}

impl VideoInfo {
    /// Normalize a raw extractor document. `fallback_id` covers documents
    /// where the extractor omitted the `id` field.
    pub fn from_raw(raw: RawVideoInfo, fallback_id: &str) -> Self {
        Self {
            video_id: raw.id.unwrap_or_else(|| fallback_id.to_string()),
            title: raw.title.unwrap_or_default(),
            duration: raw.duration.unwrap_or(0.0).max(0.0) as u64,
            author: raw.uploader.unwrap_or_default(),
            upload_date: raw.upload_date.unwrap_or_default(),
            view_count: raw.view_count.unwrap_or(0),
            thumbnail_url: raw.thumbnail.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            formats: None,
            subtitles: None,
        }
    }
}

fn codec_present(codec: &Option<String>) -> bool {
    matches!(codec.as_deref(), Some(c) if !c.is_empty() && c != "none")
}

fn categorize(raw: &RawFormat) -> FormatKind {
    match (codec_present(&raw.vcodec), codec_present(&raw.acodec)) {
        (true, true) => FormatKind::VideoAudio,
        (true, false) => FormatKind::VideoOnly,
        (false, true) => FormatKind::AudioOnly,
        (false, false) => FormatKind::Unknown,
    }
}

/// Height in pixels extracted from a resolution string, 0 for audio-only.
pub fn resolution_height(resolution: Option<&str>) -> u32 {
    let Some(resolution) = resolution else {
        return 0;
    };
    if resolution.to_ascii_lowercase().contains("audio") {
        return 0;
    }
    if let Some(caps) = RESOLUTION_PATTERN.captures(resolution) {
        return caps[2].parse().unwrap_or(0);
    }
    if let Some(caps) = NUMBER_PATTERN.captures(resolution) {
        return caps[1].parse().unwrap_or(0);
    }
    0
}

/// Convert and sort raw formats, best quality first.
///
/// Ordering key is the tuple (resolution height, filesize, format id),
/// descending, so video renditions rank above audio-only and within a
/// rendition the larger encode wins.
pub fn parse_formats(raw: Vec<RawFormat>) -> Vec<VideoFormat> {
    let mut formats: Vec<VideoFormat> = raw
        .into_iter()
        .map(|f| {
            let format_type = categorize(&f);
            VideoFormat {
                format_id: f.format_id.clone().unwrap_or_default(),
                ext: f.ext.clone().unwrap_or_default(),
                audio_bitrate: f.abr.map(|b| b.max(0.0) as u32),
                video_codec: f.vcodec.clone().filter(|c| c != "none"),
                audio_codec: f.acodec.clone().filter(|c| c != "none"),
                filesize: f.filesize,
                resolution: f.resolution,
                format_type,
            }
        })
        .collect();

    formats.sort_by(|a, b| {
        let key_a = (
            resolution_height(a.resolution.as_deref()),
            a.filesize.unwrap_or(0),
            a.format_id.clone(),
        );
        let key_b = (
            resolution_height(b.resolution.as_deref()),
            b.filesize.unwrap_or(0),
            b.format_id.clone(),
        );
        key_b.cmp(&key_a)
    });

    formats
}

/// Flatten the extractor's language-keyed subtitle map.
pub fn parse_subtitles(raw: HashMap<String, Vec<RawSubtitleTrack>>) -> Vec<Subtitle> {
    let mut subtitles: Vec<Subtitle> = raw
        .into_iter()
        .flat_map(|(language, tracks)| {
            tracks.into_iter().map(move |track| Subtitle {
                language: language.clone(),
                format: track.ext.unwrap_or_default(),
                auto_generated: track
                    .name
                    .as_deref()
                    .is_some_and(|n| n.starts_with("auto-generated")),
            })
        })
        .collect();
    subtitles.sort_by(|a, b| a.language.cmp(&b.language));
    subtitles
}
