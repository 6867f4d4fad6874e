// Common data models for the download orchestrator

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;
use super::urls;

/// A requested video, validated before use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    url: String,
    video_id: Option<String>,
}

impl MediaReference {
    /// Validate a URL and capture its canonical video id.
    pub fn parse(url: &str) -> Result<Self, DownloadError> {
        let url = url.trim();
        if !urls::is_valid_youtube_url(url) {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            url: url.to_string(),
            video_id: urls::extract_video_id(url),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video_id.as_deref()
    }
}

/// One remote encoding option reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVariant {
    /// Format ID the engine understands (e.g., "22", "137")
    pub format_id: String,
    /// Container extension (mp4, webm, m4a)
    pub ext: String,
    /// Derived label: "<n>p", "<n>kbps" or "unknown"
    pub quality: String,
    /// Video height in pixels
    pub height: Option<u32>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    /// Video codec (avc1, vp9, none)
    pub vcodec: Option<String>,
}

impl StreamVariant {
    pub fn new(
        format_id: impl Into<String>,
        ext: impl Into<String>,
        height: Option<u32>,
        abr: Option<f32>,
        acodec: Option<&str>,
        vcodec: Option<&str>,
    ) -> Self {
        Self {
            format_id: format_id.into(),
            ext: ext.into(),
            quality: quality_label(height, abr),
            height,
            abr,
            tbr: None,
            acodec: acodec.map(str::to_string),
            vcodec: vcodec.map(str::to_string),
        }
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    /// Pre-muxed stream: audio and video in one file, no merge needed
    pub fn is_progressive(&self) -> bool {
        self.has_audio() && self.has_video()
    }
}

// Absent codecs are treated as present; only an explicit "none" rules a track out
fn codec_present(codec: Option<&str>) -> bool {
    codec.map_or(true, |c| !c.eq_ignore_ascii_case("none"))
}

/// Label a variant by resolution, else bitrate, else "unknown".
pub fn quality_label(height: Option<u32>, abr: Option<f32>) -> String {
    if let Some(h) = height.filter(|h| *h > 0) {
        return format!("{}p", h);
    }
    if let Some(b) = abr.filter(|b| *b > 0.0) {
        return format!("{}kbps", b.round() as u32);
    }
    "unknown".to_string()
}

/// Video information returned by a successful probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub id: String,
    pub title: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub variants: Vec<StreamVariant>,
}

impl MediaMetadata {
    /// Duration as "m:ss" or "h:mm:ss"
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_seconds)
    }
}

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Requested output kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadKind {
    /// MP4 video
    Video,
    /// MP3 audio (or the best native audio container without a transcoder)
    Audio,
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: DownloadKind,
    pub quality: String,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, kind: DownloadKind) -> Self {
        Self {
            url: url.into(),
            kind,
            quality: "best".to_string(),
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self::new(url, DownloadKind::Video)
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Self::new(url, DownloadKind::Audio)
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }
}

/// Observable state of a single download request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownloadOutcome {
    Idle,
    Initializing,
    Probing(String),
    InProgress { percent: u8, status: String },
    Completed { path: PathBuf, file_name: String },
    Failed(String),
}

impl DownloadOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed(_))
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::InProgress { percent, .. } => Some(*percent),
            _ => None,
        }
    }
}

/// Raw progress signal from the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineProgress {
    /// Engine percent, not guaranteed to be within 0..=100
    pub percent: f32,
    /// ETA in seconds, -1 when unknown
    pub eta_seconds: i64,
    /// Raw output line
    pub line: String,
}

/// Format a byte count for logs
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
