// FormatSelector - engine format selection with a fixed fallback ladder
//
// Progressive (pre-muxed) MP4 streams are preferred because they need no
// merge step. Separate video+audio streams are the exception path and
// require a transcoder on the engine side.

use super::models::{MediaMetadata, StreamVariant};

/// Best MP4 video + best M4A audio, else best MP4, else anything
pub const MERGE_FALLBACK: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Used when no metadata is available at all
pub const GENERIC_FALLBACK: &str = "best[ext=mp4]/best";

/// Retried one by one after a failed primary video attempt
pub const VIDEO_FALLBACK_LADDER: [&str; 3] =
    ["bestvideo[ext=mp4]+bestaudio[ext=m4a]", "best[ext=mp4]", "best"];

/// Audio source when the engine transcodes to MP3
pub const AUDIO_EXTRACT: &str = "bestaudio";

/// Audio source kept in its native container (no transcoder)
pub const AUDIO_NATIVE: &str = "bestaudio[ext=m4a]/bestaudio";

/// Target codec and quality for audio extraction
pub const AUDIO_TARGET_CODEC: &str = "mp3";
pub const AUDIO_TARGET_QUALITY: &str = "0";

pub struct FormatSelector;

impl FormatSelector {
    /// Primary selector for a video request.
    ///
    /// `quality` may be "best" or a "<n>p" cap such as "720p".
    pub fn select_video(metadata: Option<&MediaMetadata>, quality: &str) -> String {
        let Some(info) = metadata else {
            return GENERIC_FALLBACK.to_string();
        };

        let cap = Self::height_cap(quality);
        let chosen = cap
            .and_then(|max| Self::best_progressive(&info.variants, Some(max)))
            .or_else(|| Self::best_progressive(&info.variants, None));

        match chosen {
            Some(variant) if !variant.format_id.is_empty() => variant.format_id.clone(),
            _ => MERGE_FALLBACK.to_string(),
        }
    }

    /// Highest-resolution progressive MP4, ties broken by bitrate
    pub fn best_progressive(
        variants: &[StreamVariant],
        max_height: Option<u32>,
    ) -> Option<&StreamVariant> {
        variants
            .iter()
            .filter(|v| v.ext.eq_ignore_ascii_case("mp4") && v.is_progressive())
            .filter(|v| match max_height {
                Some(max) => v.height.unwrap_or(0) <= max,
                None => true,
            })
            .max_by(|a, b| {
                let key = |v: &StreamVariant| {
                    (
                        v.height.unwrap_or(0),
                        v.tbr.or(v.abr).map(|b| (b * 100.0) as u32).unwrap_or(0),
                    )
                };
                key(a).cmp(&key(b))
            })
    }

    /// Selectors tried after the primary video attempt
    pub fn video_fallbacks() -> &'static [&'static str] {
        &VIDEO_FALLBACK_LADDER
    }

    pub fn audio_selector(transcoder_available: bool) -> &'static str {
        if transcoder_available {
            AUDIO_EXTRACT
        } else {
            AUDIO_NATIVE
        }
    }

    /// Separate streams joined with '+' need an external merger
    pub fn needs_merge(selector: &str) -> bool {
        selector.contains('+')
    }

    fn height_cap(quality: &str) -> Option<u32> {
        quality
            .trim()
            .strip_suffix(['p', 'P'])
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|h| *h > 0)
    }
}
