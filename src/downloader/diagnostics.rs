// Engine output diagnostics
//
// Classifies individual yt-dlp output lines so the orchestrator can react
// while an attempt is still running:
// - "Requested format is not available" ends the attempt and moves the
//   fallback ladder forward
// - permanent restrictions (DRM, removed video) stop the ladder entirely
// - everything else is only logged
// Lines other than engine errors are ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSignal {
    /// The selector matched no remote stream
    FormatUnavailable,
    /// HTTP 403 Forbidden from the CDN
    Http403Forbidden,
    /// 429 or similar
    RateLimited,
    /// "Sign in to confirm you're not a bot", captcha, ...
    BotDetection,
    /// DRM / Premium / paid content
    DrmProtected,
    /// Deleted, private or otherwise gone
    VideoUnavailable,
    /// Socket-level timeout
    NetworkTimeout,
}

impl LineSignal {
    /// No selector will ever succeed for this video
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::VideoUnavailable)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::FormatUnavailable => "Requested format is not available",
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::RateLimited => "Rate limited by YouTube",
            Self::BotDetection => "Bot detection triggered",
            Self::DrmProtected => "DRM-protected content",
            Self::VideoUnavailable => "Video unavailable",
            Self::NetworkTimeout => "Network timeout",
        }
    }
}

/// Classify one engine output line.
///
/// Only `ERROR:` lines are inspected; progress, destination and merger lines
/// echo the video title and must never trigger a signal.
pub fn classify_line(line: &str) -> Option<LineSignal> {
    let message = line.trim_start().strip_prefix("ERROR:")?;
    let lower = message.to_lowercase();

    if lower.contains("requested format is not available")
        || lower.contains("requested format not available")
    {
        return Some(LineSignal::FormatUnavailable);
    }

    if lower.contains("drm protected")
        || lower.contains("drm-protected")
        || lower.contains("widevine")
        || lower.contains("requires payment")
        || lower.contains("requires purchase")
    {
        return Some(LineSignal::DrmProtected);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("private video")
        || lower.contains("this video is no longer available")
    {
        return Some(LineSignal::VideoUnavailable);
    }

    if lower.contains("http error 429") || lower.contains("too many requests") {
        return Some(LineSignal::RateLimited);
    }

    if lower.contains("not a bot") || lower.contains("captcha") || lower.contains("unusual traffic") {
        return Some(LineSignal::BotDetection);
    }

    if lower.contains("http error 403") || lower.contains("403: forbidden") {
        return Some(LineSignal::Http403Forbidden);
    }

    if lower.contains("timed out") || lower.contains("connection timeout") {
        return Some(LineSignal::NetworkTimeout);
    }

    None
}
