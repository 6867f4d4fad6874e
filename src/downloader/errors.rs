// Error types for the download orchestrator

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error families, used by callers to decide how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input from the caller (malformed URL)
    Input,
    /// Engine not ready or in cooldown/recovery
    Readiness,
    /// Not enough local resources (disk space)
    Resource,
    /// The engine failed or timed out
    Engine,
    /// The engine finished but no output file could be located
    Discovery,
}

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Invalid YouTube URL format
    #[error("Invalid YouTube URL: {0}")]
    InvalidUrl(String),

    /// Engine has not been initialized yet
    #[error("Engine is not initialized")]
    NotInitialized,

    /// A recent engine failure is still inside the cooldown window
    #[error("Waiting for cooldown after engine failure ({}s remaining)", .remaining.as_secs().max(1))]
    Cooldown { remaining: Duration },

    /// Too many consecutive engine failures
    #[error("Service in recovery mode after {failures} engine failures")]
    Recovery { failures: u32 },

    /// Free space below the per-kind minimum
    #[error("Not enough storage space: {available} bytes available, {required} bytes required")]
    InsufficientSpace { available: u64, required: u64 },

    /// Output directory could not be created
    #[error("Cannot prepare output directory: {0}")]
    Storage(String),

    /// Engine call exceeded its time budget
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Network timeout while connecting to YouTube
    #[error("Network timeout: YouTube is not responding")]
    NetworkTimeout,

    /// YouTube blocked the request (429, bot detection, etc.)
    #[error("YouTube is temporarily throttling requests from this network")]
    BlockedByYouTube,

    /// yt-dlp or ffmpeg not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Engine reported completion but no usable file was found
    #[error("Downloaded file not found or empty: {0}")]
    FileNotFound(String),

    /// Unknown engine error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::Input,
            Self::NotInitialized | Self::Cooldown { .. } | Self::Recovery { .. } => {
                ErrorKind::Readiness
            }
            Self::InsufficientSpace { .. } | Self::Storage(_) => ErrorKind::Resource,
            Self::FileNotFound(_) => ErrorKind::Discovery,
            Self::Timeout { .. }
            | Self::NetworkTimeout
            | Self::BlockedByYouTube
            | Self::ToolNotFound(_)
            | Self::ParseError(_)
            | Self::ExecutionError(_)
            | Self::Unknown(_) => ErrorKind::Engine,
        }
    }

    /// Whether this error should feed the crash counter.
    pub fn is_engine_failure(&self) -> bool {
        self.kind() == ErrorKind::Engine
    }
}

// Classify raw engine stderr into a typed error
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            if lower.contains("youtube.com") {
                return Self::BlockedByYouTube;
            }
            return Self::NetworkTimeout;
        }

        if lower.contains("429") || lower.contains("sign in to confirm") || lower.contains("blocked")
        {
            return Self::BlockedByYouTube;
        }

        if lower.contains("not found")
            || lower.contains("no such file")
            || lower.contains("command not found")
        {
            return Self::ToolNotFound(s);
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::ParseError(s);
        }

        if lower.contains("unsupported url") {
            return Self::InvalidUrl(s);
        }

        Self::Unknown(s)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::ExecutionError(e.to_string())
    }
}
