// Downloader module - orchestration core around the yt-dlp engine

pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod readiness;
pub mod storage;
pub mod stream;
pub mod tools;
pub mod traits;
pub mod urls;
pub mod ytdlp;

pub use config::{CrashPolicy, EngineConfig, OrchestratorConfig};
pub use errors::{DownloadError, ErrorKind};
pub use format_selector::FormatSelector;
pub use models::{
    DownloadKind, DownloadOutcome, DownloadRequest, EngineProgress, MediaMetadata,
    MediaReference, StreamVariant,
};
pub use orchestrator::Orchestrator;
pub use progress::ProgressNormalizer;
pub use readiness::{EngineReadiness, SessionStatus, StatusSnapshot};
pub use storage::{LocalStorage, MediaStorage};
pub use stream::DownloadStream;
pub use traits::{
    EngineBinding, EngineCapabilities, ExecuteOptions, ExecutionReport, ProbeOptions,
    ProgressEmitter,
};
pub use ytdlp::YtDlpEngine;
