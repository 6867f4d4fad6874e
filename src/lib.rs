//! Download orchestration core for a YouTube MP4/MP3 client built on yt-dlp.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ytmp3_core::{DownloadRequest, Orchestrator, OrchestratorConfig, YtDlpEngine, EngineConfig};
//!
//! # async fn run() {
//! let engine = Arc::new(YtDlpEngine::new(EngineConfig::from_env()));
//! let orchestrator = Orchestrator::new(engine, OrchestratorConfig::default());
//! let mut outcomes = orchestrator.download(DownloadRequest::audio("https://youtu.be/dQw4w9WgXcQ"));
//! while let Some(outcome) = outcomes.next().await {
//!     println!("{:?}", outcome);
//! }
//! # }
//! ```

pub mod downloader;
pub mod logging;

pub use downloader::*;
pub use logging::init_logging;
