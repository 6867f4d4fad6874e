// Engine binding trait and the option lists handed to it

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{EngineProgress, MediaMetadata};

/// What the engine reported about itself at initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// An audio/video transcoder (ffmpeg) is usable for merge and extraction
    pub transcoder_available: bool,
}

/// Result of one execute call that ran to process exit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub exit_code: Option<i32>,
    /// Last non-empty stderr line, if any
    pub last_error: Option<String>,
}

impl ExecutionReport {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            last_error: None,
        }
    }

    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            last_error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Metadata-only invocation options (no file writes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub socket_timeout: u32,
    pub retries: u32,
    pub proxy: Option<String>,
    pub cookies: Option<PathBuf>,
}

impl ProbeOptions {
    pub fn to_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
        ];
        if let Some(path) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push(url.to_string());
        args
    }
}

/// Audio extraction settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioExtraction {
    pub codec: String,
    pub quality: String,
}

/// Download invocation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub format: String,
    pub output_template: String,
    pub socket_timeout: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    pub max_filesize: Option<String>,
    pub extract_audio: Option<AudioExtraction>,
    /// Merge container; implies preferring the external merger
    pub merge_output: Option<String>,
    pub cookies: Option<PathBuf>,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub clear_cache: bool,
    pub no_check_certificate: bool,
}

impl ExecuteOptions {
    pub fn new(format: impl Into<String>, output_template: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            output_template: output_template.into(),
            socket_timeout: 30,
            retries: 3,
            fragment_retries: 3,
            max_filesize: None,
            extract_audio: None,
            merge_output: None,
            cookies: None,
            proxy: None,
            user_agent: None,
            referer: None,
            clear_cache: false,
            no_check_certificate: false,
        }
    }

    pub fn to_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            self.output_template.clone(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--ignore-errors".to_string(),
            "--newline".to_string(),
            "--no-part".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
            "--fragment-retries".to_string(),
            self.fragment_retries.to_string(),
        ];

        if let Some(size) = &self.max_filesize {
            args.push("--max-filesize".to_string());
            args.push(size.clone());
        }

        if let Some(audio) = &self.extract_audio {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                audio.codec.clone(),
                "--audio-quality".to_string(),
                audio.quality.clone(),
                "--prefer-ffmpeg".to_string(),
            ]);
        }

        if let Some(container) = &self.merge_output {
            args.extend([
                "--merge-output-format".to_string(),
                container.clone(),
                "--prefer-ffmpeg".to_string(),
            ]);
        }

        if let Some(ua) = &self.user_agent {
            args.push("--user-agent".to_string());
            args.push(ua.clone());
        }
        if let Some(referer) = &self.referer {
            args.push("--add-header".to_string());
            args.push(format!("Referer: {}", referer));
        }
        if self.no_check_certificate {
            args.push("--no-check-certificate".to_string());
        }
        if self.clear_cache {
            args.push("--rm-cache-dir".to_string());
        }
        if let Some(path) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }
}

/// Progress hand-off from the engine's worker to the orchestrator.
///
/// Cheap to clone and safe to call from any thread. Engines should stop
/// the attempt once `is_cancelled()` turns true.
#[derive(Clone)]
pub struct ProgressEmitter {
    callback: Arc<dyn Fn(EngineProgress) + Send + Sync>,
    cancel: CancellationToken,
}

impl ProgressEmitter {
    pub fn new(
        callback: impl Fn(EngineProgress) + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            callback: Arc::new(callback),
            cancel,
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {}, CancellationToken::new())
    }

    pub fn emit(&self, percent: f32, eta_seconds: i64, line: &str) {
        (self.callback)(EngineProgress {
            percent,
            eta_seconds,
            line: line.to_string(),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt should stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// The external extraction/transcoding engine
#[async_trait]
pub trait EngineBinding: Send + Sync {
    /// Name of the engine (for logging)
    fn name(&self) -> &'static str;

    /// One-time setup; reports transcoder availability
    async fn initialize(&self) -> Result<EngineCapabilities, DownloadError>;

    /// Fetch metadata without writing files
    async fn probe(&self, url: &str, options: &ProbeOptions) -> Result<MediaMetadata, DownloadError>;

    /// Run a download until process exit, streaming progress lines.
    ///
    /// A non-zero exit is reported through `ExecutionReport`; `Err` is
    /// reserved for the engine itself failing (spawn error, I/O, crash).
    async fn execute(
        &self,
        url: &str,
        options: &ExecuteOptions,
        progress: ProgressEmitter,
    ) -> Result<ExecutionReport, DownloadError>;
}
