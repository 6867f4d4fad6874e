// yt-dlp engine binding
//
// Runs the native yt-dlp binary through tokio::process. Progress lines are
// streamed from stdout and stderr as they arrive; every line is forwarded to
// the emitter with the last known percent so the orchestrator can inspect
// error text while the attempt is still running.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use super::errors::DownloadError;
use super::models::{MediaMetadata, StreamVariant};
use super::progress::parse_progress_line;
use super::tools::{run_with_deadline, ToolManager, ToolType};
use super::traits::{
    EngineBinding, EngineCapabilities, ExecuteOptions, ExecutionReport, ProbeOptions,
    ProgressEmitter,
};

/// Upper bound for a metadata dump; the orchestrator usually gives up sooner
const PROBE_PROCESS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
struct ResolvedTools {
    ytdlp: String,
    ffmpeg: Option<String>,
}

pub struct YtDlpEngine {
    config: EngineConfig,
    tools: RwLock<Option<ResolvedTools>>,
}

impl YtDlpEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tools: RwLock::new(None),
        }
    }

    async fn resolved(&self) -> Result<ResolvedTools, DownloadError> {
        self.tools
            .read()
            .await
            .clone()
            .ok_or_else(|| DownloadError::ToolNotFound("yt-dlp has not been located yet".to_string()))
    }

    /// Parse `--dump-json` output into metadata
    pub fn parse_json(stdout: &[u8]) -> Result<MediaMetadata, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let json: serde_json::Value = serde_json::from_str(json_str.trim())
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

        Ok(MediaMetadata {
            id: json["id"].as_str().unwrap_or("unknown").to_string(),
            title: json["title"].as_str().unwrap_or("Unknown").to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0).max(0.0) as u64,
            thumbnail: json["thumbnail"].as_str().unwrap_or("").to_string(),
            uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
            variants: Self::parse_formats(&json)?,
        })
    }

    fn parse_formats(json: &serde_json::Value) -> Result<Vec<StreamVariant>, DownloadError> {
        let formats = json["formats"]
            .as_array()
            .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

        Ok(formats
            .iter()
            .filter_map(|f| {
                let format_id = f["format_id"].as_str().filter(|id| !id.is_empty())?;
                let ext = f["ext"].as_str().unwrap_or("");
                // storyboard images
                if ext == "mhtml" {
                    return None;
                }
                let mut variant = StreamVariant::new(
                    format_id,
                    ext,
                    f["height"].as_u64().map(|h| h as u32),
                    f["abr"].as_f64().map(|a| a as f32),
                    f["acodec"].as_str(),
                    f["vcodec"].as_str(),
                );
                variant.tbr = f["tbr"].as_f64().map(|t| t as f32);
                Some(variant)
            })
            .collect())
    }

    fn build_args(options: &ExecuteOptions, url: &str, ffmpeg: Option<&str>) -> Vec<String> {
        let mut args = options.to_args(url);
        if let Some(location) = ffmpeg.filter(|p| p.contains('/') || p.contains('\\')) {
            let at = args.len().saturating_sub(1);
            args.insert(at, "--ffmpeg-location".to_string());
            args.insert(at + 1, location.to_string());
        }
        args
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl EngineBinding for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn initialize(&self) -> Result<EngineCapabilities, DownloadError> {
        let ytdlp = ToolManager::detect(ToolType::YtDlp, self.config.ytdlp_path.as_deref()).await;
        if !ytdlp.is_available {
            return Err(DownloadError::ToolNotFound(format!(
                "yt-dlp is not runnable at {}",
                ytdlp.path
            )));
        }

        let ffmpeg = ToolManager::detect(ToolType::Ffmpeg, self.config.ffmpeg_path.as_deref()).await;
        if !ffmpeg.is_available {
            warn!("ffmpeg not found; MP3 conversion and stream merging are unavailable");
        }

        info!(
            ytdlp = %ytdlp.path,
            version = ytdlp.version.as_deref().unwrap_or("unknown"),
            ffmpeg = ffmpeg.is_available,
            "yt-dlp engine ready"
        );

        let transcoder_available = ffmpeg.is_available;
        *self.tools.write().await = Some(ResolvedTools {
            ytdlp: ytdlp.path,
            ffmpeg: transcoder_available.then_some(ffmpeg.path),
        });

        Ok(EngineCapabilities { transcoder_available })
    }

    async fn probe(&self, url: &str, options: &ProbeOptions) -> Result<MediaMetadata, DownloadError> {
        let tools = self.resolved().await?;
        let args = options.to_args(url);
        debug!(ytdlp = %tools.ytdlp, args = %args.join(" "), "Probing");

        let output = run_with_deadline(&tools.ytdlp, &args, "Probe", PROBE_PROCESS_TIMEOUT).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr.trim(), "Probe failed");
            return Err(DownloadError::from(stderr.to_string()));
        }

        Self::parse_json(&output.stdout)
    }

    async fn execute(
        &self,
        url: &str,
        options: &ExecuteOptions,
        progress: ProgressEmitter,
    ) -> Result<ExecutionReport, DownloadError> {
        let tools = self.resolved().await?;
        let args = Self::build_args(options, url, tools.ffmpeg.as_deref());
        info!(format = %options.format, "Starting yt-dlp");
        debug!(args = %args.join(" "), "yt-dlp arguments");

        let mut child = Command::new(&tools.ytdlp)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::ExecutionError(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture stderr".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);
        let mut last_percent = 0.0_f32;
        let mut last_error: Option<String> = None;

        while !(out_done && err_done) {
            tokio::select! {
                _ = progress.cancelled() => {
                    debug!("Attempt cancelled, stopping yt-dlp");
                    let _ = child.kill().await;
                    return Ok(ExecutionReport {
                        exit_code: None,
                        last_error: last_error.or_else(|| Some("Cancelled".to_string())),
                    });
                }
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => forward_line(&progress, &line, &mut last_percent),
                    _ => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            last_error = Some(line.trim().to_string());
                        }
                        forward_line(&progress, &line, &mut last_percent);
                    }
                    _ => err_done = true,
                },
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            warn!(code = ?status.code(), error = last_error.as_deref().unwrap_or(""), "yt-dlp exited with error");
        }

        Ok(ExecutionReport {
            exit_code: status.code(),
            last_error: if status.success() { None } else { last_error },
        })
    }
}

fn forward_line(progress: &ProgressEmitter, line: &str, last_percent: &mut f32) {
    match parse_progress_line(line) {
        Some((percent, eta)) => {
            *last_percent = percent;
            progress.emit(percent, eta, line);
        }
        None => progress.emit(*last_percent, -1, line),
    }
}
