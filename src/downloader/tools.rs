// Discovery of the bundled engine and transcoder binaries

use std::io;
use std::path::Path;
use std::process::{Output, Stdio};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::errors::DownloadError;

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub tool_type: ToolType,
    pub path: String,
    pub version: Option<String>,
    pub is_available: bool,
}

pub struct ToolManager;

impl ToolManager {
    /// Locate a tool, preferring an explicit override, and query its version.
    pub async fn detect(tool_type: ToolType, override_path: Option<&str>) -> ToolInfo {
        let path = match override_path {
            Some(p) => p.to_string(),
            None => Self::find_binary(tool_type),
        };
        let version = Self::get_version(&path, tool_type).await;
        debug!(tool = tool_type.as_str(), %path, ?version, "Tool detection");

        ToolInfo {
            tool_type,
            is_available: version.is_some(),
            path,
            version,
        }
    }

    fn find_binary(tool_type: ToolType) -> String {
        let name = tool_type.as_str();
        let common_paths = [
            format!("/opt/homebrew/bin/{}", name),
            format!("/usr/local/bin/{}", name),
            format!("/usr/bin/{}", name),
        ];

        common_paths
            .into_iter()
            .find(|p| Path::new(p).exists())
            .unwrap_or_else(|| name.to_string())
    }

    async fn get_version(path: &str, tool_type: ToolType) -> Option<String> {
        let args = [tool_type.version_arg().to_string()];
        let output = match run_with_deadline(path, &args, "Version check", VERSION_TIMEOUT).await {
            Ok(output) => output,
            Err(e) => {
                debug!(tool = tool_type.as_str(), error = %e, "Version check failed");
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    }
}

/// Run a tool to completion, killing it once `after` elapses.
///
/// A missing binary maps to [`DownloadError::ToolNotFound`], an overrun to
/// [`DownloadError::Timeout`] labelled with `operation`.
pub async fn run_with_deadline(
    program: &str,
    args: &[String],
    operation: &'static str,
    after: Duration,
) -> Result<Output, DownloadError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DownloadError::ToolNotFound(program.to_string()),
            _ => DownloadError::ExecutionError(format!("{} could not start: {}", program, e)),
        })?;

    // dropping the wait future on timeout kills the child
    match timeout(after, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            debug!(program, operation, "Tool overran its deadline");
            Err(DownloadError::Timeout { operation, after })
        }
    }
}
