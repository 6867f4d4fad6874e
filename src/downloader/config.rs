// Orchestrator and engine configuration

use std::path::PathBuf;
use std::time::Duration;

use super::models::DownloadKind;

const DOWNLOAD_FOLDER: &str = "YTMP3Downloads";
const MB: u64 = 1024 * 1024;

/// Circuit-breaker settings for engine failures
#[derive(Debug, Clone)]
pub struct CrashPolicy {
    /// When disabled, failures are still counted but never gate requests
    pub enabled: bool,
    /// Consecutive failures that put the service in recovery mode
    pub max_failures: u32,
    /// Fixed window after a failure during which initialization is refused
    pub cooldown: Duration,
    /// Treat "no output file found" as an engine failure
    pub count_discovery_failures: bool,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 3,
            cooldown: Duration::from_secs(30),
            count_discovery_failures: false,
        }
    }
}

impl CrashPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_discovery_failures_counted(mut self, enabled: bool) -> Self {
        self.count_discovery_failures = enabled;
        self
    }
}

/// Network and request options passed through to the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit yt-dlp binary; discovered when unset
    pub ytdlp_path: Option<String>,
    /// Explicit ffmpeg binary; discovered when unset
    pub ffmpeg_path: Option<String>,
    /// HTTP/SOCKS proxy URL
    pub proxy: Option<String>,
    /// Netscape cookies.txt, only used if the file exists
    pub cookies_path: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    /// Socket timeout in seconds
    pub socket_timeout: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    /// Clear the engine cache before each download
    pub clear_cache: bool,
    pub no_check_certificate: bool,
    /// Max file size caps per kind (engine syntax, e.g. "500M")
    pub max_filesize_video: Option<String>,
    pub max_filesize_audio: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            proxy: None,
            cookies_path: None,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            referer: Some("https://www.youtube.com/".to_string()),
            socket_timeout: 30,
            retries: 3,
            fragment_retries: 3,
            clear_cache: true,
            no_check_certificate: true,
            max_filesize_video: Some("500M".to_string()),
            max_filesize_audio: Some("100M".to_string()),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by YTMP3_* environment variables
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            ytdlp_path: var("YTMP3_YTDLP"),
            ffmpeg_path: var("YTMP3_FFMPEG"),
            proxy: var("YTMP3_PROXY"),
            cookies_path: var("YTMP3_COOKIES").map(PathBuf::from),
            ..defaults
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_ytdlp_path(mut self, path: Option<String>) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: Option<String>) -> Self {
        self.ffmpeg_path = path;
        self
    }

    pub fn max_filesize(&self, kind: DownloadKind) -> Option<&str> {
        match kind {
            DownloadKind::Video => self.max_filesize_video.as_deref(),
            DownloadKind::Audio => self.max_filesize_audio.as_deref(),
        }
    }

    /// Cookie file if configured and present on disk
    pub fn existing_cookies(&self) -> Option<&PathBuf> {
        self.cookies_path.as_ref().filter(|p| p.is_file())
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    pub crash_policy: CrashPolicy,
    pub engine: EngineConfig,
    pub init_timeout: Duration,
    pub probe_timeout: Duration,
    /// Budget for a single engine execute attempt
    pub attempt_timeout: Duration,
    pub min_free_space_video: u64,
    pub min_free_space_audio: u64,
    /// Files older than this are ignored by output discovery
    pub discovery_window: Duration,
    /// Wider window used when the engine reported 100% but nothing matched
    pub extended_discovery_window: Duration,
    /// Minimum spacing between forwarded progress updates
    pub progress_interval: Duration,
    pub max_status_len: usize,
    /// Overall percent at which engine progress starts
    pub progress_floor: u8,
    /// Fail the request when probing fails instead of using a generic selector
    pub probe_failure_is_fatal: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            crash_policy: CrashPolicy::default(),
            engine: EngineConfig::default(),
            init_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(45),
            attempt_timeout: Duration::from_secs(300),
            min_free_space_video: 100 * MB,
            min_free_space_audio: 50 * MB,
            discovery_window: Duration::from_secs(5 * 60),
            extended_discovery_window: Duration::from_secs(10 * 60),
            progress_interval: Duration::from_millis(500),
            max_status_len: 100,
            progress_floor: 20,
            probe_failure_is_fatal: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_crash_policy(mut self, policy: CrashPolicy) -> Self {
        self.crash_policy = policy;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_timeouts(mut self, init: Duration, probe: Duration, attempt: Duration) -> Self {
        self.init_timeout = init;
        self.probe_timeout = probe;
        self.attempt_timeout = attempt;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_probe_failure_fatal(mut self, fatal: bool) -> Self {
        self.probe_failure_is_fatal = fatal;
        self
    }

    pub fn min_free_space(&self, kind: DownloadKind) -> u64 {
        match kind {
            DownloadKind::Video => self.min_free_space_video,
            DownloadKind::Audio => self.min_free_space_audio,
        }
    }
}

pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DOWNLOAD_FOLDER)
}
