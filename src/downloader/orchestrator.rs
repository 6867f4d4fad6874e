// Download orchestrator
//
// Coordinates one engine binding across requests: readiness gating with a
// crash circuit-breaker, single-flight downloads, the format fallback ladder
// and post-download file discovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::OrchestratorConfig;
use super::diagnostics::{classify_line, LineSignal};
use super::errors::{DownloadError, ErrorKind};
use super::format_selector::{
    FormatSelector, AUDIO_NATIVE, AUDIO_TARGET_CODEC, AUDIO_TARGET_QUALITY,
};
use super::models::{
    format_size, DownloadKind, DownloadOutcome, DownloadRequest, EngineProgress, MediaMetadata,
    MediaReference,
};
use super::progress::{clamp_percent, ProgressNormalizer};
use super::readiness::{EngineReadiness, SessionStatus};
use super::storage::{
    LocalStorage, MediaStorage, ANY_AUDIO_EXTENSIONS, AUDIO_EXTENSIONS, MP3_EXTENSIONS,
    NATIVE_AUDIO_EXTENSIONS, VIDEO_EXTENSIONS,
};
use super::stream::{DownloadStream, OutcomeSender};
use super::traits::{AudioExtraction, EngineBinding, ExecuteOptions, ProbeOptions, ProgressEmitter};

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const MERGE_CONTAINER: &str = "mp4";
const INIT_PERCENT: u8 = 5;

/// One engine invocation in the fallback ladder
#[derive(Debug, Clone, PartialEq)]
struct AttemptPlan {
    format: String,
    extract_audio: bool,
    /// Extension sets searched in priority order
    extensions: &'static [&'static [&'static str]],
}

/// What the engine told us while an attempt ran
#[derive(Debug, Default)]
struct AttemptFlags {
    completed: AtomicBool,
    format_unavailable: AtomicBool,
    permanent: StdMutex<Option<LineSignal>>,
}

impl AttemptFlags {
    fn permanent(&self) -> Option<LineSignal> {
        self.permanent.lock().ok().and_then(|guard| *guard)
    }
}

struct AttemptResult {
    flags: Arc<AttemptFlags>,
    last_error: Option<String>,
}

/// Single entry point for initialize, probe and download.
///
/// Cheap to clone; clones share the engine, the readiness state and the
/// download slot.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn EngineBinding>,
    storage: Arc<dyn MediaStorage>,
    readiness: Arc<EngineReadiness>,
    config: OrchestratorConfig,
    download_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn EngineBinding>, config: OrchestratorConfig) -> Self {
        Self::with_state(
            engine,
            Arc::new(LocalStorage::new()),
            Arc::new(EngineReadiness::new()),
            config,
        )
    }

    /// Build with explicit collaborators; orchestrators sharing `readiness`
    /// share one crash counter.
    pub fn with_state(
        engine: Arc<dyn EngineBinding>,
        storage: Arc<dyn MediaStorage>,
        readiness: Arc<EngineReadiness>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                storage,
                readiness,
                config,
                download_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Idempotent engine setup, refused while cooling down
    pub async fn initialize(&self) -> Result<(), DownloadError> {
        self.inner.ensure_ready().await
    }

    /// Metadata lookup; requires a prior successful `initialize()`.
    pub async fn probe(&self, url: &str) -> Result<MediaMetadata, DownloadError> {
        let reference = MediaReference::parse(url)?;
        self.inner.readiness_gate()?;
        if !self.inner.readiness.is_initialized() {
            return Err(DownloadError::NotInitialized);
        }
        self.inner.probe_engine(reference.url()).await
    }

    /// Start a download and return its outcome stream.
    ///
    /// Must be called from within a tokio runtime. Requests are served one
    /// at a time; later calls wait for the download slot.
    pub fn download(&self, request: DownloadRequest) -> DownloadStream {
        let (tx, rx) = OutcomeSender::channel();
        let cancel = CancellationToken::new();
        let span = info_span!("download", kind = %request.kind, url = %request.url);

        let inner = self.inner.clone();
        let token = cancel.clone();
        let task = tokio::spawn(
            async move { inner.run_download(request, tx, token).await }.instrument(span),
        );

        DownloadStream::new(rx, cancel, task)
    }

    pub fn status(&self) -> String {
        self.session().summary()
    }

    pub fn reset_failures(&self) {
        self.session().reset();
    }

    pub fn session(&self) -> SessionStatus {
        SessionStatus::new(self.inner.readiness.clone())
    }
}

impl Inner {
    /// Feed the crash counter with failures that point at the engine itself
    fn record_crash(&self, err: &DownloadError) {
        let counted = err.is_engine_failure()
            || (err.kind() == ErrorKind::Discovery && self.config.crash_policy.count_discovery_failures);
        if counted {
            self.count_failure(err);
        } else {
            debug!(error = %err, "Failure not counted against the engine");
        }
    }

    fn count_failure(&self, err: &DownloadError) {
        error!(engine = self.engine.name(), error = %err, "Engine failure");
        self.readiness.record_failure(self.config.crash_policy.max_failures);
    }

    /// Refuse while a recent failure is inside the cooldown window
    fn readiness_gate(&self) -> Result<(), DownloadError> {
        let policy = &self.config.crash_policy;
        if !policy.enabled {
            return Ok(());
        }
        let Some(remaining) = self.readiness.cooldown_remaining(policy.cooldown) else {
            return Ok(());
        };

        let failures = self.readiness.failure_count();
        if failures >= policy.max_failures {
            warn!(failures, "Request refused, service in recovery");
            Err(DownloadError::Recovery { failures })
        } else {
            warn!(remaining_ms = remaining.as_millis() as u64, "Request refused, engine cooling down");
            Err(DownloadError::Cooldown { remaining })
        }
    }

    async fn ensure_ready(&self) -> Result<(), DownloadError> {
        if self.readiness.is_initialized() {
            return Ok(());
        }

        let _guard = self.readiness.lock_init().await;
        if self.readiness.is_initialized() {
            return Ok(());
        }
        self.readiness_gate()?;

        info!(engine = self.engine.name(), "Initializing engine");
        let after = self.config.init_timeout;
        match timeout(after, self.engine.initialize()).await {
            Ok(Ok(caps)) => {
                self.readiness.mark_ready(caps.transcoder_available);
                Ok(())
            }
            Ok(Err(e)) => {
                self.count_failure(&e);
                Err(e)
            }
            Err(_) => {
                let e = DownloadError::Timeout { operation: "Engine initialization", after };
                self.count_failure(&e);
                Err(e)
            }
        }
    }

    async fn probe_engine(&self, url: &str) -> Result<MediaMetadata, DownloadError> {
        let engine = &self.config.engine;
        let options = ProbeOptions {
            socket_timeout: engine.socket_timeout,
            retries: engine.retries,
            proxy: engine.proxy.clone(),
            cookies: engine.existing_cookies().cloned(),
        };

        let after = self.config.probe_timeout;
        match timeout(after, self.engine.probe(url, &options)).await {
            Ok(Ok(metadata)) => {
                info!(
                    title = %metadata.title,
                    duration = %metadata.formatted_duration(),
                    variants = metadata.variants.len(),
                    "Probe succeeded"
                );
                Ok(metadata)
            }
            Ok(Err(e)) => {
                self.record_crash(&e);
                Err(e)
            }
            Err(_) => {
                let e = DownloadError::Timeout { operation: "Video info", after };
                self.record_crash(&e);
                Err(e)
            }
        }
    }

    async fn run_download(
        self: Arc<Self>,
        request: DownloadRequest,
        tx: OutcomeSender,
        cancel: CancellationToken,
    ) {
        tx.send(DownloadOutcome::Initializing);

        let reference = match MediaReference::parse(&request.url) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(error = %e, "Rejected download request");
                tx.send(DownloadOutcome::Failed(e.to_string()));
                return;
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Download cancelled");
                tx.send(DownloadOutcome::Failed("Download cancelled".to_string()));
                return;
            }
            result = self.download_exclusive(&reference, &request, &tx, &cancel) => result,
        };

        match result {
            Ok(path) => self.complete(&path, &tx),
            Err(e) => {
                if e.kind() == ErrorKind::Discovery {
                    self.record_crash(&e);
                }
                error!(error = %e, "Download failed");
                tx.send(DownloadOutcome::Failed(e.to_string()));
            }
        }
    }

    async fn download_exclusive(
        &self,
        reference: &MediaReference,
        request: &DownloadRequest,
        tx: &OutcomeSender,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let _slot = self.download_lock.lock().await;
        debug!(video_id = reference.video_id().unwrap_or("?"), "Acquired download slot");

        self.ensure_ready().await?;
        tx.send(DownloadOutcome::InProgress {
            percent: INIT_PERCENT,
            status: "Initializing...".to_string(),
        });

        self.check_storage(request.kind)?;

        let plans = match request.kind {
            DownloadKind::Video => {
                tx.send(DownloadOutcome::Probing("Fetching video info...".to_string()));
                let metadata = match self.probe_engine(reference.url()).await {
                    Ok(metadata) => Some(metadata),
                    Err(e) if self.config.probe_failure_is_fatal => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "Continuing without video info");
                        None
                    }
                };
                let primary = FormatSelector::select_video(metadata.as_ref(), &request.quality);
                if FormatSelector::needs_merge(&primary) && !self.readiness.transcoder_available() {
                    warn!("Selected streams need merging but no transcoder is available");
                }
                video_plans(primary)
            }
            DownloadKind::Audio => audio_plans(self.readiness.transcoder_available()),
        };

        tx.send(DownloadOutcome::InProgress {
            percent: self.config.progress_floor,
            status: "Starting download...".to_string(),
        });

        self.run_ladder(reference, request.kind, &plans, tx, cancel).await
    }

    fn check_storage(&self, kind: DownloadKind) -> Result<(), DownloadError> {
        let dir = &self.config.output_dir;
        self.storage
            .ensure_dir(dir)
            .map_err(|e| DownloadError::Storage(format!("{}: {}", dir.display(), e)))?;

        let required = self.config.min_free_space(kind);
        match self.storage.available_space(dir) {
            Some(available) if available < required => {
                warn!(
                    available = %format_size(available),
                    required = %format_size(required),
                    "Not enough free space"
                );
                Err(DownloadError::InsufficientSpace { available, required })
            }
            Some(available) => {
                debug!(available = %format_size(available), "Free space ok");
                Ok(())
            }
            None => {
                warn!("Free space unknown, continuing");
                Ok(())
            }
        }
    }

    async fn run_ladder(
        &self,
        reference: &MediaReference,
        kind: DownloadKind,
        plans: &[AttemptPlan],
        tx: &OutcomeSender,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let mut last_error: Option<String> = None;

        for (index, plan) in plans.iter().enumerate() {
            if index > 0 {
                info!(format = %plan.format, "Trying fallback format");
                tx.send(DownloadOutcome::InProgress {
                    percent: self.config.progress_floor,
                    status: format!("Trying fallback format {}/{}...", index, plans.len() - 1),
                });
            }

            let result = self.run_attempt(reference, kind, plan, tx, cancel).await?;
            if result.last_error.is_some() {
                last_error = result.last_error.clone();
            }

            let completed = result.flags.completed.load(Ordering::SeqCst);

            // a rejected format wrote nothing; any match would be a stale file
            if result.flags.format_unavailable.load(Ordering::SeqCst) && !completed {
                debug!(format = %plan.format, "Format rejected, skipping discovery");
                continue;
            }

            if let Some(path) = self.discover(plan.extensions, self.config.discovery_window) {
                return Ok(path);
            }

            if completed {
                warn!("Engine reported completion but no file matched, widening search");
                let wide: &[&[&str]] = match kind {
                    DownloadKind::Video => &[VIDEO_EXTENSIONS],
                    DownloadKind::Audio => &[ANY_AUDIO_EXTENSIONS],
                };
                return self
                    .discover(wide, self.config.extended_discovery_window)
                    .ok_or_else(|| {
                        DownloadError::FileNotFound(format!(
                            "no {} file in {}",
                            kind,
                            self.config.output_dir.display()
                        ))
                    });
            }

            if let Some(signal) = result.flags.permanent() {
                return Err(DownloadError::FileNotFound(match &last_error {
                    Some(detail) => format!("{}: {}", signal.description(), detail),
                    None => signal.description().to_string(),
                }));
            }
        }

        Err(DownloadError::FileNotFound(match last_error {
            Some(detail) => format!("all formats failed, last error: {}", detail),
            None => format!("all formats failed for {}", reference.url()),
        }))
    }

    async fn run_attempt(
        &self,
        reference: &MediaReference,
        kind: DownloadKind,
        plan: &AttemptPlan,
        tx: &OutcomeSender,
        cancel: &CancellationToken,
    ) -> Result<AttemptResult, DownloadError> {
        let attempt_cancel = cancel.child_token();
        let flags = Arc::new(AttemptFlags::default());
        let normalizer = StdMutex::new(ProgressNormalizer::new(
            self.config.progress_floor,
            self.config.progress_interval,
            self.config.max_status_len,
        ));

        let callback = {
            let flags = flags.clone();
            let tx = tx.clone();
            let token = attempt_cancel.clone();
            move |progress: EngineProgress| {
                observe_line(&flags, &token, &progress.line);
                if clamp_percent(progress.percent) >= 100.0 {
                    flags.completed.store(true, Ordering::SeqCst);
                }
                match normalizer.lock() {
                    Ok(mut normalizer) => {
                        if let Some(outcome) = normalizer.normalize(&progress) {
                            tx.send(outcome);
                        }
                    }
                    Err(_) => debug!("Progress normalizer unavailable, update dropped"),
                }
            }
        };

        let options = self.execute_options(kind, plan);
        let emitter = ProgressEmitter::new(callback, attempt_cancel);
        let after = self.config.attempt_timeout;

        let report = match timeout(after, self.engine.execute(reference.url(), &options, emitter)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) if flags.format_unavailable.load(Ordering::SeqCst) => {
                debug!(error = %e, "Attempt aborted after format rejection");
                return Ok(AttemptResult { flags, last_error: Some(e.to_string()) });
            }
            Ok(Err(e)) => {
                self.record_crash(&e);
                return Err(e);
            }
            Err(_) => {
                let e = DownloadError::Timeout { operation: "Download", after };
                self.record_crash(&e);
                return Err(e);
            }
        };

        if !report.is_success() {
            debug!(code = ?report.exit_code, format = %plan.format, "Attempt ended without success");
        }

        Ok(AttemptResult {
            flags,
            last_error: report.last_error,
        })
    }

    fn execute_options(&self, kind: DownloadKind, plan: &AttemptPlan) -> ExecuteOptions {
        let engine = &self.config.engine;
        let template = self.config.output_dir.join(OUTPUT_TEMPLATE);

        let mut options = ExecuteOptions::new(plan.format.as_str(), template.to_string_lossy());
        options.socket_timeout = engine.socket_timeout;
        options.retries = engine.retries;
        options.fragment_retries = engine.fragment_retries;
        options.max_filesize = engine.max_filesize(kind).map(str::to_string);
        options.extract_audio = plan.extract_audio.then(|| AudioExtraction {
            codec: AUDIO_TARGET_CODEC.to_string(),
            quality: AUDIO_TARGET_QUALITY.to_string(),
        });
        options.merge_output =
            FormatSelector::needs_merge(&plan.format).then(|| MERGE_CONTAINER.to_string());
        options.cookies = engine.existing_cookies().cloned();
        options.proxy = engine.proxy.clone();
        options.user_agent = engine.user_agent.clone();
        options.referer = engine.referer.clone();
        options.clear_cache = engine.clear_cache;
        options.no_check_certificate = engine.no_check_certificate;
        options
    }

    fn discover(&self, sets: &[&[&str]], window: std::time::Duration) -> Option<PathBuf> {
        let dir = &self.config.output_dir;
        sets.iter()
            .find_map(|extensions| self.storage.newest_matching(dir, extensions, window))
    }

    fn complete(&self, path: &Path, tx: &OutcomeSender) {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = self.storage.file_size(path).unwrap_or(0);
        info!(file = %file_name, size = %format_size(size), "Download complete");

        tx.send(DownloadOutcome::InProgress {
            percent: 100,
            status: "Download complete".to_string(),
        });
        tx.send(DownloadOutcome::Completed {
            path: path.to_path_buf(),
            file_name,
        });
    }
}

/// React to diagnostics in one engine line
fn observe_line(flags: &AttemptFlags, token: &CancellationToken, line: &str) {
    let Some(signal) = classify_line(line) else {
        return;
    };

    match signal {
        LineSignal::FormatUnavailable => {
            if !flags.format_unavailable.swap(true, Ordering::SeqCst) {
                warn!("Requested format not available, stopping attempt");
            }
            token.cancel();
        }
        s if s.is_permanent() => {
            error!(reason = s.description(), "Content cannot be downloaded");
            if let Ok(mut permanent) = flags.permanent.lock() {
                *permanent = Some(s);
            }
            token.cancel();
        }
        s => warn!(reason = s.description(), line = line.trim(), "Engine reported a problem"),
    }
}

fn video_plans(primary: String) -> Vec<AttemptPlan> {
    let mut plans = vec![AttemptPlan {
        format: primary,
        extract_audio: false,
        extensions: &[VIDEO_EXTENSIONS],
    }];
    for format in FormatSelector::video_fallbacks() {
        if plans.iter().all(|p| p.format != *format) {
            plans.push(AttemptPlan {
                format: format.to_string(),
                extract_audio: false,
                extensions: &[VIDEO_EXTENSIONS],
            });
        }
    }
    plans
}

fn audio_plans(transcoder_available: bool) -> Vec<AttemptPlan> {
    let native = AttemptPlan {
        format: AUDIO_NATIVE.to_string(),
        extract_audio: false,
        extensions: &[NATIVE_AUDIO_EXTENSIONS],
    };
    if !transcoder_available {
        return vec![native];
    }
    vec![
        AttemptPlan {
            format: FormatSelector::audio_selector(true).to_string(),
            extract_audio: true,
            extensions: &[MP3_EXTENSIONS, AUDIO_EXTENSIONS],
        },
        native,
    ]
}
