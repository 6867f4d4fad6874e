use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use futures::StreamExt;

use ytmp3_core::format_selector::{
    AUDIO_NATIVE, GENERIC_FALLBACK, MERGE_FALLBACK, VIDEO_FALLBACK_LADDER,
};
use ytmp3_core::{
    CrashPolicy, DownloadError, DownloadOutcome, DownloadRequest, EngineBinding,
    EngineCapabilities, EngineReadiness, ErrorKind, ExecuteOptions, ExecutionReport,
    LocalStorage, MediaMetadata, MediaStorage, Orchestrator, OrchestratorConfig, ProbeOptions,
    ProgressEmitter, StreamVariant,
};

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[derive(Debug, Clone)]
enum Attempt {
    /// Report progress to 100% and write the named file
    Write(&'static str),
    /// Report 100% without producing a file
    CompleteWithoutFile,
    /// Print the format rejection line and wait to be stopped
    FormatUnavailable,
    /// Block until cancelled
    Hang,
    /// Engine-level failure
    Crash,
    /// Print a destination line carrying the given title, then write it
    Titled(&'static str),
    /// Reject the URL before doing any work
    RejectUrl,
}

struct FakeEngine {
    dir: PathBuf,
    transcoder: bool,
    fail_init: bool,
    metadata: Option<MediaMetadata>,
    delay: Duration,
    script: Mutex<VecDeque<Attempt>>,
    init_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    executed: Mutex<Vec<ExecuteOptions>>,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl FakeEngine {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            transcoder: true,
            fail_init: false,
            metadata: Some(metadata(vec![progressive("37", 1080), progressive("22", 720)])),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            init_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            spans: Mutex::new(Vec::new()),
        }
    }

    fn with_script(self, attempts: &[Attempt]) -> Self {
        *self.script.lock().unwrap() = attempts.iter().cloned().collect();
        self
    }

    fn without_transcoder(mut self) -> Self {
        self.transcoder = false;
        self
    }

    fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn failing_probe(mut self) -> Self {
        self.metadata = None;
        self
    }

    fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn engine_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
            + self.probe_calls.load(Ordering::SeqCst)
            + self.execute_calls.load(Ordering::SeqCst)
    }

    fn formats(&self) -> Vec<String> {
        self.executed.lock().unwrap().iter().map(|o| o.format.clone()).collect()
    }
}

#[async_trait]
impl EngineBinding for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn initialize(&self) -> Result<EngineCapabilities, DownloadError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(DownloadError::ToolNotFound("yt-dlp".to_string()));
        }
        Ok(EngineCapabilities {
            transcoder_available: self.transcoder,
        })
    }

    async fn probe(&self, _url: &str, _options: &ProbeOptions) -> Result<MediaMetadata, DownloadError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .clone()
            .ok_or_else(|| DownloadError::Unknown("probe exploded".to_string()))
    }

    async fn execute(
        &self,
        _url: &str,
        options: &ExecuteOptions,
        progress: ProgressEmitter,
    ) -> Result<ExecutionReport, DownloadError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(options.clone());
        let start = Instant::now();
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Write("video.mp4"));

        let report = match attempt {
            Attempt::Write(name) => {
                progress.emit(0.0, 10, "[download]   0.0% of 10.00MiB at 1.00MiB/s ETA 00:10");
                tokio::time::sleep(self.delay).await;
                progress.emit(150.0, 5, "[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05");
                progress.emit(100.0, 0, "[download] 100% of 10.00MiB");
                std::fs::write(self.dir.join(name), b"media")?;
                ExecutionReport::success()
            }
            Attempt::CompleteWithoutFile => {
                progress.emit(100.0, 0, "[download] 100% of 10.00MiB");
                ExecutionReport::success()
            }
            Attempt::FormatUnavailable => {
                progress.emit(0.0, -1, "ERROR: [youtube] dQw4w9WgXcQ: Requested format is not available");
                let _ = tokio::time::timeout(Duration::from_secs(2), progress.cancelled()).await;
                ExecutionReport::failed(1, "Requested format is not available")
            }
            Attempt::Hang => {
                progress.cancelled().await;
                ExecutionReport {
                    exit_code: None,
                    last_error: None,
                }
            }
            Attempt::Crash => {
                return Err(DownloadError::ExecutionError("engine crashed".to_string()));
            }
            Attempt::Titled(title) => {
                let file = self.dir.join(format!("{}.mp4", title));
                progress.emit(0.0, -1, &format!("[download] Destination: {}", file.display()));
                progress.emit(100.0, 0, "[download] 100% of 10.00MiB");
                std::fs::write(&file, b"media")?;
                ExecutionReport::success()
            }
            Attempt::RejectUrl => {
                return Err(DownloadError::InvalidUrl("unsupported by engine".to_string()));
            }
        };

        self.spans.lock().unwrap().push((start, Instant::now()));
        Ok(report)
    }
}

/// Local filesystem with a fixed free-space answer
struct FakeStorage {
    free: Option<u64>,
}

impl MediaStorage for FakeStorage {
    fn ensure_dir(&self, dir: &Path) -> io::Result<()> {
        LocalStorage.ensure_dir(dir)
    }

    fn available_space(&self, _dir: &Path) -> Option<u64> {
        self.free
    }

    fn newest_matching(&self, dir: &Path, extensions: &[&str], window: Duration) -> Option<PathBuf> {
        LocalStorage.newest_matching(dir, extensions, window)
    }

    fn file_size(&self, path: &Path) -> Option<u64> {
        LocalStorage.file_size(path)
    }
}

fn progressive(id: &str, height: u32) -> StreamVariant {
    StreamVariant::new(id, "mp4", Some(height), None, Some("mp4a.40.2"), Some("avc1.64001F"))
}

fn metadata(variants: Vec<StreamVariant>) -> MediaMetadata {
    MediaMetadata {
        id: "dQw4w9WgXcQ".to_string(),
        title: "Sample".to_string(),
        duration_seconds: 212,
        thumbnail: String::new(),
        uploader: "Someone".to_string(),
        variants,
    }
}

fn config(dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_output_dir(dir)
        .with_progress_interval(Duration::ZERO)
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2), Duration::from_secs(5))
}

fn build(engine: &Arc<FakeEngine>, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::with_state(
        engine.clone(),
        Arc::new(FakeStorage { free: Some(u64::MAX) }),
        Arc::new(EngineReadiness::new()),
        config,
    )
}

fn assert_well_formed(outcomes: &[DownloadOutcome]) {
    assert!(matches!(
        outcomes.first(),
        Some(DownloadOutcome::Initializing) | Some(DownloadOutcome::Probing(_))
    ));
    assert_eq!(outcomes.iter().filter(|o| o.is_terminal()).count(), 1);
    assert!(outcomes.last().is_some_and(DownloadOutcome::is_terminal));
    assert!(outcomes.iter().filter_map(DownloadOutcome::percent).all(|p| p <= 100));
}

fn failure_message(outcomes: &[DownloadOutcome]) -> String {
    match outcomes.last() {
        Some(DownloadOutcome::Failed(message)) => message.clone(),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_url_never_reaches_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator
        .download(DownloadRequest::video("https://vimeo.com/12345"))
        .collect_all()
        .await;
    assert_well_formed(&outcomes);
    assert_eq!(outcomes.len(), 2);
    assert!(failure_message(&outcomes).contains("Invalid YouTube URL"));

    let err = orchestrator.probe("not a url").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(engine.engine_calls(), 0);
}

#[tokio::test]
async fn test_video_uses_best_progressive_once() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::Write("Sample.mp4")]));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(outcomes.contains(&DownloadOutcome::Probing("Fetching video info...".to_string())));

    match outcomes.last() {
        Some(DownloadOutcome::Completed { path, file_name }) => {
            assert_eq!(file_name, "Sample.mp4");
            assert_eq!(path, &tmp.path().join("Sample.mp4"));
        }
        other => panic!("expected completion, got {:?}", other),
    }

    assert_eq!(engine.formats(), vec!["37".to_string()]);
    let options = engine.executed.lock().unwrap()[0].clone();
    assert_eq!(options.merge_output, None);
    assert_eq!(options.max_filesize.as_deref(), Some("500M"));
    assert!(options.output_template.ends_with("%(title)s.%(ext)s"));

    // engine percent above 100 is clamped and remapped above the floor
    let engine_phase: Vec<u8> = outcomes
        .iter()
        .filter_map(DownloadOutcome::percent)
        .skip_while(|p| *p < 20)
        .collect();
    assert!(engine_phase.iter().all(|p| (20..=100).contains(p)));
    assert_eq!(engine_phase.last(), Some(&100));
}

#[tokio::test]
async fn test_quality_hint_caps_height() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcome = orchestrator
        .download(DownloadRequest::video(URL).with_quality("720p"))
        .finish()
        .await;
    assert!(matches!(outcome, Some(DownloadOutcome::Completed { .. })));
    assert_eq!(engine.formats(), vec!["22".to_string()]);
}

#[tokio::test]
async fn test_probe_failure_fails_download_and_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).failing_probe());
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(failure_message(&outcomes).contains("probe exploded"));
    assert!(orchestrator.session().failure_count() >= 1);
    assert!(!orchestrator.session().is_ready());
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_failure_can_fall_back_to_generic_selector() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).failing_probe());
    let orchestrator = build(&engine, config(tmp.path()).with_probe_failure_fatal(false));

    let outcome = orchestrator.download(DownloadRequest::video(URL)).finish().await;
    assert!(matches!(outcome, Some(DownloadOutcome::Completed { .. })));
    assert_eq!(engine.formats(), vec![GENERIC_FALLBACK.to_string()]);
    assert_eq!(orchestrator.session().failure_count(), 1);
}

#[tokio::test]
async fn test_low_space_fails_before_execute() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = Orchestrator::with_state(
        engine.clone(),
        Arc::new(FakeStorage { free: Some(10 * 1024 * 1024) }),
        Arc::new(EngineReadiness::new()),
        config(tmp.path()),
    );

    let outcomes = orchestrator.download(DownloadRequest::audio(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(failure_message(&outcomes).contains("Not enough storage space"));
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.probe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.session().failure_count(), 0);
}

#[tokio::test]
async fn test_unknown_free_space_proceeds() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = Orchestrator::with_state(
        engine.clone(),
        Arc::new(FakeStorage { free: None }),
        Arc::new(EngineReadiness::new()),
        config(tmp.path()),
    );

    let outcome = orchestrator.download(DownloadRequest::video(URL)).finish().await;
    assert!(matches!(outcome, Some(DownloadOutcome::Completed { .. })));
}

#[tokio::test]
async fn test_format_rejection_walks_fallback_ladder() {
    let tmp = tempfile::tempdir().unwrap();
    let audio_only = StreamVariant::new("140", "m4a", None, Some(128.0), Some("mp4a.40.2"), Some("none"));
    let engine = Arc::new(
        FakeEngine::new(tmp.path())
            .with_metadata(metadata(vec![audio_only]))
            .with_script(&[Attempt::FormatUnavailable, Attempt::Write("Sample.mp4")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(matches!(outcomes.last(), Some(DownloadOutcome::Completed { .. })));

    assert_eq!(
        engine.formats(),
        vec![MERGE_FALLBACK.to_string(), VIDEO_FALLBACK_LADDER[0].to_string()]
    );
    let executed = engine.executed.lock().unwrap();
    assert_eq!(executed[0].merge_output.as_deref(), Some("mp4"));
    assert_eq!(orchestrator.session().failure_count(), 0);
}

#[tokio::test]
async fn test_format_rejection_ignores_stale_files() {
    let tmp = tempfile::tempdir().unwrap();
    let stale = tmp.path().join("Earlier Download.mp4");
    std::fs::write(&stale, b"old").unwrap();
    let minute_ago = filetime::FileTime::from_system_time(SystemTime::now() - Duration::from_secs(60));
    filetime::set_file_mtime(&stale, minute_ago).unwrap();

    let engine = Arc::new(
        FakeEngine::new(tmp.path())
            .with_script(&[Attempt::FormatUnavailable, Attempt::Write("Sample.mp4")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    match outcomes.last() {
        Some(DownloadOutcome::Completed { file_name, .. }) => assert_eq!(file_name, "Sample.mp4"),
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_title_words_do_not_stop_download() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeEngine::new(tmp.path()).with_script(&[Attempt::Titled("My Private Video Collection")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    match outcomes.last() {
        Some(DownloadOutcome::Completed { file_name, .. }) => {
            assert_eq!(file_name, "My Private Video Collection.mp4")
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completion_without_file_skips_ladder() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::CompleteWithoutFile]));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(failure_message(&outcomes).contains("not found"));
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 1);
    // discovery gaps are not crashes by default
    assert_eq!(orchestrator.session().failure_count(), 0);
}

#[tokio::test]
async fn test_discovery_failures_can_be_counted() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::CompleteWithoutFile]));
    let policy = CrashPolicy::default().with_discovery_failures_counted(true);
    let orchestrator = build(&engine, config(tmp.path()).with_crash_policy(policy));

    let outcome = orchestrator.download(DownloadRequest::video(URL)).finish().await;
    assert!(matches!(outcome, Some(DownloadOutcome::Failed(_))));
    assert_eq!(orchestrator.session().failure_count(), 1);
}

#[tokio::test]
async fn test_engine_crash_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::Crash]));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert!(failure_message(&outcomes).contains("engine crashed"));
    assert_eq!(engine.execute_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.session().failure_count(), 1);
    assert!(orchestrator.status().contains("Last failure:"));
}

#[tokio::test]
async fn test_input_errors_from_engine_are_not_counted() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::RejectUrl]));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(failure_message(&outcomes).contains("unsupported by engine"));
    assert_eq!(orchestrator.session().failure_count(), 0);
}

#[tokio::test]
async fn test_audio_without_transcoder_keeps_native_container() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeEngine::new(tmp.path())
            .without_transcoder()
            .with_script(&[Attempt::Write("Sample.m4a")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let outcome = orchestrator.download(DownloadRequest::audio(URL)).finish().await;
    match outcome {
        Some(DownloadOutcome::Completed { file_name, .. }) => assert_eq!(file_name, "Sample.m4a"),
        other => panic!("expected completion, got {:?}", other),
    }

    assert_eq!(engine.formats(), vec![AUDIO_NATIVE.to_string()]);
    assert_eq!(engine.executed.lock().unwrap()[0].extract_audio, None);
    assert_eq!(engine.probe_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_audio_with_transcoder_extracts_mp3() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::Write("Sample.mp3")]));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcome = orchestrator.download(DownloadRequest::audio(URL)).finish().await;
    assert!(matches!(outcome, Some(DownloadOutcome::Completed { .. })));

    let options = engine.executed.lock().unwrap()[0].clone();
    let extraction = options.extract_audio.expect("audio extraction");
    assert_eq!(extraction.codec, "mp3");
    assert_eq!(extraction.quality, "0");
    assert_eq!(options.max_filesize.as_deref(), Some("100M"));
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = build(&engine, config(tmp.path()));

    orchestrator.initialize().await.unwrap();
    orchestrator.initialize().await.unwrap();
    assert_eq!(engine.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.status(), "Initialized: true, Failures: 0");
}

#[tokio::test]
async fn test_probe_requires_initialize() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = build(&engine, config(tmp.path()));

    let err = orchestrator.probe(URL).await.unwrap_err();
    assert!(matches!(err, DownloadError::NotInitialized));

    orchestrator.initialize().await.unwrap();
    let info = orchestrator.probe(URL).await.unwrap();
    assert_eq!(info.variants.len(), 2);
}

#[tokio::test]
async fn test_cooldown_refuses_without_engine_call() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).failing_init());
    let orchestrator = build(&engine, config(tmp.path()));

    assert!(orchestrator.initialize().await.is_err());
    let err = orchestrator.initialize().await.unwrap_err();
    assert!(matches!(err, DownloadError::Cooldown { .. }));
    assert_eq!(err.kind(), ErrorKind::Readiness);
    assert_eq!(engine.init_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recovery_mode_and_reset() {
    let tmp = tempfile::tempdir().unwrap();
    let readiness = Arc::new(EngineReadiness::new());

    // no cooldown so every call reaches the broken engine
    let broken = Arc::new(FakeEngine::new(tmp.path()).failing_init());
    let flaky = Orchestrator::with_state(
        broken.clone(),
        Arc::new(FakeStorage { free: Some(u64::MAX) }),
        readiness.clone(),
        config(tmp.path()).with_crash_policy(CrashPolicy::default().with_cooldown(Duration::ZERO)),
    );
    for _ in 0..3 {
        assert!(flaky.initialize().await.is_err());
    }
    assert_eq!(broken.init_calls.load(Ordering::SeqCst), 3);

    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = Orchestrator::with_state(
        engine.clone(),
        Arc::new(FakeStorage { free: Some(u64::MAX) }),
        readiness.clone(),
        config(tmp.path()),
    );

    let err = orchestrator.initialize().await.unwrap_err();
    assert!(matches!(err, DownloadError::Recovery { failures: 3 }));
    assert_eq!(orchestrator.probe(URL).await.unwrap_err().kind(), ErrorKind::Readiness);
    let outcomes = orchestrator.download(DownloadRequest::video(URL)).collect_all().await;
    assert_well_formed(&outcomes);
    assert!(failure_message(&outcomes).contains("recovery mode"));
    assert_eq!(engine.engine_calls(), 0);

    orchestrator.reset_failures();
    assert_eq!(orchestrator.session().failure_count(), 0);
    assert!(orchestrator.session().last_failure().is_none());
    orchestrator.initialize().await.unwrap();
    assert!(orchestrator.session().is_ready());
}

#[tokio::test]
async fn test_disabled_policy_never_gates() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).failing_init());
    let orchestrator = build(&engine, config(tmp.path()).with_crash_policy(CrashPolicy::disabled()));

    for _ in 0..4 {
        let err = orchestrator.initialize().await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
    assert_eq!(engine.init_calls.load(Ordering::SeqCst), 4);
    assert_eq!(orchestrator.session().failure_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_downloads_are_serialized() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeEngine::new(tmp.path())
            .with_delay(Duration::from_millis(150))
            .with_script(&[Attempt::Write("first.mp4"), Attempt::Write("second.mp4")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let first = orchestrator.download(DownloadRequest::video(URL));
    let second = orchestrator.download(DownloadRequest::video(URL));
    let (a, b) = tokio::join!(first.finish(), second.finish());
    assert!(matches!(a, Some(DownloadOutcome::Completed { .. })));
    assert!(matches!(b, Some(DownloadOutcome::Completed { .. })));

    let mut spans = engine.spans.lock().unwrap().clone();
    assert_eq!(spans.len(), 2);
    spans.sort_by_key(|(start, _)| *start);
    assert!(spans[1].0 >= spans[0].1);
}

#[tokio::test]
async fn test_cancel_releases_download_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeEngine::new(tmp.path()).with_script(&[Attempt::Hang, Attempt::Write("after.mp4")]),
    );
    let orchestrator = build(&engine, config(tmp.path()));

    let stuck = orchestrator.download(DownloadRequest::video(URL));
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.execute_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first attempt started");
    stuck.cancel_and_wait().await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.download(DownloadRequest::video(URL)).finish(),
    )
    .await
    .expect("slot released");
    match outcome {
        Some(DownloadOutcome::Completed { file_name, .. }) => assert_eq!(file_name, "after.mp4"),
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(orchestrator.session().failure_count(), 0);
}

#[tokio::test]
async fn test_cancelled_stream_reports_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()).with_script(&[Attempt::Hang]));
    let orchestrator = build(&engine, config(tmp.path()));

    let mut stream = orchestrator.download(DownloadRequest::video(URL));
    let mut seen = Vec::new();
    while let Some(outcome) = stream.next().await {
        if outcome == (DownloadOutcome::InProgress { percent: 20, status: "Starting download...".to_string() }) {
            stream.cancel();
        }
        seen.push(outcome);
    }
    assert_well_formed(&seen);
    assert_eq!(failure_message(&seen), "Download cancelled");
}

#[tokio::test]
async fn test_stream_trait_yields_ordered_outcomes() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new(tmp.path()));
    let orchestrator = build(&engine, config(tmp.path()));

    let outcomes: Vec<_> = orchestrator.download(DownloadRequest::video(URL)).collect().await;
    assert_well_formed(&outcomes);
    assert_eq!(
        outcomes[1],
        DownloadOutcome::InProgress { percent: 5, status: "Initializing...".to_string() }
    );
    let complete = outcomes.len() - 2;
    assert_eq!(
        outcomes[complete],
        DownloadOutcome::InProgress { percent: 100, status: "Download complete".to_string() }
    );
}
