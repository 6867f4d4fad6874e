// Progress normalization and engine progress-line parsing

use std::time::{Duration, Instant};

use regex::Regex;

use super::models::{DownloadOutcome, EngineProgress};

/// Status shown when the engine line carries no text
const DEFAULT_STATUS: &str = "Downloading...";

/// Turns raw engine progress into bounded, throttled UI updates.
///
/// Engine percent (0-100) is remapped into `[floor, 100]` of the overall
/// request so that the init/probe phases own the first part of the bar.
#[derive(Debug)]
pub struct ProgressNormalizer {
    floor: u8,
    interval: Duration,
    max_status_len: usize,
    last_emit: Option<Instant>,
}

impl ProgressNormalizer {
    pub fn new(floor: u8, interval: Duration, max_status_len: usize) -> Self {
        Self {
            floor: floor.min(100),
            interval,
            max_status_len,
            last_emit: None,
        }
    }

    /// Normalize one engine update; `None` when throttled.
    pub fn normalize(&mut self, progress: &EngineProgress) -> Option<DownloadOutcome> {
        self.normalize_at(progress, Instant::now())
    }

    pub(crate) fn normalize_at(
        &mut self,
        progress: &EngineProgress,
        now: Instant,
    ) -> Option<DownloadOutcome> {
        let engine_percent = clamp_percent(progress.percent);
        let is_final = engine_percent >= 100.0;

        if !is_final {
            if let Some(last) = self.last_emit {
                if now.saturating_duration_since(last) < self.interval {
                    return None;
                }
            }
        }
        self.last_emit = Some(now);

        Some(DownloadOutcome::InProgress {
            percent: self.remap(engine_percent),
            status: self.status_text(&progress.line),
        })
    }

    /// Map engine 0..=100 into floor..=100
    pub fn remap(&self, engine_percent: f32) -> u8 {
        let floor = f32::from(self.floor);
        let overall = floor + clamp_percent(engine_percent) * (100.0 - floor) / 100.0;
        (overall as u8).clamp(self.floor, 100)
    }

    fn status_text(&self, line: &str) -> String {
        let line = line.trim();
        if line.is_empty() {
            return DEFAULT_STATUS.to_string();
        }
        line.chars().take(self.max_status_len).collect()
    }
}

/// Clamp to [0, 100]; NaN becomes 0
pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

lazy_static::lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%(?:\s+of\s+~?\s*\S+)?(?:\s+at\s+\S+)?(?:\s+ETA\s+(\S+))?"
    ).unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    static ref EXTRACT_RE: Regex = Regex::new(r"\[ExtractAudio\]").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

/// Parse a yt-dlp output line into (percent, eta seconds).
///
/// Post-processing lines (merge, audio extraction) report 99%.
pub fn parse_progress_line(line: &str) -> Option<(f32, i64)> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let eta = caps
            .get(2)
            .and_then(|m| parse_eta(m.as_str()))
            .unwrap_or(-1);
        return Some((percent, eta));
    }

    if MERGE_RE.is_match(line) || EXTRACT_RE.is_match(line) {
        return Some((99.0, -1));
    }

    if ALREADY_RE.is_match(line) {
        return Some((100.0, 0));
    }

    None
}

/// "11:59" or "1:02:03" into seconds
fn parse_eta(eta: &str) -> Option<i64> {
    eta.split(':').try_fold(0i64, |acc, part| {
        part.parse::<i64>().ok().map(|n| acc * 60 + n)
    })
}
