// Filesystem collaborator: directory prep, free space and output discovery

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sysinfo::Disks;
use tracing::{debug, warn};

/// Extensions accepted as a finished video
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "m4v", "3gp"];
/// Preferred audio result
pub const MP3_EXTENSIONS: &[&str] = &["mp3"];
/// Audio containers accepted when MP3 is missing
pub const AUDIO_EXTENSIONS: &[&str] = &["m4a", "opus", "webm", "m4b", "aac", "wav", "flac"];
/// Every audio container, used for the extended search
pub const ANY_AUDIO_EXTENSIONS: &[&str] =
    &["mp3", "m4a", "opus", "webm", "m4b", "aac", "wav", "flac"];
/// Native containers produced without a transcoder
pub const NATIVE_AUDIO_EXTENSIONS: &[&str] = &["m4a", "opus", "webm", "m4b", "aac"];

pub trait MediaStorage: Send + Sync {
    /// Create the directory (and parents) if missing
    fn ensure_dir(&self, dir: &Path) -> io::Result<()>;

    /// Free bytes on the volume holding `dir`; `None` when unknown
    fn available_space(&self, dir: &Path) -> Option<u64>;

    /// Most recently modified non-empty file in `dir` whose extension is in
    /// `extensions`, modified within `window` of now
    fn newest_matching(&self, dir: &Path, extensions: &[&str], window: Duration) -> Option<PathBuf>;

    /// Size of an existing regular file
    fn file_size(&self, path: &Path) -> Option<u64>;
}

/// Local disk implementation
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

impl MediaStorage for LocalStorage {
    fn ensure_dir(&self, dir: &Path) -> io::Result<()> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "Creating output directory");
        }
        fs::create_dir_all(dir)
    }

    fn available_space(&self, dir: &Path) -> Option<u64> {
        let path = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point that prefixes the path wins
        let available = disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space());

        if available.is_none() {
            warn!(dir = %dir.display(), "Could not determine free space");
        }
        available
    }

    fn newest_matching(&self, dir: &Path, extensions: &[&str], window: Duration) -> Option<PathBuf> {
        let cutoff = SystemTime::now().checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        let entries = fs::read_dir(dir).ok()?;

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                let meta = entry.metadata().ok()?;
                if !meta.is_file() || meta.len() == 0 {
                    return None;
                }
                let ext = path.extension()?.to_str()?.to_lowercase();
                if !extensions.contains(&ext.as_str()) {
                    return None;
                }
                let modified = meta.modified().ok()?;
                (modified >= cutoff).then_some((modified, path))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path)
    }

    fn file_size(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
    }
}
