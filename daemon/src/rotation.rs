use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use loopwall_shared::config::{AutoChangeConfig, ChangeMode};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::DaemonEvent;

/// File extensions treated as wallpaper videos.
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "m4v", "webm", "mkv", "mov", "avi", "ogv", "wmv"];

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// Video files directly inside `dir`, sorted by path.
pub fn list_videos(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_video(&path) {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// Index that follows `current` in a list of `len` videos.
/// Random never repeats the current entry unless it is the only one.
pub fn next_index<R: Rng + ?Sized>(current: usize, len: usize, mode: ChangeMode, rng: &mut R) -> usize {
    if len == 0 {
        return 0;
    }
    match mode {
        ChangeMode::Sequential => (current + 1) % len,
        ChangeMode::Reverse => (current + len - 1) % len,
        ChangeMode::Random => {
            if len == 1 {
                return current;
            }
            // Draw from the other len-1 slots and skip over `current`.
            let pick = rng.random_range(0..len - 1);
            if pick >= current {
                pick + 1
            } else {
                pick
            }
        }
    }
}

/// Playlist state for automatic wallpaper changes.
#[derive(Debug)]
pub struct Rotation {
    videos: Vec<PathBuf>,
    index: usize,
    mode: ChangeMode,
}

impl Rotation {
    /// `None` when rotation is disabled or there is nothing to rotate through.
    pub fn from_config(config: &AutoChangeConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let dir = Path::new(config.directory.trim());
        if !dir.is_dir() {
            warn!("[rotation] Not a directory: {}", dir.display());
            return None;
        }
        let videos = match list_videos(dir) {
            Ok(videos) => videos,
            Err(e) => {
                warn!("[rotation] Failed to list {}: {e}", dir.display());
                return None;
            }
        };
        if videos.is_empty() {
            info!("[rotation] No videos in {}", dir.display());
            return None;
        }
        debug!("[rotation] {} videos in {}", videos.len(), dir.display());
        Some(Self { videos, index: 0, mode: config.mode })
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    /// Returns the video to show now and moves on to the next one.
    pub fn advance(&mut self) -> PathBuf {
        let video = self.videos[self.index].clone();
        self.index = next_index(self.index, self.videos.len(), self.mode, &mut rand::rng());
        video
    }
}

/// Sends [`DaemonEvent::RotationTick`] right away and then every `interval`.
/// Abort the returned handle to stop.
pub fn spawn_ticker(interval: Duration, tx: mpsc::Sender<DaemonEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if tx.send(DaemonEvent::RotationTick).await.is_err() {
                break;
            }
        }
    })
}
