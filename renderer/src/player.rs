//! Playback state of the renderer.
//!
//! Decoding and presentation belong to the media pipeline; this type is the
//! authority for what the pipeline should be doing (which file, playing or
//! paused, volume, fit) and the single source of `isPlaying` for the bus.
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use loopwall_shared::config::{ContentFit, RendererConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Decoder and sink preferences. Read once at startup; changing them
/// requires a new renderer process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderPreferences {
    pub enable_va: bool,
    pub enable_nvsl: bool,
    pub force_media_file: bool,
    pub force_gtk4_paintable_sink: bool,
}

impl DecoderPreferences {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            enable_va: config.enable_va,
            enable_nvsl: config.enable_nvsl,
            force_media_file: config.force_media_file,
            force_gtk4_paintable_sink: config.force_gtk4_paintable_sink,
        }
    }

    /// Human-readable summary for the startup log, e.g. `va, nvsl`.
    pub fn describe(&self) -> String {
        let enabled: Vec<&str> = [
            (self.enable_va, "va"),
            (self.enable_nvsl, "nvsl"),
            (self.force_media_file, "media-file"),
            (self.force_gtk4_paintable_sink, "gtk4-paintable-sink"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        if enabled.is_empty() {
            "defaults".to_string()
        } else {
            enabled.join(", ")
        }
    }
}

pub struct Player {
    video: Option<PathBuf>,
    volume: f64,
    mute: bool,
    content_fit: ContentFit,
    decoders: DecoderPreferences,
    playing: watch::Sender<bool>,
}

impl Player {
    /// A paused player with nothing loaded.
    pub fn new(volume: f64, mute: bool, content_fit: ContentFit, decoders: DecoderPreferences) -> Self {
        let (playing, _) = watch::channel(false);
        info!("Decoders: {}", decoders.describe());
        Self {
            video: None,
            volume: volume.clamp(0.0, 1.0),
            mute,
            content_fit,
            decoders,
            playing,
        }
    }

    /// Observes `isPlaying`. Every notification is one `isPlayingChanged`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn video(&self) -> Option<&Path> {
        self.video.as_deref()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn content_fit(&self) -> ContentFit {
        self.content_fit
    }

    pub fn decoders(&self) -> DecoderPreferences {
        self.decoders
    }

    /// Selects `path` without touching the playing state. Used at startup,
    /// before anyone is listening for `isPlayingChanged`.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            bail!("video not found: {}", path.display());
        }
        info!("Loaded {}", path.display());
        self.video = Some(path.to_path_buf());
        Ok(())
    }

    /// Switches to `path` and plays it. Always announced as a fresh
    /// "playing", also when playback was already running on another file.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        self.load(path)?;
        self.playing.send_replace(true);
        debug!("Playing");
        Ok(())
    }

    /// Starts playback. Returns `false` when there is nothing to play.
    pub fn play(&mut self) -> bool {
        if self.video.is_none() {
            warn!("Play requested with no video loaded");
            return false;
        }
        if self.playing.send_if_modified(|playing| !std::mem::replace(playing, true)) {
            debug!("Playing");
        }
        true
    }

    pub fn pause(&mut self) {
        if self.playing.send_if_modified(|playing| std::mem::replace(playing, false)) {
            debug!("Paused");
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        debug!("Volume {:.2}", self.volume);
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
        debug!("Mute {mute}");
    }

    pub fn set_content_fit(&mut self, fit: ContentFit) {
        self.content_fit = fit;
        debug!("Content fit {fit:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(0.5, false, ContentFit::default(), DecoderPreferences::default())
    }

    fn video_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[test]
    fn starts_paused_and_empty() {
        let p = player();
        assert!(!p.is_playing());
        assert!(p.video().is_none());
    }

    #[test]
    fn play_needs_a_video() {
        let mut p = player();
        assert!(!p.play());
        assert!(!p.is_playing());
    }

    #[test]
    fn load_rejects_missing_files() {
        let mut p = player();
        assert!(p.load(Path::new("/nonexistent/video.mp4")).is_err());
        assert!(p.video().is_none());
    }

    #[test]
    fn play_and_pause_notify_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = player();
        p.load(&video_file(dir.path(), "a.mp4")).unwrap();
        let mut rx = p.subscribe();

        assert!(p.play());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        p.play();
        assert!(!rx.has_changed().unwrap());

        p.pause();
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());

        p.pause();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn opening_while_playing_announces_playing_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = player();
        p.load(&video_file(dir.path(), "a.mp4")).unwrap();
        p.play();
        let mut rx = p.subscribe();
        rx.borrow_and_update();

        p.open(&video_file(dir.path(), "b.mp4")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert_eq!(p.video().unwrap().file_name().unwrap(), "b.mp4");
    }

    #[test]
    fn opening_on_an_idle_player_starts_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = player();
        let mut rx = p.subscribe();

        p.open(&video_file(dir.path(), "a.mp4")).unwrap();
        assert!(p.is_playing());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn opening_a_missing_file_keeps_the_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = player();
        p.load(&video_file(dir.path(), "a.mp4")).unwrap();
        let mut rx = p.subscribe();

        assert!(p.open(Path::new("/nonexistent/b.mp4")).is_err());
        assert!(!p.is_playing());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(p.video().unwrap().file_name().unwrap(), "a.mp4");
    }

    #[test]
    fn loading_stays_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = player();
        let mut rx = p.subscribe();
        p.load(&video_file(dir.path(), "a.mp4")).unwrap();
        assert!(!rx.has_changed().unwrap());
        assert!(!p.is_playing());
    }

    #[test]
    fn volume_is_clamped() {
        let mut p = player();
        p.set_volume(3.0);
        assert_eq!(p.volume(), 1.0);
        p.set_volume(-1.0);
        assert_eq!(p.volume(), 0.0);
    }

    #[test]
    fn decoder_summary_lists_enabled_preferences() {
        assert_eq!(DecoderPreferences::default().describe(), "defaults");
        let prefs = DecoderPreferences { enable_va: true, force_media_file: true, ..Default::default() };
        assert_eq!(prefs.describe(), "va, media-file");
    }
}
