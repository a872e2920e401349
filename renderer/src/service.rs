//! Bus-facing side of the renderer.
//!
//! [`RendererService`] is exported at [`OBJECT_PATH`] under [`BUS_NAME`] and
//! mirrors the proxy in `loopwall_shared::bus`. `isPlayingChanged` (and the
//! matching `PropertiesChanged`) are emitted from one place only: a task
//! following the player's playing state.
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use loopwall_shared::bus::{BUS_NAME, OBJECT_PATH};
use loopwall_shared::config::ContentFit;
use tokio::sync::watch;
use tracing::{debug, warn};
use zbus::object_server::{InterfaceRef, SignalEmitter};
use zbus::{connection, fdo, interface, Connection};

use crate::capture;
use crate::player::Player;

/// Every bus method borrows the service shared, so a long capture never
/// holds off the setters. The player lock is only held between awaits.
pub struct RendererService {
    player: Mutex<Player>,
}

impl RendererService {
    pub fn new(player: Player) -> Self {
        Self { player: Mutex::new(player) }
    }

    fn player(&self) -> MutexGuard<'_, Player> {
        self.player.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[interface(name = "io.github.loopwall.Renderer")]
impl RendererService {
    #[zbus(name = "setPlay")]
    fn set_play(&self) {
        self.player().play();
    }

    #[zbus(name = "setPause")]
    fn set_pause(&self) {
        self.player().pause();
    }

    /// Completes once the frame is on disk; failures come back as a D-Bus error.
    #[zbus(name = "takeVideoFrameSnapshot")]
    async fn take_video_frame_snapshot(&self, path: String) -> fdo::Result<()> {
        let video = self
            .player()
            .video()
            .map(Path::to_path_buf)
            .ok_or_else(|| fdo::Error::Failed("no video loaded".to_string()))?;
        capture::capture_frame_logged(&video, Path::new(&path))
            .await
            .map_err(|e| fdo::Error::Failed(format!("{e:#}")))
    }

    #[zbus(name = "setVolume")]
    fn set_volume(&self, volume: f64) {
        self.player().set_volume(volume);
    }

    #[zbus(name = "setMute")]
    fn set_mute(&self, mute: bool) {
        self.player().set_mute(mute);
    }

    #[zbus(name = "setVideoPath")]
    fn set_video_path(&self, path: String) -> fdo::Result<()> {
        self.player()
            .open(Path::new(&path))
            .map_err(|e| fdo::Error::FileNotFound(format!("{e:#}")))
    }

    #[zbus(name = "setContentFit")]
    fn set_content_fit(&self, fit: u32) -> fdo::Result<()> {
        let fit = ContentFit::from_code(fit)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown content fit {fit}")))?;
        self.player().set_content_fit(fit);
        Ok(())
    }

    #[zbus(property, name = "isPlaying")]
    fn is_playing(&self) -> bool {
        self.player().is_playing()
    }

    #[zbus(signal, name = "isPlayingChanged")]
    async fn playing_changed(emitter: &SignalEmitter<'_>, is_playing: bool) -> zbus::Result<()>;
}

/// Emits `isPlayingChanged` and `PropertiesChanged` for every playing-state
/// notification of the player.
async fn forward_playing(mut playing: watch::Receiver<bool>, iface: InterfaceRef<RendererService>) {
    while playing.changed().await.is_ok() {
        let is_playing = *playing.borrow_and_update();
        debug!("Emitting isPlayingChanged({is_playing})");
        let emitter = iface.signal_emitter();
        if let Err(e) = RendererService::playing_changed(emitter, is_playing).await {
            warn!("Failed to emit isPlayingChanged: {e}");
        }
        if let Err(e) = iface.get().await.is_playing_changed(emitter).await {
            warn!("Failed to emit PropertiesChanged: {e}");
        }
    }
}

/// Owns the well-known name on the session bus and exports the service.
pub async fn serve(player: Player) -> Result<Connection> {
    let playing = player.subscribe();
    let conn = connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RendererService::new(player))?
        .build()
        .await
        .with_context(|| format!("Failed to own {BUS_NAME} on the session bus"))?;

    let iface = conn
        .object_server()
        .interface::<_, RendererService>(OBJECT_PATH)
        .await
        .context("Service missing from the object server")?;
    tokio::spawn(forward_playing(playing, iface));
    Ok(conn)
}

/// Starts playback through the exported object so the change is announced.
pub async fn start_playback(conn: &Connection) -> Result<bool> {
    let iface = conn
        .object_server()
        .interface::<_, RendererService>(OBJECT_PATH)
        .await
        .context("Service missing from the object server")?;
    let started = iface.get().await.player().play();
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::DecoderPreferences;

    fn service() -> RendererService {
        RendererService::new(Player::new(0.5, false, ContentFit::default(), DecoderPreferences::default()))
    }

    #[test]
    fn content_fit_accepts_known_codes() {
        let s = service();
        s.set_content_fit(ContentFit::Cover.code()).unwrap();
        assert_eq!(s.player().content_fit(), ContentFit::Cover);
    }

    #[test]
    fn content_fit_rejects_unknown_codes() {
        let s = service();
        assert!(matches!(s.set_content_fit(42), Err(fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn missing_video_path_is_reported() {
        let s = service();
        assert!(matches!(
            s.set_video_path("/nonexistent/a.mp4".to_string()),
            Err(fdo::Error::FileNotFound(_))
        ));
    }

    #[test]
    fn play_and_pause_drive_the_property() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("a.mp4");
        std::fs::write(&video, b"x").unwrap();

        let s = service();
        s.set_video_path(video.to_string_lossy().into_owned()).unwrap();
        s.set_play();
        assert!(s.is_playing());
        s.set_pause();
        assert!(!s.is_playing());
    }

    #[test]
    fn volume_and_mute_reach_the_player() {
        let s = service();
        s.set_volume(0.25);
        s.set_mute(true);
        assert_eq!(s.player().volume(), 0.25);
        assert!(s.player().is_muted());
    }

    fn video_file(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn setting_a_video_on_an_idle_renderer_starts_playback() {
        let dir = tempfile::tempdir().unwrap();
        let s = service();
        let mut playing = s.player().subscribe();
        assert!(!s.is_playing());

        s.set_video_path(video_file(dir.path(), "a.mp4")).unwrap();
        assert!(s.is_playing());
        assert!(playing.has_changed().unwrap());
        assert!(*playing.borrow_and_update());
    }

    #[tokio::test]
    async fn setters_run_while_a_capture_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let still = dir.path().join("wallpaper.png");
        image::RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 255])).save(&still).unwrap();
        let target = dir.path().join("snapshot.png");

        let s = service();
        s.set_video_path(still.to_string_lossy().into_owned()).unwrap();

        let capture = s.take_video_frame_snapshot(target.to_string_lossy().into_owned());
        tokio::pin!(capture);
        tokio::select! {
            biased;
            _ = &mut capture => panic!("capture finished before the decode was scheduled"),
            _ = std::future::ready(()) => {}
        }

        s.set_pause();
        s.set_volume(0.1);
        assert!(!s.is_playing());

        capture.await.unwrap();
        assert!(target.exists());
        assert_eq!(s.player().volume(), 0.1);
    }

    #[tokio::test]
    async fn snapshot_without_video_fails() {
        let s = service();
        let result = s.take_video_frame_snapshot("/tmp/s.png".to_string()).await;
        assert!(matches!(result, Err(fdo::Error::Failed(_))));
    }
}
