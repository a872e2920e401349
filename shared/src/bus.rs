/// Session-bus contract between the daemon and the renderer.
///
/// The renderer owns [`BUS_NAME`] and serves the interface at [`OBJECT_PATH`];
/// the daemon talks to it through [`RendererProxy`]. The server side lives in
/// the renderer crate and must keep member names in sync with this trait.
use zbus::proxy;

pub const BUS_NAME: &str = "io.github.loopwall.Renderer";
pub const OBJECT_PATH: &str = "/io/github/loopwall/Renderer";
pub const INTERFACE_NAME: &str = "io.github.loopwall.Renderer";

/// Substring carried by renderer snapshot diagnostics. The daemon flushes
/// buffered renderer output as soon as a line containing it shows up.
pub const SNAPSHOT_LOG_MARKER: &str = "[snapshot]";

#[proxy(
    interface = "io.github.loopwall.Renderer",
    default_service = "io.github.loopwall.Renderer",
    default_path = "/io/github/loopwall/Renderer",
    gen_blocking = false
)]
pub trait Renderer {
    #[zbus(name = "setPlay")]
    fn set_play(&self) -> zbus::Result<()>;

    #[zbus(name = "setPause")]
    fn set_pause(&self) -> zbus::Result<()>;

    /// Captures the current video frame and writes the processed PNG to `path`.
    #[zbus(name = "takeVideoFrameSnapshot")]
    fn take_video_frame_snapshot(&self, path: &str) -> zbus::Result<()>;

    #[zbus(name = "setVolume")]
    fn set_volume(&self, volume: f64) -> zbus::Result<()>;

    #[zbus(name = "setMute")]
    fn set_mute(&self, mute: bool) -> zbus::Result<()>;

    #[zbus(name = "setVideoPath")]
    fn set_video_path(&self, path: &str) -> zbus::Result<()>;

    #[zbus(name = "setContentFit")]
    fn set_content_fit(&self, fit: u32) -> zbus::Result<()>;

    #[zbus(property, name = "isPlaying")]
    fn is_playing(&self) -> zbus::Result<bool>;

    #[zbus(signal, name = "isPlayingChanged")]
    fn playing_changed(&self, is_playing: bool) -> zbus::Result<()>;
}
