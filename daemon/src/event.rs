use loopwall_shared::config::Config;

use crate::supervisor::SupervisorStatus;

pub enum DaemonEvent {
    /// The settings file changed on disk and was successfully re-parsed.
    SettingsChanged(Config),
    /// The renderer emitted `isPlayingChanged`.
    PlayingChanged(bool),
    /// Result of reading `isPlaying` right after subscribing to a new renderer.
    InitialPoll(bool),
    /// The supervisor published a new status (launch, exit, pending restart).
    Renderer(SupervisorStatus),
    /// The rotation timer fired; advance to the next wallpaper video.
    RotationTick,
    /// Ctrl+C or SIGTERM received; stop the renderer and exit.
    Shutdown,
}
