use std::path::{Path, PathBuf};
use std::str::FromStr;

use loopwall_shared::args::{RendererArgs, WindowSize};
use loopwall_shared::config::{self, Config, SettingKey};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::event::DaemonEvent;
use crate::supervisor::LaunchSpec;

pub const RENDERER_BINARY_NAME: &str = "loopwall-renderer";

/// What the daemon has to do when a setting changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reaction {
    /// Push the new path to the renderer and restart snapshot tracking.
    ChangeVideo,
    PushMute,
    PushVolume,
    PushContentFit,
    /// The renderer only reads this at startup; replace it.
    Relaunch,
    ReconfigureLogging,
    RestartRotation,
    /// Read from the config when next needed; nothing to do now.
    Store,
}

impl Reaction {
    pub fn for_key(key: SettingKey) -> Self {
        match key {
            SettingKey::VideoPath => Reaction::ChangeVideo,
            SettingKey::Mute => Reaction::PushMute,
            SettingKey::Volume => Reaction::PushVolume,
            SettingKey::ContentFit => Reaction::PushContentFit,
            SettingKey::RendererExecutable
            | SettingKey::InstallPath
            | SettingKey::Windowed
            | SettingKey::NoHide
            | SettingKey::EnableVa
            | SettingKey::EnableNvsl
            | SettingKey::ForceMediaFile
            | SettingKey::ForceGtk4PaintableSink => Reaction::Relaunch,
            SettingKey::DebugMode
            | SettingKey::LogLevel
            | SettingKey::LogToFile
            | SettingKey::LogFilePath => Reaction::ReconfigureLogging,
            SettingKey::AutoChangeEnabled
            | SettingKey::AutoChangeInterval
            | SettingKey::AutoChangeMode
            | SettingKey::AutoChangeDirectory => Reaction::RestartRotation,
            SettingKey::StartupDelay
            | SettingKey::PreferencesCommand
            | SettingKey::ApplyAsBackground => Reaction::Store,
        }
    }

    /// Distinct reactions for a set of changed keys, in a stable order.
    pub fn for_changes(keys: &[SettingKey]) -> Vec<Reaction> {
        let mut reactions: Vec<_> = keys.iter().map(|k| Reaction::for_key(*k)).collect();
        reactions.sort();
        reactions.dedup();
        reactions
    }
}

/// Resolves the renderer executable: configured path, or the binary shipped
/// next to the daemon, or a `$PATH` lookup as a last resort.
pub fn renderer_executable(config: &Config) -> PathBuf {
    let configured = config.renderer.executable.trim();
    if !configured.is_empty() {
        return PathBuf::from(configured);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(RENDERER_BINARY_NAME)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(RENDERER_BINARY_NAME))
}

/// Builds the renderer launch for `config`. Runs from `home`.
pub fn launch_spec(config: &Config, home: &Path) -> LaunchSpec {
    let executable = renderer_executable(config);

    let install_path = match config.renderer.install_path.trim() {
        "" => executable
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
        configured => configured.to_string(),
    };

    let mut args = RendererArgs::new(install_path, config.playback.video_path.clone());
    args.mute = config.playback.mute;
    args.volume = Some(config.playback.volume_fraction());
    args.nohide = config.renderer.nohide;
    args.windowed = config.renderer.windowed.as_deref().and_then(|raw| {
        WindowSize::from_str(raw)
            .map_err(|e| warn!("[settings] Ignoring windowed = {raw:?}: {e}"))
            .ok()
    });

    LaunchSpec { executable, args, working_dir: home.to_path_buf() }
}

/// Watches the config file's directory and sends [`DaemonEvent::SettingsChanged`]
/// whenever the file is rewritten and parses cleanly. Parse failures are logged
/// and the previous settings stay in effect.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("[settings] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("[settings] Config path has no parent directory");
            return;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&watch_dir) {
        error!("[settings] Failed to create {}: {e}", watch_dir.display());
        return;
    }
    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("[settings] Failed to watch config directory: {e}");
        return;
    }
    debug!("[settings] Watching {}", watch_dir.display());

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match config::load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::SettingsChanged(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("[settings] Failed to reload config: {e:#}"),
            }
        }
    }
}
