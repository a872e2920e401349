use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_VOLUME_PERCENT: u8 = 50;
pub const MAX_VOLUME_PERCENT: u8 = 100;
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 200;
pub const MAX_STARTUP_DELAY_MS: u64 = 10_000;
pub const DEFAULT_CHANGE_INTERVAL_MINUTES: u32 = 15;
pub const MIN_CHANGE_INTERVAL_MINUTES: u32 = 1;

/// Root configuration structure. Deserialized from
/// `<config dir>/loopwall/config.toml`; every section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auto_change: AutoChangeConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

/// How the video is scaled into the monitor area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentFit {
    Fill,
    #[default]
    Contain,
    Cover,
    ScaleDown,
}

impl ContentFit {
    /// Numeric code sent over the bus (matches the toolkit's enum order).
    pub fn code(self) -> u32 {
        match self {
            ContentFit::Fill => 0,
            ContentFit::Contain => 1,
            ContentFit::Cover => 2,
            ContentFit::ScaleDown => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ContentFit::Fill),
            1 => Some(ContentFit::Contain),
            2 => Some(ContentFit::Cover),
            3 => Some(ContentFit::ScaleDown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Absolute path of the video to play. Empty means "not configured yet".
    #[serde(default)]
    pub video_path: String,
    #[serde(default)]
    pub mute: bool,
    /// Volume in percent. Clamped to [0, 100] by [`PlaybackConfig::volume_fraction`].
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub content_fit: ContentFit,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            video_path: String::new(),
            mute: false,
            volume: DEFAULT_VOLUME_PERCENT,
            content_fit: ContentFit::default(),
        }
    }
}

impl PlaybackConfig {
    /// Linear volume in [0, 1] as the renderer expects it.
    pub fn volume_fraction(&self) -> f64 {
        f64::from(self.volume.min(MAX_VOLUME_PERCENT)) / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Renderer executable. Empty resolves to `loopwall-renderer` next to the daemon binary.
    #[serde(default)]
    pub executable: String,
    /// Passed to the renderer with `-P`. Empty resolves to the renderer's directory.
    #[serde(default)]
    pub install_path: String,
    /// Delay before the first launch, in milliseconds. Clamped to [0, 10000].
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,
    /// `width:height` to run the renderer windowed (debugging aid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windowed: Option<String>,
    #[serde(default)]
    pub nohide: bool,
    /// Prefer VA-API hardware decoders.
    #[serde(default)]
    pub enable_va: bool,
    /// Prefer NVIDIA stateless decoders.
    #[serde(default)]
    pub enable_nvsl: bool,
    #[serde(default)]
    pub force_media_file: bool,
    #[serde(default)]
    pub force_gtk4_paintable_sink: bool,
    /// Command run when no video is configured (e.g. a file picker).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences_command: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            install_path: String::new(),
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
            windowed: None,
            nohide: false,
            enable_va: false,
            enable_nvsl: false,
            force_media_file: false,
            force_gtk4_paintable_sink: false,
            preferences_command: Vec::new(),
        }
    }
}

impl RendererConfig {
    pub fn effective_startup_delay_ms(&self) -> u64 {
        self.startup_delay_ms.min(MAX_STARTUP_DELAY_MS)
    }
}

/// Verbosity selected in debug mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// When false, only warnings and errors are logged and the log file is off.
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub log_to_file: bool,
    /// Absolute, or relative to the home directory. Empty uses the cache default.
    #[serde(default)]
    pub log_file_path: String,
}

/// Order in which the rotation walks the wallpaper directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    #[default]
    Sequential,
    Reverse,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoChangeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_change_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub mode: ChangeMode,
    #[serde(default)]
    pub directory: String,
}

impl Default for AutoChangeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_CHANGE_INTERVAL_MINUTES,
            mode: ChangeMode::default(),
            directory: String::new(),
        }
    }
}

impl AutoChangeConfig {
    pub fn effective_interval_minutes(&self) -> u32 {
        self.interval_minutes.max(MIN_CHANGE_INTERVAL_MINUTES)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Set the captured frame as the static desktop background.
    #[serde(default = "default_true")]
    pub apply_as_background: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { apply_as_background: true }
    }
}

/// Every setting the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    VideoPath,
    Mute,
    Volume,
    ContentFit,
    RendererExecutable,
    InstallPath,
    StartupDelay,
    Windowed,
    NoHide,
    EnableVa,
    EnableNvsl,
    ForceMediaFile,
    ForceGtk4PaintableSink,
    PreferencesCommand,
    DebugMode,
    LogLevel,
    LogToFile,
    LogFilePath,
    AutoChangeEnabled,
    AutoChangeInterval,
    AutoChangeMode,
    AutoChangeDirectory,
    ApplyAsBackground,
}

impl SettingKey {
    pub const ALL: [SettingKey; 23] = [
        SettingKey::VideoPath,
        SettingKey::Mute,
        SettingKey::Volume,
        SettingKey::ContentFit,
        SettingKey::RendererExecutable,
        SettingKey::InstallPath,
        SettingKey::StartupDelay,
        SettingKey::Windowed,
        SettingKey::NoHide,
        SettingKey::EnableVa,
        SettingKey::EnableNvsl,
        SettingKey::ForceMediaFile,
        SettingKey::ForceGtk4PaintableSink,
        SettingKey::PreferencesCommand,
        SettingKey::DebugMode,
        SettingKey::LogLevel,
        SettingKey::LogToFile,
        SettingKey::LogFilePath,
        SettingKey::AutoChangeEnabled,
        SettingKey::AutoChangeInterval,
        SettingKey::AutoChangeMode,
        SettingKey::AutoChangeDirectory,
        SettingKey::ApplyAsBackground,
    ];

    /// Returns `true` if this key holds different values in `a` and `b`.
    pub fn differs(self, a: &Config, b: &Config) -> bool {
        match self {
            SettingKey::VideoPath => a.playback.video_path != b.playback.video_path,
            SettingKey::Mute => a.playback.mute != b.playback.mute,
            SettingKey::Volume => a.playback.volume != b.playback.volume,
            SettingKey::ContentFit => a.playback.content_fit != b.playback.content_fit,
            SettingKey::RendererExecutable => a.renderer.executable != b.renderer.executable,
            SettingKey::InstallPath => a.renderer.install_path != b.renderer.install_path,
            SettingKey::StartupDelay => a.renderer.startup_delay_ms != b.renderer.startup_delay_ms,
            SettingKey::Windowed => a.renderer.windowed != b.renderer.windowed,
            SettingKey::NoHide => a.renderer.nohide != b.renderer.nohide,
            SettingKey::EnableVa => a.renderer.enable_va != b.renderer.enable_va,
            SettingKey::EnableNvsl => a.renderer.enable_nvsl != b.renderer.enable_nvsl,
            SettingKey::ForceMediaFile => a.renderer.force_media_file != b.renderer.force_media_file,
            SettingKey::ForceGtk4PaintableSink => {
                a.renderer.force_gtk4_paintable_sink != b.renderer.force_gtk4_paintable_sink
            }
            SettingKey::PreferencesCommand => {
                a.renderer.preferences_command != b.renderer.preferences_command
            }
            SettingKey::DebugMode => a.logging.debug_mode != b.logging.debug_mode,
            SettingKey::LogLevel => a.logging.level != b.logging.level,
            SettingKey::LogToFile => a.logging.log_to_file != b.logging.log_to_file,
            SettingKey::LogFilePath => a.logging.log_file_path != b.logging.log_file_path,
            SettingKey::AutoChangeEnabled => a.auto_change.enabled != b.auto_change.enabled,
            SettingKey::AutoChangeInterval => {
                a.auto_change.interval_minutes != b.auto_change.interval_minutes
            }
            SettingKey::AutoChangeMode => a.auto_change.mode != b.auto_change.mode,
            SettingKey::AutoChangeDirectory => a.auto_change.directory != b.auto_change.directory,
            SettingKey::ApplyAsBackground => {
                a.snapshot.apply_as_background != b.snapshot.apply_as_background
            }
        }
    }

    /// All keys whose values differ between `old` and `new`, in declaration order.
    pub fn changed(old: &Config, new: &Config) -> Vec<SettingKey> {
        Self::ALL.into_iter().filter(|k| k.differs(old, new)).collect()
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes `config` to `path`, creating the parent directory if needed.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME_PERCENT
}

fn default_startup_delay() -> u64 {
    DEFAULT_STARTUP_DELAY_MS
}

fn default_change_interval() -> u32 {
    DEFAULT_CHANGE_INTERVAL_MINUTES
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn config_default_values() {
        let c = Config::default();
        assert!(c.playback.video_path.is_empty());
        assert_eq!(c.playback.volume, DEFAULT_VOLUME_PERCENT);
        assert_eq!(c.playback.content_fit, ContentFit::Contain);
        assert_eq!(c.renderer.startup_delay_ms, DEFAULT_STARTUP_DELAY_MS);
        assert!(!c.logging.debug_mode);
        assert!(!c.auto_change.enabled);
        assert!(c.snapshot.apply_as_background);
    }

    #[test]
    fn volume_fraction_clamps_above_hundred() {
        let mut p = PlaybackConfig::default();
        assert!((p.volume_fraction() - 0.5).abs() < f64::EPSILON);
        p.volume = 250;
        assert!((p.volume_fraction() - 1.0).abs() < f64::EPSILON);
        p.volume = 0;
        assert_eq!(p.volume_fraction(), 0.0);
    }

    #[test]
    fn startup_delay_and_interval_are_bounded() {
        let r = RendererConfig { startup_delay_ms: 60_000, ..RendererConfig::default() };
        assert_eq!(r.effective_startup_delay_ms(), MAX_STARTUP_DELAY_MS);
        let a = AutoChangeConfig { interval_minutes: 0, ..AutoChangeConfig::default() };
        assert_eq!(a.effective_interval_minutes(), MIN_CHANGE_INTERVAL_MINUTES);
    }

    #[test]
    fn content_fit_codes_are_stable() {
        for fit in [ContentFit::Fill, ContentFit::Contain, ContentFit::Cover, ContentFit::ScaleDown] {
            assert_eq!(ContentFit::from_code(fit.code()), Some(fit));
        }
        assert_eq!(ContentFit::from_code(9), None);
    }

    // ── SettingKey ────────────────────────────────────────────────────────────

    #[test]
    fn identical_configs_have_no_changes() {
        let c = Config::default();
        assert!(SettingKey::changed(&c, &c.clone()).is_empty());
    }

    #[test]
    fn changed_reports_each_modified_key() {
        let old = Config::default();
        let mut new = old.clone();
        new.playback.video_path = "/videos/rain.mp4".to_string();
        new.playback.volume = 80;
        new.logging.level = LogLevel::Debug;
        new.renderer.enable_va = true;

        assert_eq!(
            SettingKey::changed(&old, &new),
            vec![
                SettingKey::VideoPath,
                SettingKey::Volume,
                SettingKey::EnableVa,
                SettingKey::LogLevel,
            ]
        );
    }

    #[test]
    fn every_key_detects_its_own_field() {
        let base = Config::default();
        let mut c = base.clone();
        c.playback.video_path = "x".into();
        c.playback.mute = true;
        c.playback.volume = 1;
        c.playback.content_fit = ContentFit::Cover;
        c.renderer.executable = "x".into();
        c.renderer.install_path = "x".into();
        c.renderer.startup_delay_ms = 1;
        c.renderer.windowed = Some("1:1".into());
        c.renderer.nohide = true;
        c.renderer.enable_va = true;
        c.renderer.enable_nvsl = true;
        c.renderer.force_media_file = true;
        c.renderer.force_gtk4_paintable_sink = true;
        c.renderer.preferences_command = vec!["x".into()];
        c.logging.debug_mode = true;
        c.logging.level = LogLevel::Error;
        c.logging.log_to_file = true;
        c.logging.log_file_path = "x".into();
        c.auto_change.enabled = true;
        c.auto_change.interval_minutes = 2;
        c.auto_change.mode = ChangeMode::Random;
        c.auto_change.directory = "x".into();
        c.snapshot.apply_as_background = false;

        assert_eq!(SettingKey::changed(&base, &c), SettingKey::ALL.to_vec());
    }

    // ── load_or_default / save ────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[playback]
video_path = "/home/me/Videos/waves.mp4"
mute = true
volume = 30
content_fit = "scale-down"

[logging]
debug_mode = true
level = "verbose"

[auto_change]
enabled = true
mode = "random"
directory = "/home/me/Videos"
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.playback.video_path, "/home/me/Videos/waves.mp4");
        assert!(config.playback.mute);
        assert_eq!(config.playback.volume, 30);
        assert_eq!(config.playback.content_fit, ContentFit::ScaleDown);
        assert!(config.logging.debug_mode);
        assert_eq!(config.logging.level, LogLevel::Verbose);
        assert!(config.auto_change.enabled);
        assert_eq!(config.auto_change.mode, ChangeMode::Random);
        assert_eq!(config.auto_change.interval_minutes, DEFAULT_CHANGE_INTERVAL_MINUTES);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[renderer]\nenable_va = true\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert!(config.renderer.enable_va);
        assert_eq!(config.renderer.startup_delay_ms, DEFAULT_STARTUP_DELAY_MS);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.playback.video_path = "/v/a.webm".to_string();
        config.auto_change.mode = ChangeMode::Reverse;
        config.renderer.windowed = Some("1280:720".to_string());

        save(&path, &config).unwrap();
        assert_eq!(load_or_default(&path).unwrap(), config);
    }
}
