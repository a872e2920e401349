//! Daemon logging.
//!
//! One global `tracing` subscriber is installed at startup. What it lets
//! through and where it writes are owned by a [`Logging`] value built from
//! [`LogSettings`], so a settings change is an explicit [`Logging::apply`]
//! call rather than a mutation of process-wide state:
//! - the level filter sits behind a `reload` layer
//! - the optional log file sits behind a swappable writer fed by a
//!   `tracing-appender` non-blocking worker
//!
//! `RUST_LOG`, when set, overrides the configured level.
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use loopwall_shared::config::{LogLevel, LoggingConfig};
use loopwall_shared::paths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Effective logging behaviour derived from the `[logging]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub directive: &'static str,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Outside debug mode only warnings and errors are logged, to stderr only.
    pub fn from_config(config: &LoggingConfig, home: &Path) -> Self {
        if !config.debug_mode {
            return Self { directive: "warn", file: None };
        }
        let file = config
            .log_to_file
            .then(|| paths::resolve_log_file_path(&config.log_file_path, home));
        Self { directive: level_directive(config.level), file }
    }
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Verbose => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Write target that can be pointed at a different file (or nowhere) while
/// the subscriber keeps running.
#[derive(Clone, Default)]
struct SwappableFile(Arc<Mutex<Option<File>>>);

impl SwappableFile {
    fn replace(&self, file: Option<File>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = file;
        }
    }
}

impl Write for SwappableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(file) => file.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0.lock() {
            Ok(mut slot) => slot.as_mut().map_or(Ok(()), |file| file.flush()),
            Err(_) => Ok(()),
        }
    }
}

/// `<path>.old`
fn rotated_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".old");
    PathBuf::from(name)
}

/// Opens `path` for appending after moving any previous log to `<path>.old`.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::rename(path, rotated_path(path))?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

pub struct Logging {
    filter: reload::Handle<EnvFilter, Registry>,
    file: SwappableFile,
    env_override: bool,
    current: LogSettings,
    _guard: WorkerGuard,
}

impl Logging {
    /// Installs the global subscriber. Fails if one is already set.
    pub fn init(settings: LogSettings) -> Result<Self> {
        let env_override = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
        let initial = if env_override {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(settings.directive)
        };
        let (filter_layer, filter) = reload::Layer::new(initial);

        let file = SwappableFile::default();
        let (writer, guard) = tracing_appender::non_blocking(file.clone());

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .try_init()
            .context("Failed to install tracing subscriber")?;

        let mut logging = Self {
            filter,
            file,
            env_override,
            current: LogSettings { directive: settings.directive, file: None },
            _guard: guard,
        };
        logging.set_file(settings.file.clone());
        logging.current = settings;
        Ok(logging)
    }

    pub fn settings(&self) -> &LogSettings {
        &self.current
    }

    /// Switches level and file target. Unchanged parts are left alone, so the
    /// log file is only rotated when its path actually changes.
    pub fn apply(&mut self, settings: LogSettings) {
        if settings == self.current {
            return;
        }
        if settings.directive != self.current.directive && !self.env_override {
            if let Err(e) = self.filter.reload(EnvFilter::new(settings.directive)) {
                tracing::warn!("[logging] Failed to change level: {e}");
            }
        }
        if settings.file != self.current.file {
            self.set_file(settings.file.clone());
        }
        tracing::info!("[logging] Level {}, file {:?}", settings.directive, settings.file);
        self.current = settings;
    }

    fn set_file(&mut self, path: Option<PathBuf>) {
        let file = path.and_then(|path| match open_log_file(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::error!("[logging] Failed to open log file {}: {e}", path.display());
                None
            }
        });
        self.file.replace(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging_config(debug_mode: bool, level: LogLevel, log_to_file: bool) -> LoggingConfig {
        LoggingConfig {
            debug_mode,
            level,
            log_to_file,
            log_file_path: "logs/loopwall.log".to_string(),
        }
    }

    // ── LogSettings ───────────────────────────────────────────────────────────

    #[test]
    fn debug_off_means_warn_and_no_file() {
        let s = LogSettings::from_config(&logging_config(false, LogLevel::Verbose, true), Path::new("/h"));
        assert_eq!(s, LogSettings { directive: "warn", file: None });
    }

    #[test]
    fn debug_on_uses_configured_level() {
        let s = LogSettings::from_config(&logging_config(true, LogLevel::Verbose, false), Path::new("/h"));
        assert_eq!(s.directive, "trace");
        assert_eq!(s.file, None);

        let s = LogSettings::from_config(&logging_config(true, LogLevel::Error, false), Path::new("/h"));
        assert_eq!(s.directive, "error");
    }

    #[test]
    fn relative_log_file_resolves_against_home() {
        let s = LogSettings::from_config(&logging_config(true, LogLevel::Info, true), Path::new("/h"));
        assert_eq!(s.file, Some(PathBuf::from("/h/logs/loopwall.log")));
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn rotated_path_appends_suffix() {
        assert_eq!(rotated_path(Path::new("/tmp/a.log")), PathBuf::from("/tmp/a.log.old"));
    }

    #[test]
    fn opening_rotates_previous_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("loopwall.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "previous run\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "this run").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "this run\n");
        assert_eq!(std::fs::read_to_string(rotated_path(&path)).unwrap(), "previous run\n");
    }

    #[test]
    fn opening_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("loopwall.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
        assert!(!rotated_path(&path).exists());
    }

    #[test]
    fn swappable_file_discards_until_pointed_at_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut writer = SwappableFile::default();

        writer.write_all(b"dropped\n").unwrap();
        writer.replace(Some(open_log_file(&path).unwrap()));
        writer.write_all(b"kept\n").unwrap();
        writer.replace(None);
        writer.write_all(b"dropped again\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }
}
