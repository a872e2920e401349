/// Canonical file paths for loopwall data files.
///
///   - `<config dir>/loopwall/config.toml`         settings, written by the user/prefs
///   - `<cache dir>/loopwall/status.toml`          written by the daemon
///   - `<cache dir>/loopwall/snapshot.png`         processed frame snapshot
///   - `<cache dir>/loopwall/snapshot-raw.png`     raw capture before processing
///   - `<cache dir>/loopwall/startup-complete.txt` last successful startup marker
///   - `<cache dir>/loopwall/loopwall.log`         default log file
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "loopwall";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.png";
pub const RAW_SNAPSHOT_FILE_NAME: &str = "snapshot-raw.png";
pub const STARTUP_MARKER_FILE_NAME: &str = "startup-complete.txt";
pub const LOG_FILE_NAME: &str = "loopwall.log";

/// Home directory, falling back to the current directory when it cannot be resolved.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `$XDG_CONFIG_HOME/loopwall` (usually `~/.config/loopwall`).
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(APP_DIR_NAME)
}

/// `$XDG_CACHE_HOME/loopwall` (usually `~/.cache/loopwall`).
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| home_dir().join(".cache"))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    cache_dir().join(STATUS_FILE_NAME)
}

pub fn snapshot_path() -> PathBuf {
    cache_dir().join(SNAPSHOT_FILE_NAME)
}

pub fn startup_marker_path() -> PathBuf {
    cache_dir().join(STARTUP_MARKER_FILE_NAME)
}

pub fn default_log_file_path() -> PathBuf {
    cache_dir().join(LOG_FILE_NAME)
}

/// Raw capture location for a requested snapshot: same directory, fixed name.
pub fn raw_snapshot_path_for(target: &Path) -> PathBuf {
    match target.parent() {
        Some(dir) => dir.join(RAW_SNAPSHOT_FILE_NAME),
        None => PathBuf::from(RAW_SNAPSHOT_FILE_NAME),
    }
}

/// Resolves a user-supplied log path: empty → cache default, absolute → as is,
/// anything else relative to `home`.
pub fn resolve_log_file_path(configured: &str, home: &Path) -> PathBuf {
    let configured = configured.trim();
    if configured.is_empty() {
        return default_log_file_path();
    }
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_in_app_dir() {
        let path = config_file_path();
        assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(path.parent().unwrap().file_name().unwrap(), APP_DIR_NAME);
    }

    #[test]
    fn cache_files_share_the_cache_dir() {
        let dir = cache_dir();
        assert_eq!(snapshot_path().parent(), Some(dir.as_path()));
        assert_eq!(status_file_path().parent(), Some(dir.as_path()));
        assert_eq!(startup_marker_path().parent(), Some(dir.as_path()));
    }

    #[test]
    fn raw_snapshot_sits_next_to_target() {
        let raw = raw_snapshot_path_for(Path::new("/tmp/cache/snapshot.png"));
        assert_eq!(raw, PathBuf::from("/tmp/cache/snapshot-raw.png"));
    }

    #[test]
    fn log_path_resolution() {
        let home = Path::new("/home/me");
        assert_eq!(resolve_log_file_path("", home), default_log_file_path());
        assert_eq!(resolve_log_file_path("   ", home), default_log_file_path());
        assert_eq!(
            resolve_log_file_path("/var/log/lw.log", home),
            PathBuf::from("/var/log/lw.log")
        );
        assert_eq!(
            resolve_log_file_path("logs/lw.log", home),
            PathBuf::from("/home/me/logs/lw.log")
        );
    }
}
