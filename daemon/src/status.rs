use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigWriteError;
use crate::supervisor::{RendererState, SupervisorStatus};

/// Renderer lifecycle as reported in the status file.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum RendererPhase {
    /// Supervision is off or the renderer could not be started.
    Stopped,
    /// A renderer process is current.
    Running,
    /// The renderer exited and a restart is scheduled.
    Restarting,
}

/// Runtime status written by the daemon to `<cache dir>/loopwall/status.toml`.
/// Preference front-ends read this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub renderer: RendererPhase,
    /// OS pid of the current renderer, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer_pid: Option<u32>,
    /// Launches performed by supervision after an exit.
    pub restarts: u64,
    /// Exits with a non-zero or missing status.
    pub crashes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    /// Milliseconds from daemon start to the first renderer launch request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_load_time_ms: Option<f64>,
    /// Path of the most recently captured snapshot, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<String>,
}

impl ControllerStatus {
    /// Constructs the initial stopped status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            renderer: RendererPhase::Stopped,
            renderer_pid: None,
            restarts: 0,
            crashes: 0,
            last_exit_code: None,
            last_load_time_ms: None,
            last_snapshot: None,
        }
    }

    /// Folds a supervisor status update into this record.
    pub fn update(&mut self, supervisor: &SupervisorStatus) {
        (self.renderer, self.renderer_pid) = match supervisor.state {
            RendererState::Stopped => (RendererPhase::Stopped, None),
            RendererState::Running { pid, .. } => (RendererPhase::Running, pid),
            RendererState::RestartPending { .. } => (RendererPhase::Restarting, None),
        };
        self.restarts = supervisor.restarts;
        self.crashes = supervisor.crashes;
        self.last_exit_code = supervisor.last_exit_code;
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed.
pub fn write_status(path: &Path, status: &ControllerStatus) -> Result<(), ConfigWriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigWriteError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(status)
        .map_err(|source| ConfigWriteError::Serialize { what: "status", source })?;
    std::fs::write(path, content)
        .map_err(|source| ConfigWriteError::Write { path: path.to_path_buf(), source })
}

/// Records that startup completed, with an RFC 3339 timestamp. Debug aid for
/// telling apart restarts of the daemon from restarts of the renderer.
pub fn write_startup_marker(path: &Path) -> Result<(), ConfigWriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigWriteError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = format!("startup-complete {}\n", chrono::Local::now().to_rfc3339());
    std::fs::write(path, content)
        .map_err(|source| ConfigWriteError::Write { path: path.to_path_buf(), source })
}
