use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::{debug, info, warn};

/// Identifies command lines that belong to our renderer.
///
/// A process matches when its argv[0] is the renderer executable itself, or
/// when it carries the same executable file name and was started with the same
/// `-P <install path>` (covers renderers launched through a different path).
#[derive(Debug, Clone)]
pub struct RendererSignature {
    executable: PathBuf,
    install_path: String,
}

impl RendererSignature {
    pub fn new(executable: impl Into<PathBuf>, install_path: impl Into<String>) -> Self {
        Self { executable: executable.into(), install_path: install_path.into() }
    }

    pub fn matches(&self, cmd: &[OsString]) -> bool {
        let Some(program) = cmd.first() else {
            return false;
        };
        let program = Path::new(program);
        if program == self.executable {
            return true;
        }

        let same_name =
            program.file_name().is_some() && program.file_name() == self.executable.file_name();
        same_name
            && !self.install_path.is_empty()
            && cmd.windows(2).any(|w| w[0] == "-P" && w[1] == self.install_path.as_str())
    }
}

/// Kills renderers left over from a previous daemon instance.
///
/// Scans the process table once with command lines, skips our own pid and
/// sends SIGKILL to every match. Returns how many processes were killed.
pub fn kill_orphans(signature: &RendererSignature) -> usize {
    let own_pid = sysinfo::get_current_pid().ok();

    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
    );

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if Some(*pid) == own_pid || !signature.matches(process.cmd()) {
            continue;
        }
        match process.kill_with(Signal::Kill) {
            Some(true) => {
                info!("[orphans] Killed stale renderer (pid {pid})");
                killed += 1;
            }
            Some(false) => warn!("[orphans] Could not signal pid {pid}"),
            None => warn!("[orphans] SIGKILL unsupported on this platform"),
        }
    }

    debug!("[orphans] Sweep done, {killed} renderer(s) killed");
    killed
}
