/// Renderer process launching.
///
/// [`ProcessLauncher`] spawns the renderer with both output pipes captured and
/// hands back a [`Launched`] pair: a control handle and a oneshot that resolves
/// with the exit code once the OS process is gone. Two background tasks run per
/// process:
///   - an output reader that merges stdout/stderr lines into an [`OutputBuffer`]
///     and forwards flushed chunks to the `renderer` log target
///   - an exit waiter that owns the child, reaps it and clears the running flag
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loopwall_shared::bus::SNAPSHOT_LOG_MARKER;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::SpawnError;

/// Buffered renderer output is flushed once it holds this many lines…
pub const FLUSH_LINE_COUNT: usize = 10;
/// …or this many bytes, or a line containing [`SNAPSHOT_LOG_MARKER`].
pub const FLUSH_BYTE_COUNT: usize = 4096;

/// Control surface of one spawned renderer.
pub trait RendererProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// `false` once the exit of the OS process has been observed.
    fn is_running(&self) -> bool;

    /// Stops in-flight output reads. Does not touch the process itself.
    fn cancel(&self);

    /// Sends `signal` to the process. Returns `false` when nothing was sent
    /// (already exited, or the same signal was already delivered).
    fn terminate(&mut self, signal: Signal) -> bool;
}

/// A freshly spawned renderer: its handle plus the exit notification.
/// `exit` yields the exit code, or `None` when the process died from a signal.
pub struct Launched {
    pub process: Box<dyn RendererProcess>,
    pub exit: oneshot::Receiver<Option<i32>>,
}

/// Something that can start renderer processes.
pub trait Launch: Send + 'static {
    fn launch(&mut self, argv: &[String], cwd: &Path) -> Result<Launched, SpawnError>;
}

// ── Output buffering ──────────────────────────────────────────────────────────

/// Accumulates renderer output lines and decides when to hand them to the logger.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Vec<String>,
    bytes: usize,
}

impl OutputBuffer {
    /// Appends `line`; returns the joined buffer when a flush threshold is hit.
    pub fn push(&mut self, line: String) -> Option<String> {
        let flagged = line.contains(SNAPSHOT_LOG_MARKER);
        self.bytes += line.len();
        self.lines.push(line);
        if flagged || self.lines.len() >= FLUSH_LINE_COUNT || self.bytes >= FLUSH_BYTE_COUNT {
            self.take()
        } else {
            None
        }
    }

    /// Drains whatever is buffered.
    pub fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let joined = self.lines.join("\n");
        self.lines.clear();
        self.bytes = 0;
        Some(joined)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

// ── Real processes ────────────────────────────────────────────────────────────

/// Spawns renderers as child processes of the daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launch for ProcessLauncher {
    fn launch(&mut self, argv: &[String], cwd: &Path) -> Result<Launched, SpawnError> {
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyArgv)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SpawnError::Io { program: program.clone(), source })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            return Err(SpawnError::MissingPipe { program: program.clone(), stream: "stdout/stderr" });
        };

        let pid = child.id();
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(read_output(stdout, stderr, Arc::clone(&running), stop_rx));
        tokio::spawn(wait_for_exit(child, Arc::clone(&running), exit_tx));

        debug!("[launcher] Spawned {program} (pid {pid:?})");
        Ok(Launched {
            process: Box::new(ChildProcess { pid, running, stop_tx, last_signal: None }),
            exit: exit_rx,
        })
    }
}

struct ChildProcess {
    pid: Option<u32>,
    running: Arc<AtomicBool>,
    /// Setting this to `true` stops the output reader.
    stop_tx: watch::Sender<bool>,
    last_signal: Option<Signal>,
}

impl RendererProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn terminate(&mut self, signal: Signal) -> bool {
        if !self.is_running() || self.last_signal == Some(signal) {
            return false;
        }
        let Some(pid) = self.pid else { return false };
        self.last_signal = Some(signal);
        send_signal(pid, signal)
    }
}

/// Delivers `signal` to `pid`. Falls back to a plain kill where the platform
/// does not support the requested signal.
pub fn send_signal(pid: u32, signal: Signal) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match sys.process(pid) {
        Some(process) => process.kill_with(signal).unwrap_or_else(|| process.kill()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Reads the next line from `reader`. Bytes that are not UTF-8 are replaced
/// rather than failing the read. `Ok(None)` means end of stream.
///
/// Partial lines stay in `buf` when the future is dropped, so the next call
/// continues where this one stopped.
async fn next_line<R>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader.as_mut() else { return Ok(None) };
    if reader.read_until(b'\n', buf).await? == 0 && buf.is_empty() {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf).trim_end_matches(['\n', '\r']).to_string();
    buf.clear();
    Ok(Some(line))
}

/// Reads both pipes line by line while the process is marked running.
///
/// A pipe is dropped as soon as it is no longer read, so a renderer that keeps
/// writing gets `EPIPE` instead of blocking on a full pipe.
async fn read_output<O, E>(stdout: O, stderr: E, running: Arc<AtomicBool>, mut stop_rx: watch::Receiver<bool>)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out = Some(BufReader::new(stdout));
    let mut err = Some(BufReader::new(stderr));
    let (mut out_buf, mut err_buf) = (Vec::new(), Vec::new());
    let mut buffer = OutputBuffer::default();

    while (out.is_some() || err.is_some()) && running.load(Ordering::SeqCst) {
        let (stream, result) = tokio::select! {
            _ = stop_rx.changed() => break,
            r = next_line(&mut out, &mut out_buf), if out.is_some() => (Stream::Stdout, r),
            r = next_line(&mut err, &mut err_buf), if err.is_some() => (Stream::Stderr, r),
        };

        match result {
            Ok(Some(line)) => {
                if let Some(chunk) = buffer.push(line) {
                    info!(target: "renderer", "{chunk}");
                }
                continue;
            }
            Ok(None) => debug!("[launcher] Renderer {stream:?} closed"),
            Err(e) => warn!("[launcher] Renderer {stream:?} unreadable, closing it: {e}"),
        }
        match stream {
            Stream::Stdout => out = None,
            Stream::Stderr => err = None,
        }
    }

    if let Some(rest) = buffer.take() {
        info!(target: "renderer", "{rest}");
    }
}

async fn wait_for_exit(
    mut child: Child,
    running: Arc<AtomicBool>,
    exit_tx: oneshot::Sender<Option<i32>>,
) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("[launcher] Failed to wait for renderer: {e}");
            None
        }
    };
    running.store(false, Ordering::SeqCst);
    let _ = exit_tx.send(code);
}
