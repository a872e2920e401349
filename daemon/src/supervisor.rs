/// Renderer supervision.
///
/// The [`Supervisor`] owns the single "current" renderer and its restart timer.
/// Everything else talks to it through a [`SupervisorHandle`], which can only
/// request transitions (enable / disable / relaunch / kill). The actor loop in
/// [`Supervisor::run`] multiplexes those commands with its own internal events:
///   - `Exited`     the OS process behind launch `id` is gone
///   - `RestartDue` the backoff timer identified by `token` fired
///
/// Each launch gets a fresh id. Exit events carrying any other id than the
/// current one are stale (that process was replaced) and are dropped.
use std::path::PathBuf;
use std::time::Duration;

use loopwall_shared::args::RendererArgs;
use sysinfo::Signal;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::launcher::{Launch, Launched, RendererProcess};

/// Restart delay after the renderer exited with status 0.
pub const FAST_RESTART: Duration = Duration::from_millis(100);
/// Restart delay after a non-zero status or a death by signal.
pub const SLOW_RESTART: Duration = Duration::from_millis(1000);
/// How long shutdown waits for a terminated renderer before force-killing it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to start the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: RendererArgs,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn argv(&self) -> Vec<String> {
        self.args.to_argv(&self.executable.to_string_lossy())
    }
}

/// How a renderer exit is judged for backoff purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Clean,
    Abnormal,
}

impl ExitClass {
    pub fn of(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitClass::Clean,
            _ => ExitClass::Abnormal,
        }
    }

    pub fn backoff(self) -> Duration {
        match self {
            ExitClass::Clean => FAST_RESTART,
            ExitClass::Abnormal => SLOW_RESTART,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererState {
    Stopped,
    Running { id: u64, pid: Option<u32> },
    RestartPending { backoff_ms: u64 },
}

/// Published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: RendererState,
    /// Launches performed by the restart timer.
    pub restarts: u64,
    /// Exits classified as abnormal.
    pub crashes: u64,
    pub last_exit_code: Option<i32>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self { state: RendererState::Stopped, restarts: 0, crashes: 0, last_exit_code: None }
    }
}

#[derive(Debug)]
pub enum SupervisorCommand {
    Enable,
    Disable,
    Relaunch,
    KillCurrent,
    Reconfigure(LaunchSpec),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Event {
    Exited { id: u64, code: Option<i32> },
    RestartDue { token: u64 },
}

struct Current {
    id: u64,
    process: Box<dyn RendererProcess>,
    /// A termination signal has been sent; waiting for the exit to be observed.
    stopping: bool,
}

struct PendingRestart {
    token: u64,
    delay: Duration,
    task: JoinHandle<()>,
}

pub struct Supervisor<L: Launch> {
    launcher: L,
    spec: LaunchSpec,
    enabled: bool,
    current: Option<Current>,
    restart: Option<PendingRestart>,
    backoff: Duration,
    next_id: u64,
    next_token: u64,
    status: SupervisorStatus,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<L: Launch> Supervisor<L> {
    pub fn new(launcher: L, spec: LaunchSpec) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SupervisorStatus::default());
        Self {
            launcher,
            spec,
            enabled: false,
            current: None,
            restart: None,
            backoff: FAST_RESTART,
            next_id: 1,
            next_token: 1,
            status: SupervisorStatus::default(),
            events_tx,
            events_rx,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Id of the current renderer, if any.
    pub fn current_id(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.id)
    }

    /// Delay of the pending restart timer, if one is armed.
    pub fn pending_restart(&self) -> Option<Duration> {
        self.restart.as_ref().map(|r| r.delay)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn status(&self) -> &SupervisorStatus {
        &self.status
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    /// Starts supervising. Launches right away unless a live renderer exists.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.cancel_restart();
        if let Some(current) = self.current.as_ref().filter(|c| !c.stopping) {
            debug!("[supervisor] Already running (id {})", current.id);
            return;
        }
        // A renderer still shutting down from an earlier disable is left to
        // exit on its own; its exit event will be stale.
        self.current = None;
        self.launch();
    }

    /// Stops supervising and asks the current renderer to exit.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.cancel_restart();
        self.stop_current();
        if self.current.is_none() {
            self.publish(RendererState::Stopped);
        }
    }

    /// Replaces the current renderer with a fresh one immediately.
    pub fn relaunch(&mut self) {
        if !self.enabled {
            debug!("[supervisor] Relaunch ignored while disabled");
            return;
        }
        self.cancel_restart();
        if let Some(mut old) = self.current.take() {
            info!("[supervisor] Replacing renderer (id {})", old.id);
            Self::signal_stop(&mut old);
        }
        self.launch();
    }

    /// Terminates the current renderer; supervision brings it back.
    pub fn kill_current(&mut self) {
        if self.cancel_restart() && self.enabled {
            self.schedule_restart(self.backoff);
        }
        self.stop_current();
    }

    /// Replaces the launch spec used by subsequent launches.
    pub fn reconfigure(&mut self, spec: LaunchSpec) {
        if spec != self.spec {
            debug!("[supervisor] Launch spec updated: {:?}", spec.argv());
            self.spec = spec;
        }
    }

    // ── Event handling ────────────────────────────────────────────────────────

    /// Applies one command. `Shutdown` stops the renderer, answers the reply
    /// once it is gone and returns `false`: the supervisor is done.
    pub async fn handle_command(&mut self, cmd: SupervisorCommand) -> bool {
        match cmd {
            SupervisorCommand::Enable => self.enable(),
            SupervisorCommand::Disable => self.disable(),
            SupervisorCommand::Relaunch => self.relaunch(),
            SupervisorCommand::KillCurrent => self.kill_current(),
            SupervisorCommand::Reconfigure(spec) => self.reconfigure(spec),
            SupervisorCommand::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Waits for the next internal event and applies it.
    pub async fn handle_next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Exited { id, code } => self.on_exit(id, code),
            Event::RestartDue { token } => self.on_restart_due(token),
        }
    }

    fn on_exit(&mut self, id: u64, code: Option<i32>) {
        if self.current_id() != Some(id) {
            debug!("[supervisor] Ignoring exit of replaced renderer (id {id}, code {code:?})");
            return;
        }
        self.current = None;
        self.status.last_exit_code = code;

        match ExitClass::of(code) {
            ExitClass::Clean => info!("[supervisor] Renderer exited cleanly (id {id})"),
            ExitClass::Abnormal => {
                self.backoff = SLOW_RESTART;
                self.status.crashes += 1;
                warn!("[supervisor] Renderer exited abnormally (id {id}, code {code:?})");
            }
        }

        if self.enabled {
            self.schedule_restart(self.backoff);
        } else {
            self.publish(RendererState::Stopped);
        }
    }

    fn on_restart_due(&mut self, token: u64) {
        if self.restart.as_ref().map(|r| r.token) != Some(token) {
            return;
        }
        self.restart = None;
        if self.enabled && self.current.is_none() {
            self.status.restarts += 1;
            self.launch();
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn launch(&mut self) {
        self.backoff = FAST_RESTART;
        let id = self.next_id;
        self.next_id += 1;

        let argv = self.spec.argv();
        match self.launcher.launch(&argv, &self.spec.working_dir) {
            Ok(Launched { process, exit }) => {
                let pid = process.pid();
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let code = exit.await.unwrap_or(None);
                    let _ = tx.send(Event::Exited { id, code });
                });
                info!("[supervisor] Renderer launched (id {id}, pid {pid:?})");
                self.current = Some(Current { id, process, stopping: false });
                self.publish(RendererState::Running { id, pid });
            }
            Err(e) => {
                error!("[supervisor] Failed to launch renderer: {e}");
                self.publish(RendererState::Stopped);
            }
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.cancel_restart();
        let token = self.next_token;
        self.next_token += 1;

        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Give queued work a turn before relaunching so a crash loop
            // cannot monopolise the loop.
            tokio::task::yield_now().await;
            let _ = tx.send(Event::RestartDue { token });
        });
        debug!("[supervisor] Restart scheduled in {}ms", delay.as_millis());
        self.restart = Some(PendingRestart { token, delay, task });
        self.publish(RendererState::RestartPending { backoff_ms: delay.as_millis() as u64 });
    }

    /// Returns `true` if a timer was pending.
    fn cancel_restart(&mut self) -> bool {
        match self.restart.take() {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    fn stop_current(&mut self) {
        if let Some(current) = self.current.as_mut() {
            Self::signal_stop(current);
        }
    }

    /// Cancel pending reads first, then ask the process to exit.
    fn signal_stop(current: &mut Current) {
        if current.stopping {
            return;
        }
        current.stopping = true;
        current.process.cancel();
        if !current.process.terminate(Signal::Term) {
            debug!("[supervisor] Renderer (id {}) already gone", current.id);
        }
    }

    fn publish(&mut self, state: RendererState) {
        self.status.state = state;
        self.status_tx.send_replace(self.status.clone());
    }

    /// Actor loop: applies commands and internal events until shutdown.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            return;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        // Every handle is gone: nobody can ask for a shutdown any more.
        self.shutdown().await;
    }

    /// Disables supervision and waits (bounded) for the renderer to exit,
    /// force-killing it if it ignores the termination request.
    async fn shutdown(&mut self) {
        self.disable();
        let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(deadline);
        while self.current.is_some() {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = &mut deadline => {
                    if let Some(current) = self.current.as_mut() {
                        warn!("[supervisor] Renderer ignored SIGTERM; killing (id {})", current.id);
                        current.process.terminate(Signal::Kill);
                    }
                    break;
                }
            }
        }
        info!("[supervisor] Stopped");
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front door to a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    status: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    pub async fn enable(&self) {
        self.send(SupervisorCommand::Enable).await;
    }

    pub async fn disable(&self) {
        self.send(SupervisorCommand::Disable).await;
    }

    pub async fn relaunch(&self) {
        self.send(SupervisorCommand::Relaunch).await;
    }

    pub async fn kill_current(&self) {
        self.send(SupervisorCommand::KillCurrent).await;
    }

    pub async fn reconfigure(&self, spec: LaunchSpec) {
        self.send(SupervisorCommand::Reconfigure(spec)).await;
    }

    /// Stops supervision and resolves once the renderer has exited.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Shutdown(tx)).await;
        let _ = rx.await;
    }

    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    async fn send(&self, cmd: SupervisorCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!("[supervisor] Command dropped; supervisor is gone");
        }
    }
}

/// Spawns the supervisor actor and returns its handle. Starts disabled.
pub fn spawn<L: Launch>(launcher: L, spec: LaunchSpec) -> SupervisorHandle {
    let supervisor = Supervisor::new(launcher, spec);
    let status = supervisor.subscribe();
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(supervisor.run(rx));
    SupervisorHandle { tx, status }
}
