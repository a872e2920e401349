mod desktop;
mod error;
mod event;
mod ipc;
mod launcher;
mod logging;
mod orphans;
mod rotation;
mod settings;
mod snapshot;
mod status;
mod supervisor;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use loopwall_shared::config::{self, Config, SettingKey};
use loopwall_shared::paths;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::DaemonEvent;
use crate::ipc::{RendererClient, Subscription};
use crate::launcher::ProcessLauncher;
use crate::logging::{LogSettings, Logging};
use crate::orphans::RendererSignature;
use crate::rotation::Rotation;
use crate::settings::Reaction;
use crate::snapshot::{SnapshotScheduler, SnapshotTarget, Trigger};
use crate::status::ControllerStatus;
use crate::supervisor::RendererState;

/// The renderer needs a moment after launch before it owns its bus name.
const INITIAL_POLL_ATTEMPTS: u32 = 20;
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn persist_status(path: &Path, status: &ControllerStatus) {
    if let Err(e) = status::write_status(path, status) {
        warn!("[status] {e}");
    }
}

fn start_rotation(
    config: &Config,
    tx: &mpsc::Sender<DaemonEvent>,
) -> (Option<Rotation>, Option<tokio::task::JoinHandle<()>>) {
    match Rotation::from_config(&config.auto_change) {
        Some(rotation) => {
            let minutes = config.auto_change.effective_interval_minutes();
            info!("[rotation] {} videos, every {minutes} min", rotation.len());
            let ticker =
                rotation::spawn_ticker(Duration::from_secs(u64::from(minutes) * 60), tx.clone());
            (Some(rotation), Some(ticker))
        }
        None => (None, None),
    }
}

#[derive(Parser)]
#[command(name = "loopwall-daemon", version, about = "Keeps a looping video wallpaper running")]
struct Cli {
    /// Send a one-off command to the running renderer instead of supervising.
    #[command(subcommand)]
    command: Option<Control>,
}

#[derive(Subcommand)]
enum Control {
    /// Resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Capture the current frame as a PNG.
    Snapshot {
        /// Output file. Defaults to the cache snapshot path.
        path: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Some(control) => run_control(control).await,
        None => run_daemon().await,
    }
}

async fn run_control(control: Control) -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_writer(std::io::stderr)
        .init();

    let client = RendererClient::new();
    let ok = match control {
        Control::Play => client.set_play().await,
        Control::Pause => client.set_pause().await,
        Control::Snapshot { path } => {
            let path = path.unwrap_or_else(paths::snapshot_path);
            match client.take_snapshot(path.clone()).await {
                Ok(()) => {
                    println!("{}", path.display());
                    true
                }
                Err(e) => {
                    eprintln!("Snapshot failed: {e}");
                    false
                }
            }
        }
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_daemon() -> ExitCode {
    let started = Instant::now();
    let home = paths::home_dir();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let (mut current_config, config_error) = match config::load_or_default(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // ── Logging ───────────────────────────────────────────────────────────────
    let mut logging =
        match Logging::init(LogSettings::from_config(&current_config.logging, &home)) {
            Ok(logging) => logging,
            Err(e) => {
                eprintln!("Failed to initialise logging: {e:#}");
                return ExitCode::FAILURE;
            }
        };
    if let Some(e) = config_error {
        warn!("[config] Error (using defaults): {e:#}");
    }

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = ControllerStatus::new();
    persist_status(&status_path, &current_status);

    // ── Orphan sweep ──────────────────────────────────────────────────────────
    let spec = settings::launch_spec(&current_config, &home);
    let signature = RendererSignature::new(&spec.executable, spec.args.install_path.clone());
    let swept = orphans::kill_orphans(&signature);
    if swept > 0 {
        info!("[orphans] Removed {swept} renderer(s) left from a previous session");
    }

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Supervisor ────────────────────────────────────────────────────────────
    let supervisor = supervisor::spawn(ProcessLauncher, spec);
    {
        let mut status_rx = supervisor.status();
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = status_rx.borrow_and_update().clone();
                if tx.send(DaemonEvent::Renderer(status)).await.is_err() {
                    break;
                }
            }
        });
    }

    if current_config.playback.video_path.is_empty() {
        desktop::open_preferences(&current_config.renderer.preferences_command);
    }
    let delay = current_config.renderer.effective_startup_delay_ms();
    debug!("[startup] Waiting {delay}ms before the first launch");
    tokio::time::sleep(Duration::from_millis(delay)).await;
    supervisor.enable().await;

    let load_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    current_status.last_load_time_ms = Some(load_time_ms);
    persist_status(&status_path, &current_status);
    if let Err(e) = status::write_startup_marker(&paths::startup_marker_path()) {
        warn!("[status] {e}");
    }
    info!("[startup] Loaded in {load_time_ms:.2}ms");

    // ── IPC + snapshot ────────────────────────────────────────────────────────
    let client = RendererClient::new();
    let mut scheduler = SnapshotScheduler::new(
        client.clone(),
        paths::snapshot_path(),
        current_config.playback.video_path.clone(),
    );
    let mut subscription: Option<Subscription> = None;
    let mut last_launch: Option<u64> = None;
    let mut playing = false;

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(settings::watch_config(config_path.clone(), event_tx.clone()));
    let (mut rotation, mut rotation_ticker) = start_rotation(&current_config, &event_tx);

    // Graceful shutdown on Ctrl+C or SIGTERM.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("[signal] SIGTERM handler unavailable: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            let _ = tx.send(DaemonEvent::Shutdown).await;
        });
    }

    info!("loopwall-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        let evt = tokio::select! {
            Some(evt) = event_rx.recv() => evt,
            snapshot_event = scheduler.next_event() => {
                if let Some(path) = scheduler.handle_event(snapshot_event) {
                    current_status.last_snapshot = Some(path.to_string_lossy().into_owned());
                    persist_status(&status_path, &current_status);
                    if current_config.snapshot.apply_as_background {
                        tokio::spawn(async move {
                            desktop::apply_background(&path).await;
                        });
                    }
                }
                continue;
            }
        };

        match evt {
            DaemonEvent::Renderer(status) => {
                current_status.update(&status);
                persist_status(&status_path, &current_status);

                let RendererState::Running { id, .. } = status.state else {
                    continue;
                };
                if last_launch == Some(id) {
                    continue;
                }
                // A new renderer: signals from the previous one are gone for good.
                last_launch = Some(id);
                playing = false;
                if let Some(old) = subscription.take() {
                    old.release();
                }
                subscription = client.subscribe_playing(event_tx.clone()).await;

                let poller = client.clone();
                let tx = event_tx.clone();
                tokio::spawn(async move {
                    let polled = poller.wait_playing(INITIAL_POLL_ATTEMPTS, INITIAL_POLL_INTERVAL).await;
                    if let Some(is_playing) = polled {
                        let _ = tx.send(DaemonEvent::InitialPoll(is_playing)).await;
                    }
                });
            }

            DaemonEvent::PlayingChanged(is_playing) => {
                playing = is_playing;
                if is_playing {
                    scheduler.on_playing(Trigger::Signal);
                }
            }

            DaemonEvent::InitialPoll(is_playing) => {
                if is_playing {
                    playing = true;
                    scheduler.on_playing(Trigger::InitialPoll);
                }
            }

            DaemonEvent::RotationTick => {
                // Changing the video would resume a paused renderer.
                if !playing {
                    continue;
                }
                let Some(rotation) = rotation.as_mut() else {
                    continue;
                };
                let next = rotation.advance().to_string_lossy().into_owned();
                if next == current_config.playback.video_path {
                    continue;
                }
                info!("[rotation] Switching to {next}");
                let mut updated = current_config.clone();
                updated.playback.video_path = next;
                // The settings watcher picks the write up like any other edit.
                if let Err(e) = config::save(&config_path, &updated) {
                    warn!("[rotation] {e:#}");
                }
            }

            DaemonEvent::SettingsChanged(new_config) => {
                let changes = SettingKey::changed(&current_config, &new_config);
                if changes.is_empty() {
                    continue;
                }
                debug!("[settings] Changed: {changes:?}");
                current_config = new_config;
                supervisor.reconfigure(settings::launch_spec(&current_config, &home)).await;

                for reaction in Reaction::for_changes(&changes) {
                    match reaction {
                        Reaction::ChangeVideo => {
                            let video = current_config.playback.video_path.clone();
                            scheduler.reset(video.clone());
                            if video.is_empty() {
                                desktop::open_preferences(
                                    &current_config.renderer.preferences_command,
                                );
                            } else {
                                client.set_video_path(&video).await;
                            }
                        }
                        Reaction::PushMute => {
                            client.set_mute(current_config.playback.mute).await;
                        }
                        Reaction::PushVolume => {
                            client.set_volume(current_config.playback.volume_fraction()).await;
                        }
                        Reaction::PushContentFit => {
                            client.set_content_fit(current_config.playback.content_fit.code()).await;
                        }
                        Reaction::Relaunch => supervisor.relaunch().await,
                        Reaction::ReconfigureLogging => {
                            logging.apply(LogSettings::from_config(&current_config.logging, &home));
                        }
                        Reaction::RestartRotation => {
                            if let Some(ticker) = rotation_ticker.take() {
                                ticker.abort();
                            }
                            (rotation, rotation_ticker) = start_rotation(&current_config, &event_tx);
                        }
                        Reaction::Store => {}
                    }
                }
            }

            DaemonEvent::Shutdown => {
                info!("Shutting down");
                if let Some(ticker) = rotation_ticker.take() {
                    ticker.abort();
                }
                if let Some(sub) = subscription.take() {
                    sub.release();
                }
                supervisor.shutdown().await;
                current_status.update(&supervisor.status().borrow());
                persist_status(&status_path, &current_status);
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
