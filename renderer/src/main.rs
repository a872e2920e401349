mod capture;
mod player;
mod service;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use loopwall_shared::args::RendererArgs;
use loopwall_shared::config::{self, Config};
use loopwall_shared::paths;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::player::{DecoderPreferences, Player};

/// Resolves once Ctrl+C or SIGTERM arrives.
async fn shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn build_player(args: &RendererArgs, settings: &Config) -> Player {
    // Command-line values win: they reflect the settings at launch time.
    let volume = args.volume.unwrap_or_else(|| settings.playback.volume_fraction());
    let mute = args.mute || settings.playback.mute;
    let mut player = Player::new(
        volume,
        mute,
        settings.playback.content_fit,
        DecoderPreferences::from_config(&settings.renderer),
    );
    if args.video_path.is_empty() {
        warn!("No video configured");
    } else if let Err(e) = player.load(Path::new(&args.video_path)) {
        warn!("{e:#}");
    }
    player
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Unknown arguments end here with clap's usage error and a non-zero status.
    let args = RendererArgs::parse();

    // Plain lines on stdout: the daemon captures and forwards them.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .with_writer(std::io::stdout)
        .init();

    info!(
        "loopwall-renderer v{} (install path '{}', nohide {}, windowed {:?})",
        env!("CARGO_PKG_VERSION"),
        args.install_path,
        args.nohide,
        args.windowed.map(|w| w.to_string()),
    );

    let settings = config::load_or_default(&paths::config_file_path()).unwrap_or_else(|e| {
        warn!("Settings unreadable, using defaults: {e:#}");
        Config::default()
    });
    let player = build_player(&args, &settings);

    let conn = match service::serve(player).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    match service::start_playback(&conn).await {
        Ok(true) => info!("Playback started"),
        Ok(false) => info!("Waiting for a video"),
        Err(e) => warn!("{e:#}"),
    }

    shutdown_signal().await;
    info!("Shutting down");
    ExitCode::SUCCESS
}
