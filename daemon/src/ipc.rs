/// Daemon-side client for the renderer's bus interface.
///
/// The renderer comes and goes under supervision, so nothing here is allowed
/// to fail loudly: every call degrades to a logged warning and a neutral
/// return value. The proxy is resolved lazily on first use and then reused;
/// it addresses the renderer by its well-known name, so it stays valid across
/// renderer restarts. Signal subscriptions do not, and must be renewed for
/// every launch.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use loopwall_shared::bus::RendererProxy;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::proxy::CacheProperties;
use zbus::Connection;

use crate::error::IpcError;
use crate::event::DaemonEvent;
use crate::snapshot::SnapshotTarget;

#[derive(Clone, Default)]
pub struct RendererClient {
    proxy: Arc<OnceCell<RendererProxy<'static>>>,
}

impl RendererClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn proxy(&self) -> Result<&RendererProxy<'static>, IpcError> {
        self.proxy
            .get_or_try_init(|| async {
                let conn = Connection::session().await?;
                RendererProxy::builder(&conn)
                    .cache_properties(CacheProperties::No)
                    .build()
                    .await
            })
            .await
            .map_err(IpcError::from)
    }

    pub async fn set_play(&self) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_play().await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setPlay", result).is_some()
    }

    pub async fn set_pause(&self) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_pause().await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setPause", result).is_some()
    }

    /// `volume` is a fraction in `[0, 1]`.
    pub async fn set_volume(&self, volume: f64) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_volume(volume).await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setVolume", result).is_some()
    }

    pub async fn set_mute(&self, mute: bool) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_mute(mute).await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setMute", result).is_some()
    }

    pub async fn set_video_path(&self, path: &str) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_video_path(path).await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setVideoPath", result).is_some()
    }

    pub async fn set_content_fit(&self, code: u32) -> bool {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.set_content_fit(code).await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        log_outcome("setContentFit", result).is_some()
    }

    /// Reads `isPlaying` once the renderer owns its name, retrying while it
    /// is still starting up. Only the final failure is logged.
    pub async fn wait_playing(&self, attempts: u32, interval: Duration) -> Option<bool> {
        for attempt in 1..=attempts {
            let result = match self.proxy().await {
                Ok(proxy) => proxy.is_playing().await.map_err(IpcError::from),
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_unavailable() && attempt < attempts => {
                    tokio::time::sleep(interval).await;
                }
                result => return log_outcome("isPlaying", result),
            }
        }
        None
    }

    /// Forwards every `isPlayingChanged` into `tx` until the returned
    /// [`Subscription`] is released or dropped.
    pub async fn subscribe_playing(&self, tx: mpsc::Sender<DaemonEvent>) -> Option<Subscription> {
        let result = match self.proxy().await {
            Ok(proxy) => proxy.receive_playing_changed().await.map_err(IpcError::from),
            Err(e) => Err(e),
        };
        let mut stream = log_outcome("subscribe isPlayingChanged", result)?;

        let task = tokio::spawn(async move {
            while let Some(signal) = stream.next().await {
                match signal.args() {
                    Ok(args) => {
                        let playing = *args.is_playing();
                        debug!("[ipc] isPlayingChanged({playing})");
                        if tx.send(DaemonEvent::PlayingChanged(playing)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("[ipc] Malformed isPlayingChanged: {e}"),
                }
            }
            debug!("[ipc] Signal stream closed");
        });
        Some(Subscription::new(task))
    }
}

impl SnapshotTarget for RendererClient {
    async fn take_snapshot(&self, path: PathBuf) -> Result<(), IpcError> {
        let proxy = self.proxy().await?;
        proxy
            .take_video_frame_snapshot(&path.to_string_lossy())
            .await
            .map_err(IpcError::from)
    }
}

/// Logs a failed call and discards its error.
fn log_outcome<T>(what: &str, result: Result<T, IpcError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_unavailable() => {
            warn!("[ipc] Renderer unreachable, skipped {what}: {e}");
            None
        }
        Err(e) => {
            warn!("[ipc] {what} failed: {e}");
            None
        }
    }
}

/// A live signal subscription. Release it explicitly with [`release`]
/// (dropping it has the same effect).
///
/// [`release`]: Subscription::release
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn release(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
