/// Deferred wallpaper snapshot.
///
/// Once the renderer reports it is playing, the scheduler waits
/// [`SNAPSHOT_DELAY`] and asks it for a single frame capture. The result is
/// taken at most once per video: later "playing" reports are ignored until the
/// configured video changes, which resets everything.
///
/// ```text
///   Idle ──playing──▶ Pending ──timer──▶ Applied
///    ▲                   │                  │
///    └────────reset──────┴──────reset───────┘
/// ```
///
/// Timers and captures are tagged with the generation they were started in.
/// A reset bumps the generation, so a timer or capture completion from before
/// the reset is recognised and dropped.
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::IpcError;

/// Quiet period between "playing" and the capture request. Renderers report
/// playing while still buffering, before the first frame is on screen.
pub const SNAPSHOT_DELAY: Duration = Duration::from_millis(1200);

/// Whatever can produce a frame snapshot at a given path.
pub trait SnapshotTarget: Clone + Send + Sync + 'static {
    fn take_snapshot(&self, path: PathBuf) -> impl Future<Output = Result<(), IpcError>> + Send;
}

/// What made the scheduler consider a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `isPlayingChanged(true)` arrived.
    Signal,
    /// `isPlaying` read `true` right after subscribing.
    InitialPoll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Idle,
    Pending,
    Applied,
}

#[derive(Debug)]
pub enum SnapshotEvent {
    Due { generation: u64 },
    Finished { generation: u64, result: Result<(), IpcError> },
}

pub struct SnapshotScheduler<T: SnapshotTarget> {
    target: T,
    output: PathBuf,
    source: String,
    phase: SnapshotPhase,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<SnapshotEvent>,
    events_rx: mpsc::UnboundedReceiver<SnapshotEvent>,
}

impl<T: SnapshotTarget> SnapshotScheduler<T> {
    /// `output` is where the processed snapshot is written; `source` is the
    /// currently configured video.
    pub fn new(target: T, output: PathBuf, source: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            target,
            output,
            source: source.into(),
            phase: SnapshotPhase::Idle,
            generation: 0,
            timer: None,
            events_tx,
            events_rx,
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The renderer is playing. Arms the capture timer if nothing is pending
    /// or applied yet and a video is configured.
    pub fn on_playing(&mut self, trigger: Trigger) {
        if self.phase != SnapshotPhase::Idle {
            debug!("[snapshot] {trigger:?} ignored in {:?}", self.phase);
            return;
        }
        if self.source.is_empty() {
            debug!("[snapshot] {trigger:?} ignored: no video configured");
            return;
        }

        self.phase = SnapshotPhase::Pending;
        let generation = self.generation;
        let tx = self.events_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(SNAPSHOT_DELAY).await;
            let _ = tx.send(SnapshotEvent::Due { generation });
        }));
        debug!("[snapshot] Armed by {trigger:?} for '{}'", self.source);
    }

    /// The configured video changed (possibly to empty). Cancels any pending
    /// capture and starts over from Idle.
    pub fn reset(&mut self, source: impl Into<String>) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.phase = SnapshotPhase::Idle;
        self.source = source.into();
        debug!("[snapshot] Reset for '{}'", self.source);
    }

    /// Waits for the next timer or capture completion.
    pub async fn next_event(&mut self) -> SnapshotEvent {
        // `events_tx` lives as long as `self`, so the channel never closes.
        loop {
            if let Some(event) = self.events_rx.recv().await {
                return event;
            }
        }
    }

    /// Applies a timer or completion event. Returns the snapshot path when a
    /// capture for the current video succeeded.
    pub fn handle_event(&mut self, event: SnapshotEvent) -> Option<PathBuf> {
        match event {
            SnapshotEvent::Due { generation } => {
                if generation == self.generation && self.phase == SnapshotPhase::Pending {
                    self.capture();
                }
                None
            }
            SnapshotEvent::Finished { generation, result } => {
                if generation != self.generation {
                    debug!("[snapshot] Dropping result of a superseded capture");
                    return None;
                }
                match result {
                    Ok(()) => {
                        info!("[snapshot] Captured {}", self.output.display());
                        Some(self.output.clone())
                    }
                    Err(e) if e.is_unavailable() => {
                        warn!("[snapshot] Renderer unreachable for capture: {e}");
                        None
                    }
                    Err(e) => {
                        warn!("[snapshot] Capture failed: {e}");
                        None
                    }
                }
            }
        }
    }

    /// Issues the capture and marks the video as done, whatever the outcome.
    fn capture(&mut self) {
        self.timer = None;
        self.phase = SnapshotPhase::Applied;

        let generation = self.generation;
        let target = self.target.clone();
        let path = self.output.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = target.take_snapshot(path).await;
            let _ = tx.send(SnapshotEvent::Finished { generation, result });
        });
        info!("[snapshot] Requesting frame for '{}'", self.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::{timeout, Instant};

    #[derive(Clone, Default)]
    struct FakeTarget {
        calls: Arc<Mutex<Vec<PathBuf>>>,
        fail: Option<IpcError>,
        latency: Duration,
    }

    impl FakeTarget {
        fn calls(&self) -> Vec<PathBuf> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SnapshotTarget for FakeTarget {
        async fn take_snapshot(&self, path: PathBuf) -> Result<(), IpcError> {
            self.calls.lock().unwrap().push(path);
            tokio::time::sleep(self.latency).await;
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn output() -> PathBuf {
        PathBuf::from("/home/me/.cache/loopwall/snapshot.png")
    }

    fn scheduler(target: &FakeTarget, source: &str) -> SnapshotScheduler<FakeTarget> {
        SnapshotScheduler::new(target.clone(), output(), source)
    }

    /// Drives the scheduler until a capture completion has been handled.
    async fn run_to_completion(s: &mut SnapshotScheduler<FakeTarget>) -> Option<PathBuf> {
        loop {
            let event = s.next_event().await;
            let finished = matches!(event, SnapshotEvent::Finished { .. });
            let applied = s.handle_event(event);
            if finished {
                return applied;
            }
        }
    }

    async fn assert_quiet(s: &mut SnapshotScheduler<FakeTarget>) {
        assert!(timeout(Duration::from_secs(5), s.next_event()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn playing_captures_once_after_delay() {
        let target = FakeTarget::default();
        let mut s = scheduler(&target, "/videos/a.mp4");

        s.on_playing(Trigger::Signal);
        assert_eq!(s.phase(), SnapshotPhase::Pending);

        let armed = Instant::now();
        let event = s.next_event().await;
        assert!(armed.elapsed() >= SNAPSHOT_DELAY);
        assert!(matches!(event, SnapshotEvent::Due { .. }));
        assert_eq!(s.handle_event(event), None);
        assert_eq!(s.phase(), SnapshotPhase::Applied);

        assert_eq!(run_to_completion(&mut s).await, Some(output()));
        assert_eq!(target.calls(), vec![output()]);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_poll_arms_like_a_signal() {
        let target = FakeTarget::default();
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::InitialPoll);
        // A signal arriving meanwhile does not re-arm the timer.
        s.on_playing(Trigger::Signal);
        run_to_completion(&mut s).await;
        assert_eq!(target.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_ignores_further_playing_until_reset() {
        let target = FakeTarget::default();
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::Signal);
        run_to_completion(&mut s).await;

        s.on_playing(Trigger::Signal);
        s.on_playing(Trigger::InitialPoll);
        assert_eq!(s.phase(), SnapshotPhase::Applied);
        assert_quiet(&mut s).await;
        assert_eq!(target.calls().len(), 1);

        s.reset("/videos/b.mp4");
        s.on_playing(Trigger::Signal);
        run_to_completion(&mut s).await;
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_before_delay_cancels_capture() {
        let target = FakeTarget::default();
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::Signal);

        tokio::time::advance(Duration::from_millis(1000)).await;
        s.reset("/videos/b.mp4");
        assert_eq!(s.phase(), SnapshotPhase::Idle);
        assert_quiet(&mut s).await;
        assert!(target.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_video_returns_to_idle_without_capture() {
        let target = FakeTarget::default();
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::Signal);
        s.reset("");
        assert_eq!(s.phase(), SnapshotPhase::Idle);

        s.on_playing(Trigger::Signal);
        assert_eq!(s.phase(), SnapshotPhase::Idle);
        assert_quiet(&mut s).await;
        assert!(target.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_capture_is_not_retried() {
        let target = FakeTarget {
            fail: Some(IpcError::CallFailed("pipeline not ready".into())),
            ..Default::default()
        };
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::Signal);
        assert_eq!(run_to_completion(&mut s).await, None);
        assert_eq!(s.phase(), SnapshotPhase::Applied);

        s.on_playing(Trigger::Signal);
        assert_quiet(&mut s).await;
        assert_eq!(target.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_after_reset_is_dropped() {
        let target = FakeTarget { latency: Duration::from_millis(500), ..Default::default() };
        let mut s = scheduler(&target, "/videos/a.mp4");
        s.on_playing(Trigger::Signal);

        let due = s.next_event().await;
        s.handle_event(due);
        tokio::task::yield_now().await;
        assert_eq!(target.calls().len(), 1);

        s.reset("/videos/b.mp4");
        assert_eq!(run_to_completion(&mut s).await, None);
        assert_eq!(s.phase(), SnapshotPhase::Idle);
    }
}
