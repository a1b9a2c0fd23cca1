//! The queue state machine: entries, promotion and the playback clock.

use crate::broadcaster::{SessionBroadcaster, SessionEvent, StateSnapshot};
use crate::clock::{PlaybackClock, TickOutcome};
use crate::config::JukeboxConfig;
use crate::entry::{EntryId, EntrySnapshot, QueueEntry, Stage, TrackMetadata};
use crate::error::{CoreError, Result};
use crate::lightshow::FrameSequence;
use crate::pipeline::Pipeline;
use crate::time::{DurationExt, frame_start};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "jukebox::queue";

/// Tunables for the queue manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub clock_tick: Duration,
    pub delete_finished_audio: bool,
    pub initial_volume: f32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            clock_tick: Duration::from_millis(250),
            delete_finished_audio: true,
            initial_volume: 1.0,
        }
    }
}

impl ManagerSettings {
    #[must_use]
    pub fn from_config(config: &JukeboxConfig) -> Self {
        Self {
            clock_tick: Duration::from_millis(config.playback.tick_ms),
            delete_finished_audio: config.pipeline.delete_finished_audio,
            ..Self::default()
        }
    }
}

/// What the frame streamer needs, published on every clock change so it
/// never takes the queue lock
#[derive(Debug, Clone, Default)]
pub struct NowPlaying {
    pub song_id: Option<EntryId>,
    pub frames: Option<Arc<FrameSequence>>,
    pub position: Duration,
    pub duration: Duration,
    pub is_playing: bool,
    /// When `position` was sampled
    pub sampled_at: Option<Instant>,
}

impl NowPlaying {
    /// Position extrapolated to `now` while playing, clamped to the song
    #[must_use]
    pub fn position_at(&self, now: Instant) -> Duration {
        match (self.is_playing, self.sampled_at) {
            (true, Some(at)) => {
                (self.position + now.saturating_duration_since(at)).min(self.duration)
            }
            _ => self.position,
        }
    }

    /// Clamped frame index showing at `now`
    #[must_use]
    pub fn frame_index_at(&self, now: Instant) -> Option<usize> {
        let frames = self.frames.as_ref()?;
        if frames.is_empty() {
            return None;
        }
        let index = self.position_at(now).frame_index(frames.frame_rate());
        Some(frames.clamp_index(index))
    }
}

struct Inner {
    waiting: Vec<QueueEntry>,
    current: Option<QueueEntry>,
    clock: PlaybackClock,
    last_tick: Option<Instant>,
    volume: f32,
}

impl Inner {
    fn waiting_mut(&mut self, id: EntryId) -> Option<&mut QueueEntry> {
        self.waiting.iter_mut().find(|e| e.id == id)
    }

    fn queue_snapshot(&self) -> Vec<EntrySnapshot> {
        self.waiting.iter().map(QueueEntry::snapshot).collect()
    }

    /// Earliest-enqueued `ready` entry. Entries below `ready` or in
    /// `error` are passed over but stay in place.
    fn next_ready(&self) -> Option<usize> {
        self.waiting.iter().position(|e| e.stage == Stage::Ready)
    }

    fn levels(&self) -> Vec<u8> {
        self.current
            .as_ref()
            .and_then(|e| e.frames.as_ref())
            .map(|f| {
                f.levels(self.clock.current_time().frame_index(f.frame_rate()))
                    .to_vec()
            })
            .unwrap_or_default()
    }
}

/// Single owner of the queue and the playback clock. All mutation goes
/// through these methods under one lock; events are published while the
/// lock is held so every session sees them in mutation order.
pub struct QueueManager {
    inner: Mutex<Inner>,
    pipeline: Pipeline,
    broadcaster: Arc<SessionBroadcaster>,
    settings: ManagerSettings,
    now_playing: watch::Sender<NowPlaying>,
    cancel_token: CancellationToken,
}

impl QueueManager {
    /// Create a queue manager
    ///
    /// # Arguments
    /// * `settings` - Clock and cleanup tunables
    /// * `pipeline` - Collaborators used to prepare each entry
    /// * `broadcaster` - Where session events are published
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    #[must_use]
    pub fn new(
        settings: ManagerSettings,
        pipeline: Pipeline,
        broadcaster: Arc<SessionBroadcaster>,
        cancel_token: Option<CancellationToken>,
    ) -> Arc<Self> {
        let (now_playing, _) = watch::channel(NowPlaying::default());
        Arc::new(Self {
            inner: Mutex::new(Inner {
                waiting: Vec::new(),
                current: None,
                clock: PlaybackClock::new(),
                last_tick: None,
                volume: settings.initial_volume.clamp(0.0, 1.0),
            }),
            pipeline,
            broadcaster,
            settings,
            now_playing,
            cancel_token: cancel_token.unwrap_or_default(),
        })
    }

    #[must_use]
    pub const fn broadcaster(&self) -> &Arc<SessionBroadcaster> {
        &self.broadcaster
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Get a clone of the cancellation token
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Frame streamer feed
    #[must_use]
    pub fn subscribe_now_playing(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing.subscribe()
    }

    /// Append a song and start preparing it in the background.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `source_ref` is blank.
    pub async fn enqueue(
        self: &Arc<Self>,
        source_ref: &str,
        added_by: Option<String>,
    ) -> Result<EntryId> {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() {
            return Err(CoreError::invalid_input("source reference is empty"));
        }
        if self.cancel_token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let cancel = self.cancel_token.child_token();
        let entry = QueueEntry::new(source_ref.to_string(), added_by, cancel.clone());
        let id = entry.id;
        info!(target: LOG_TARGET, %id, source = source_ref, by = %entry.added_by, "enqueued");

        {
            let mut inner = self.inner.lock().await;
            inner.waiting.push(entry);
            self.publish_queue(&inner);
        }

        let manager = Arc::clone(self);
        let source_ref = source_ref.to_string();
        tokio::spawn(async move {
            match manager.pipeline.run(&manager, id, &source_ref, &cancel).await {
                Ok(()) => {}
                Err(CoreError::Cancelled) => {
                    debug!(target: LOG_TARGET, %id, "pipeline cancelled");
                }
                Err(e) => manager.mark_failed(id, &e).await,
            }
        });
        Ok(id)
    }

    /// Remove a waiting entry at any stage. The current entry is never
    /// removed here; that is `skip`.
    pub async fn remove(&self, id: EntryId) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.waiting.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = inner.waiting.remove(index);
        entry.cancel.cancel();
        discard_audio(entry.local_audio_path);
        info!(target: LOG_TARGET, %id, stage = %entry.stage, "removed");
        self.publish_queue(&inner);
        true
    }

    /// Finish the current song now and promote the next ready entry.
    /// Returns false if nothing was playing.
    pub async fn skip(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current.is_none() {
            return false;
        }
        self.finish_current(&mut inner, true);
        true
    }

    /// Called when the clock reaches the end of the current song.
    pub async fn advance_on_finish(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current.is_none() {
            return false;
        }
        self.finish_current(&mut inner, false);
        true
    }

    /// Pause or resume without touching queue order. Returns whether the
    /// playback state changed.
    pub async fn toggle_playback(&self, playing: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.current.is_none() || !inner.clock.set_playing(playing) {
            return false;
        }
        if playing {
            inner.last_tick = Some(Instant::now());
        }
        info!(target: LOG_TARGET, playing, "playback toggled");
        self.broadcaster
            .publish(SessionEvent::PlaybackStateChanged { is_playing: playing });
        self.publish_now_playing(&inner);
        true
    }

    /// Store the advisory volume, clamped to `0.0..=1.0`
    pub async fn set_volume(&self, volume: f32) -> f32 {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        let mut inner = self.inner.lock().await;
        inner.volume = volume;
        self.broadcaster
            .publish(SessionEvent::VolumeChanged { volume });
        volume
    }

    /// Full state for a (re)connecting session
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        StateSnapshot {
            current: inner.current.as_ref().map(QueueEntry::snapshot),
            queue: inner.queue_snapshot(),
            is_playing: inner.clock.is_playing(),
            current_time: inner.clock.current_time().as_secs_f64(),
            duration: inner.clock.duration().as_secs_f64(),
            volume: inner.volume,
        }
    }

    pub async fn queue(&self) -> Vec<EntrySnapshot> {
        self.inner.lock().await.queue_snapshot()
    }

    pub async fn current_song(&self) -> Option<EntrySnapshot> {
        self.inner
            .lock()
            .await
            .current
            .as_ref()
            .map(QueueEntry::snapshot)
    }

    /// Downloaded audio of the current or a waiting entry
    pub async fn audio_path(&self, id: EntryId) -> Option<PathBuf> {
        let inner = self.inner.lock().await;
        inner
            .current
            .iter()
            .chain(inner.waiting.iter())
            .find(|e| e.id == id)
            .and_then(|e| e.local_audio_path.clone())
    }

    /// Start the playback clock ticker in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_clock().await;
        })
    }

    async fn run_clock(&self) {
        info!(target: LOG_TARGET, tick_ms = self.settings.clock_tick.as_millis_u64(), "playback clock started");
        let mut interval = tokio::time::interval(self.settings.clock_tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "playback clock shutting down");
                    break;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    /// Advance the clock by the time measured since the previous tick
    pub async fn tick(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let elapsed = inner
            .last_tick
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        inner.last_tick = Some(now);
        self.advance_locked(&mut inner, elapsed);
    }

    /// Advance the clock by a fixed amount
    pub async fn advance_clock(&self, elapsed: Duration) {
        let mut inner = self.inner.lock().await;
        inner.last_tick = Some(Instant::now());
        self.advance_locked(&mut inner, elapsed);
    }

    /// Cancel every pipeline and release all downloaded audio
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let mut inner = self.inner.lock().await;
        inner.clock.stop();
        let current = inner.current.take();
        for entry in current.into_iter().chain(inner.waiting.drain(..)) {
            discard_audio(entry.local_audio_path);
        }
        self.publish_now_playing(&inner);
        info!(target: LOG_TARGET, "queue shut down");
    }

    fn advance_locked(&self, inner: &mut Inner, elapsed: Duration) {
        let outcome = inner.clock.tick(elapsed);
        if outcome == TickOutcome::Idle {
            return;
        }
        if let Some(time) = inner.clock.time() {
            self.broadcaster.publish(SessionEvent::PlaybackTimeUpdate {
                song_id: time.song_id,
                current_time: time.current_time,
                duration: time.duration,
                levels: inner.levels(),
            });
        }
        self.publish_now_playing(inner);
        if outcome == TickOutcome::Finished {
            self.finish_current(inner, false);
        }
    }

    /// Mark the current entry finished, release it and promote the next
    fn finish_current(&self, inner: &mut Inner, skipped: bool) {
        let Some(mut entry) = inner.current.take() else {
            return;
        };
        entry.advance(Stage::Finished);
        inner.clock.stop();
        info!(target: LOG_TARGET, id = %entry.id, skipped, "song finished");
        self.broadcaster.publish(SessionEvent::SongFinished {
            song_id: entry.id,
            skipped,
        });
        if self.settings.delete_finished_audio {
            discard_audio(entry.local_audio_path.take());
        }

        if !self.promote(inner) {
            self.broadcaster
                .publish(SessionEvent::PlaybackStateChanged { is_playing: false });
            self.publish_now_playing(inner);
        }
    }

    /// Start the earliest ready entry if nothing is playing
    fn promote(&self, inner: &mut Inner) -> bool {
        if inner.current.is_some() {
            return false;
        }
        let Some(index) = inner.next_ready() else {
            return false;
        };
        let mut entry = inner.waiting.remove(index);
        entry.advance(Stage::Playing);
        let duration = entry
            .frames
            .as_ref()
            .map_or(Duration::ZERO, |f| frame_start(f.len(), f.frame_rate()));
        inner.clock.start(entry.id, duration);
        inner.last_tick = Some(Instant::now());
        info!(
            target: LOG_TARGET,
            id = %entry.id,
            duration_secs = duration.as_secs_f64(),
            "song started"
        );

        self.broadcaster.publish(SessionEvent::SongStarted {
            song: entry.snapshot(),
        });
        inner.current = Some(entry);
        self.broadcaster
            .publish(SessionEvent::PlaybackStateChanged { is_playing: true });
        self.publish_queue(inner);
        if let Some(time) = inner.clock.time() {
            self.broadcaster.publish(SessionEvent::PlaybackTimeUpdate {
                song_id: time.song_id,
                current_time: time.current_time,
                duration: time.duration,
                levels: inner.levels(),
            });
        }
        self.publish_now_playing(inner);
        true
    }

    fn publish_queue(&self, inner: &Inner) {
        self.broadcaster.publish(SessionEvent::QueueUpdated {
            queue: inner.queue_snapshot(),
        });
    }

    fn publish_now_playing(&self, inner: &Inner) {
        self.now_playing.send_replace(NowPlaying {
            song_id: inner.clock.song_id(),
            frames: inner.current.as_ref().and_then(|e| e.frames.clone()),
            position: inner.clock.current_time(),
            duration: inner.clock.duration(),
            is_playing: inner.clock.is_playing(),
            sampled_at: Some(Instant::now()),
        });
    }

    // Pipeline callbacks. Each returns false when the entry is gone so the
    // pipeline can stop.

    pub(crate) async fn begin_stage(&self, id: EntryId, stage: Stage) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return false;
        };
        if !entry.advance(stage) {
            return false;
        }
        debug!(target: LOG_TARGET, %id, %stage, "stage");
        self.broadcaster.publish(SessionEvent::SongProgress {
            song_id: id,
            stage,
            progress: 0,
        });
        true
    }

    pub(crate) async fn report_progress(&self, id: EntryId, progress: u8) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return;
        };
        if !entry.stage.is_processing() {
            return;
        }
        entry.progress = progress.min(100);
        self.broadcaster.publish(SessionEvent::SongProgress {
            song_id: id,
            stage: entry.stage,
            progress: entry.progress,
        });
    }

    pub(crate) async fn apply_metadata(&self, id: EntryId, metadata: TrackMetadata) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return;
        };
        entry.metadata = metadata;
        self.publish_queue(&inner);
    }

    pub(crate) async fn attach_audio(&self, id: EntryId, path: PathBuf) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return false;
        };
        entry.local_audio_path = Some(path);
        true
    }

    pub(crate) async fn mark_ready(&self, id: EntryId, frames: Arc<FrameSequence>) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return false;
        };
        let duration = frame_start(frames.len(), frames.frame_rate());
        entry.frames = Some(frames);
        if !entry.advance(Stage::Ready) {
            entry.frames = None;
            return false;
        }
        entry.metadata.duration = Some(duration.as_secs_f64());
        self.broadcaster.publish(SessionEvent::SongProgress {
            song_id: id,
            stage: Stage::Ready,
            progress: 100,
        });
        if !self.promote(&mut inner) {
            self.publish_queue(&inner);
        }
        true
    }

    pub(crate) async fn mark_failed(&self, id: EntryId, error: &CoreError) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.waiting_mut(id) else {
            return;
        };
        let reason = error.to_string();
        if !entry.fail(reason.clone()) {
            return;
        }
        let audio = entry.local_audio_path.take();
        warn!(target: LOG_TARGET, %id, category = ?error.category(), "{reason}");
        discard_audio(audio);
        self.broadcaster.publish(SessionEvent::SongError {
            song_id: id,
            error: reason,
        });
        self.publish_queue(&inner);
    }
}

/// Delete a downloaded file in the background
pub(crate) fn discard_audio(path: Option<PathBuf>) {
    let Some(path) = path else {
        return;
    };
    tokio::spawn(async move {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(target: LOG_TARGET, path = %path.display(), "audio removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(target: LOG_TARGET, path = %path.display(), "failed to remove audio: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collect_events, test_manager, wait_for_stage, wait_until};

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_rejects_empty() {
        let (manager, _catalog) = test_manager();
        let err = manager.enqueue("   ", None).await.err();
        assert!(matches!(err, Some(CoreError::InvalidInput { .. })));
        assert!(manager.queue().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_is_noop() {
        let (manager, catalog) = test_manager();
        catalog.hold("a");
        let a = manager.enqueue("a", None).await.unwrap();
        let b = manager.enqueue("b", Some("Kim".into())).await.unwrap();
        wait_for_stage(&manager, b, Stage::Playing).await;
        let before = manager.snapshot().await;

        assert!(!manager.remove(EntryId::from(u64::MAX)).await);
        // the current entry is not removable
        assert!(!manager.remove(b).await);

        let after = manager.snapshot().await;
        assert_eq!(before.queue, after.queue);
        assert_eq!(
            after.current.map(|c| (c.id, c.stage)),
            Some((b, Stage::Playing))
        );
        assert_eq!(after.queue[0].id, a);
        assert_eq!(after.queue[0].stage, Stage::Downloading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_pipeline() {
        let (manager, catalog) = test_manager();
        catalog.hold("a");
        let a = manager.enqueue("a", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Downloading).await;
        assert!(manager.remove(a).await);
        assert!(manager.queue().await.is_empty());
        // releasing the download afterwards must not resurrect the entry
        catalog.release("a");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.queue().await.is_empty());
        assert!(manager.current_song().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotes_earliest_ready() {
        let (manager, catalog) = test_manager();
        catalog.hold("slow");
        catalog.fail("broken");
        let slow = manager.enqueue("slow", None).await.unwrap();
        let broken = manager.enqueue("broken", None).await.unwrap();
        wait_for_stage(&manager, broken, Stage::Error).await;
        let first = manager.enqueue("first", None).await.unwrap();
        wait_for_stage(&manager, first, Stage::Playing).await;
        let second = manager.enqueue("second", None).await.unwrap();
        let third = manager.enqueue("third", None).await.unwrap();
        wait_for_stage(&manager, second, Stage::Ready).await;
        wait_for_stage(&manager, third, Stage::Ready).await;

        assert!(manager.skip().await);
        let current = manager.current_song().await.unwrap();
        assert_eq!(current.id, second);

        let queue = manager.snapshot().await.queue;
        let stages: Vec<(EntryId, Stage)> = queue.iter().map(|e| (e.id, e.stage)).collect();
        assert_eq!(
            stages,
            vec![
                (slow, Stage::Downloading),
                (broken, Stage::Error),
                (third, Stage::Ready)
            ]
        );
        assert!(queue[1].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_playing_entry() {
        let (manager, _catalog) = test_manager();
        for name in ["a", "b", "c", "d"] {
            manager.enqueue(name, None).await.unwrap();
        }
        wait_until(&manager, |s| {
            s.current.is_some() && s.queue.len() == 3 && s.queue.iter().all(|e| e.stage == Stage::Ready)
        })
        .await;
        for _ in 0..6 {
            let snapshot = manager.snapshot().await;
            let playing = snapshot
                .current
                .iter()
                .chain(snapshot.queue.iter())
                .filter(|e| e.stage == Stage::Playing)
                .count();
            assert!(playing <= 1);
            assert!(snapshot.queue.iter().all(|e| e.stage != Stage::Playing));
            manager.skip().await;
        }
        assert!(!manager.skip().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_song_plays_to_end_then_next() {
        let (manager, catalog) = test_manager();
        catalog.add("a", 10.0);
        catalog.hold("a");
        catalog.hold("b");
        let mut events = manager.broadcaster().subscribe();

        let a = manager.enqueue("a", None).await.unwrap();
        let b = manager.enqueue("b", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Downloading).await;
        // not promotable while downloading
        assert!(manager.current_song().await.is_none());

        catalog.release("a");
        wait_for_stage(&manager, a, Stage::Playing).await;
        let snapshot = manager.snapshot().await;
        assert!(snapshot.current_time.abs() < f64::EPSILON);
        assert!((snapshot.duration - 10.0).abs() < 1e-9);

        catalog.release("b");
        wait_for_stage(&manager, b, Stage::Ready).await;

        for _ in 0..39 {
            manager.advance_clock(Duration::from_millis(250)).await;
        }
        assert_eq!(manager.current_song().await.map(|c| c.id), Some(a));
        manager.advance_clock(Duration::from_millis(250)).await;
        let current = manager.current_song().await.unwrap();
        assert_eq!((current.id, current.stage), (b, Stage::Playing));

        let seen = collect_events(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::SongFinished { song_id, skipped: false } if *song_id == a
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_finishes_once_and_promotes() {
        let (manager, _catalog) = test_manager();
        let a = manager.enqueue("a", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Playing).await;
        let b = manager.enqueue("b", None).await.unwrap();
        wait_for_stage(&manager, b, Stage::Ready).await;
        manager.advance_clock(Duration::from_secs(1)).await;

        let mut events = manager.broadcaster().subscribe();
        assert!(manager.skip().await);
        let seen = collect_events(&mut events);
        let finished: Vec<&SessionEvent> = seen
            .iter()
            .filter(|e| matches!(e, SessionEvent::SongFinished { .. }))
            .collect();
        assert_eq!(
            finished,
            vec![&SessionEvent::SongFinished {
                song_id: a,
                skipped: true
            }]
        );
        let current = manager.current_song().await.unwrap();
        assert_eq!(current.id, b);
        assert_eq!(current.stage, Stage::Playing);
        assert!(manager.snapshot().await.current_time.abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_playback() {
        let (manager, catalog) = test_manager();
        catalog.add("a", 30.0);
        assert!(!manager.toggle_playback(false).await);
        let a = manager.enqueue("a", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Playing).await;

        assert!(manager.toggle_playback(false).await);
        manager.advance_clock(Duration::from_secs(3)).await;
        assert!(manager.snapshot().await.current_time.abs() < f64::EPSILON);
        assert!(!manager.toggle_playback(false).await);
        assert!(manager.toggle_playback(true).await);
        manager.advance_clock(Duration::from_secs(3)).await;
        assert!((manager.snapshot().await.current_time - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_in_order() {
        let (manager, _catalog) = test_manager();
        let mut events = manager.broadcaster().subscribe();
        let a = manager.enqueue("a", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Playing).await;

        let stages: Vec<(Stage, u8)> = collect_events(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::SongProgress {
                    song_id,
                    stage,
                    progress,
                } if song_id == a => Some((stage, progress)),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                (Stage::Downloading, 0),
                (Stage::Downloading, 10),
                (Stage::Downloading, 40),
                (Stage::Downloading, 90),
                (Stage::Analyzing, 0),
                (Stage::Generating, 0),
                (Stage::Ready, 100),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_long_song_fails() {
        let (manager, catalog) = test_manager();
        catalog.add("epic", 3600.0);
        let mut events = manager.broadcaster().subscribe();
        let id = manager.enqueue("epic", None).await.unwrap();
        wait_for_stage(&manager, id, Stage::Error).await;
        let seen = collect_events(&mut events);
        assert!(seen.iter().any(
            |e| matches!(e, SessionEvent::SongError { song_id, .. } if *song_id == id)
        ));
        // failed entries stay visible and removable
        assert_eq!(manager.queue().await.len(), 1);
        assert!(manager.remove(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_clamped() {
        let (manager, _catalog) = test_manager();
        assert!((manager.set_volume(1.7).await - 1.0).abs() < f32::EPSILON);
        assert!(manager.set_volume(-2.0).await.abs() < f32::EPSILON);
        assert!((manager.snapshot().await.volume).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_now_playing_tracks_current() {
        let (manager, _catalog) = test_manager();
        let rx = manager.subscribe_now_playing();
        assert!(rx.borrow().song_id.is_none());
        let a = manager.enqueue("a", None).await.unwrap();
        wait_for_stage(&manager, a, Stage::Playing).await;
        {
            let now = rx.borrow();
            assert_eq!(now.song_id, Some(a));
            assert!(now.frames.is_some());
            assert!(now.is_playing);
        }
        manager.skip().await;
        assert!(rx.borrow().frames.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_queue() {
        let (manager, catalog) = test_manager();
        catalog.hold("a");
        manager.enqueue("a", None).await.unwrap();
        manager.shutdown().await;
        assert!(manager.queue().await.is_empty());
        assert!(manager.enqueue("b", None).await.is_err());
    }
}
