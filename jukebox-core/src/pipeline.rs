//! Per-entry background work: resolve, download, analyze, generate.

use crate::entry::{EntryId, Stage};
use crate::error::{CoreError, Result};
use crate::lightshow::LightShowGenerator;
use crate::manager::QueueManager;
use crate::provider::{Analyzer, Downloader, ResolvedSource, Resolver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const LOG_TARGET: &str = "jukebox::pipeline";

/// Collaborators and limits shared by every entry's pipeline
pub struct Pipeline {
    resolver: Arc<dyn Resolver>,
    downloader: Arc<dyn Downloader>,
    analyzer: Arc<dyn Analyzer>,
    generator: Arc<LightShowGenerator>,
    permits: Arc<Semaphore>,
    max_song_duration: Option<Duration>,
    progress_interval: Duration,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn Resolver>,
        downloader: Arc<dyn Downloader>,
        analyzer: Arc<dyn Analyzer>,
        generator: Arc<LightShowGenerator>,
    ) -> Self {
        Self {
            resolver,
            downloader,
            analyzer,
            generator,
            permits: Arc::new(Semaphore::new(2)),
            max_song_duration: None,
            progress_interval: Duration::from_secs(2),
        }
    }

    /// Bound the number of entries processed at once
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// Reject sources longer than `limit`
    #[must_use]
    pub const fn with_max_song_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_song_duration = limit;
        self
    }

    #[must_use]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    #[must_use]
    pub const fn generator(&self) -> &Arc<LightShowGenerator> {
        &self.generator
    }

    /// Drive one entry to `ready`. Returns `Cancelled` once the entry is
    /// removed or the token fires; any other error marks the entry failed.
    pub(crate) async fn run(
        &self,
        manager: &QueueManager,
        id: EntryId,
        source_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _permit = tokio::select! {
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| CoreError::Cancelled)?
            }
        };

        enter(manager, id, Stage::Downloading, cancel).await?;
        let source = self.resolve(source_ref, cancel).await?;
        manager.apply_metadata(id, source.metadata()).await;
        let path = self.download(manager, id, &source.locator, cancel).await?;
        if !manager.attach_audio(id, path.clone()).await {
            crate::manager::discard_audio(Some(path));
            return Err(CoreError::Cancelled);
        }

        enter(manager, id, Stage::Analyzing, cancel).await?;
        let timeline = tokio::select! {
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            timeline = self.analyzer.analyze(&path) => timeline?,
        };
        debug!(
            target: LOG_TARGET,
            %id,
            frames = timeline.len(),
            rate = timeline.frame_rate,
            "analysis complete"
        );

        enter(manager, id, Stage::Generating, cancel).await?;
        let generator = Arc::clone(&self.generator);
        let frames = tokio::task::spawn_blocking(move || generator.generate(&timeline))
            .await
            .map_err(|e| CoreError::AnalysisDecode {
                reason: format!("light show generation aborted: {e}"),
            })??;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        info!(target: LOG_TARGET, %id, frames = frames.len(), "light show ready");
        manager.mark_ready(id, Arc::new(frames)).await;
        Ok(())
    }

    async fn resolve(&self, source_ref: &str, cancel: &CancellationToken) -> Result<ResolvedSource> {
        let candidates = tokio::select! {
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            found = self.resolver.search_or_resolve(source_ref) => found?,
        };
        let source = candidates
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::ResolveNotFound {
                query: source_ref.to_string(),
            })?;

        if let (Some(limit), Some(secs)) = (self.max_song_duration, source.duration)
            && secs > limit.as_secs_f64()
        {
            return Err(CoreError::ResolveUnsupported {
                reason: format!("{secs:.0}s exceeds the {}s limit", limit.as_secs()),
            });
        }
        Ok(source)
    }

    async fn download(
        &self,
        manager: &QueueManager,
        id: EntryId,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stem = format!("song-{id}");
        let fetch = self.downloader.fetch(locator, &stem, tx);
        tokio::pin!(fetch);
        let mut throttle = ProgressThrottle::new(self.progress_interval);

        // Drain progress before looking at the result so the last update
        // is not lost
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                Some(pct) = rx.recv() => {
                    if let Some(pct) = throttle.update(pct, Instant::now()) {
                        manager.report_progress(id, pct).await;
                    }
                }
                result = &mut fetch => return result,
            }
        }
    }
}

/// Cancellation checkpoint between steps, then the stage transition
async fn enter(
    manager: &QueueManager,
    id: EntryId,
    stage: Stage,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() || !manager.begin_stage(id, stage).await {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}

/// Limits progress events to one per percent point, or one per interval
/// for slower movement. Progress never goes backwards.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    interval: Duration,
    last_pct: f32,
    last_whole: Option<u8>,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub(crate) const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pct: 0.0,
            last_whole: None,
            last_emit: None,
        }
    }

    pub(crate) fn update(&mut self, pct: f32, now: Instant) -> Option<u8> {
        if !pct.is_finite() {
            return None;
        }
        let pct = pct.clamp(0.0, 100.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = pct.floor() as u8;
        if self.last_whole.is_some_and(|last| whole <= last) {
            return None;
        }
        let moved = pct - self.last_pct;
        let due = self
            .last_emit
            .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
        if moved < 1.0 && !due {
            return None;
        }
        self.last_pct = pct;
        self.last_whole = Some(whole);
        self.last_emit = Some(now);
        Some(whole)
    }
}
