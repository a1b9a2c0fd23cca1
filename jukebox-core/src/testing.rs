//! Scripted collaborators and sinks shared by the unit tests.

use crate::broadcaster::{SessionBroadcaster, SessionEvent, StateSnapshot};
use crate::config::{LightShowConfig, StripConfig};
use crate::entry::{EntryId, Stage};
use crate::error::{CoreError, Result};
use crate::features::{FeatureFrame, FeatureTimeline};
use crate::layout::StripLayout;
use crate::lightshow::{FrameSequence, LightShowGenerator, PatternKind};
use crate::manager::{ManagerSettings, QueueManager};
use crate::pipeline::Pipeline;
use crate::provider::{Analyzer, Downloader, ProgressSender, ResolvedSource, Resolver};
use crate::streamer::FrameSink;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

const RATE: u32 = 20;
const DEFAULT_SECS: f64 = 2.0;

/// Songs known to the fake collaborators, keyed by source ref
#[derive(Default)]
pub struct Catalog {
    durations: Mutex<HashMap<String, f64>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl Catalog {
    pub fn add(&self, name: &str, secs: f64) {
        self.durations.lock().unwrap().insert(name.into(), secs);
    }

    /// Make downloads of `name` fail
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.into());
    }

    /// Block downloads of `name` until released
    pub fn hold(&self, name: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(Notify::new()));
    }

    pub fn release(&self, name: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(name) {
            gate.notify_one();
        }
    }

    pub fn duration(&self, name: &str) -> f64 {
        self.durations
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(DEFAULT_SECS)
    }

    fn gate(&self, name: &str) -> Option<Arc<Notify>> {
        self.gates.lock().unwrap().get(name).cloned()
    }

    fn fails(&self, name: &str) -> bool {
        self.failing.lock().unwrap().contains(name)
    }
}

struct FakeResolver(Arc<Catalog>);

#[async_trait]
impl Resolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search_or_resolve(&self, query: &str) -> Result<Vec<ResolvedSource>> {
        Ok(vec![
            ResolvedSource::new(query, query).with_duration(self.0.duration(query)),
        ])
    }
}

struct FakeDownloader(Arc<Catalog>);

#[async_trait]
impl Downloader for FakeDownloader {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, locator: &str, _stem: &str, progress: ProgressSender) -> Result<PathBuf> {
        if let Some(gate) = self.0.gate(locator) {
            gate.notified().await;
        }
        if self.0.fails(locator) {
            return Err(CoreError::DownloadNetwork {
                reason: "connection reset".into(),
            });
        }
        for pct in [10.0, 40.0, 90.0] {
            let _ = progress.send(pct);
            tokio::task::yield_now().await;
        }
        Ok(std::env::temp_dir()
            .join("jukebox-core-tests")
            .join(format!("{locator}.mp3")))
    }
}

struct FakeAnalyzer(Arc<Catalog>);

#[async_trait]
impl Analyzer for FakeAnalyzer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn analyze(&self, path: &Path) -> Result<FeatureTimeline> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Ok(timeline(self.0.duration(name), RATE))
    }
}

/// A timeline with a beat every half second
pub fn timeline(secs: f64, rate: u32) -> FeatureTimeline {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = (secs * f64::from(rate)).round() as usize;
    let frames = (0..count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let phase = (i % 10) as f32 / 10.0;
            FeatureFrame::new(1.0 - phase, 0.5, phase, 0.6, i % 10 == 0)
        })
        .collect();
    FeatureTimeline::new(rate, frames).with_tempo(120.0)
}

fn generator() -> Arc<LightShowGenerator> {
    let layout = StripLayout::new(&[
        StripConfig::new(0, "left", 6, PatternKind::Spectrum),
        StripConfig::new(1, "right", 6, PatternKind::Chase),
    ]);
    let style = LightShowConfig {
        frame_rate: RATE,
        ..LightShowConfig::default()
    };
    Arc::new(LightShowGenerator::new(layout, style))
}

/// Precomputed frames for a song of `secs` seconds
pub fn frame_sequence(secs: f64, rate: u32) -> Arc<FrameSequence> {
    Arc::new(generator().generate(&timeline(secs, rate)).unwrap())
}

pub fn test_manager() -> (Arc<QueueManager>, Arc<Catalog>) {
    let catalog = Arc::new(Catalog::default());
    let pipeline = Pipeline::new(
        Arc::new(FakeResolver(Arc::clone(&catalog))),
        Arc::new(FakeDownloader(Arc::clone(&catalog))),
        Arc::new(FakeAnalyzer(Arc::clone(&catalog))),
        generator(),
    )
    .with_max_concurrent(2)
    .with_max_song_duration(Some(Duration::from_secs(600)));
    let manager = QueueManager::new(
        ManagerSettings::default(),
        pipeline,
        SessionBroadcaster::new(1024),
        None,
    );
    (manager, catalog)
}

/// Poll the manager until `done` holds
pub async fn wait_until(manager: &QueueManager, done: impl Fn(&StateSnapshot) -> bool) {
    for _ in 0..20_000 {
        if done(&manager.snapshot().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never reached: {:?}", manager.snapshot().await);
}

pub async fn wait_for_stage(manager: &QueueManager, id: EntryId, stage: Stage) {
    wait_until(manager, |s| {
        s.current
            .iter()
            .chain(s.queue.iter())
            .any(|e| e.id == id && e.stage == stage)
    })
    .await;
}

/// Everything published so far, without waiting
pub fn collect_events(rx: &mut broadcast::Receiver<Arc<SessionEvent>>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}

/// Records when each frame arrived
pub struct RecordingSink {
    name: String,
    stamps: Mutex<Vec<Instant>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            stamps: Mutex::new(Vec::new()),
        }
    }

    pub fn timestamps(&self) -> Vec<Instant> {
        self.stamps.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, _frame: Bytes) -> Result<()> {
        self.stamps.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

/// Accepts a frame and never finishes writing it
pub struct HangingSink {
    name: String,
    calls: AtomicUsize,
}

impl HangingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for HangingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, _frame: Bytes) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}
