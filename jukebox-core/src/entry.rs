//! Queue entries and their lifecycle stages.

use crate::lightshow::FrameSequence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Display name used when a request carries none
pub const ANONYMOUS: &str = "Anonymous";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique entry identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for EntryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Lifecycle phase of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Downloading,
    Analyzing,
    Generating,
    Ready,
    Playing,
    Finished,
    Error,
}

impl Stage {
    const fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Downloading => 1,
            Self::Analyzing => 2,
            Self::Generating => 3,
            Self::Ready => 4,
            Self::Playing => 5,
            Self::Finished | Self::Error => 6,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Whether `progress` is meaningful in this stage
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Downloading | Self::Analyzing | Self::Generating)
    }

    /// Forward-only progression; `Error` from any non-terminal stage
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Error) {
            return true;
        }
        next.rank() > self.rank()
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Analyzing => "analyzing",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Song metadata filled in by the resolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

impl TrackMetadata {
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// One song's lifecycle record. Owned by the queue manager.
#[derive(Debug)]
pub struct QueueEntry {
    pub(crate) id: EntryId,
    pub(crate) source_ref: String,
    pub(crate) metadata: TrackMetadata,
    pub(crate) added_by: String,
    pub(crate) added_at: DateTime<Utc>,
    pub(crate) stage: Stage,
    pub(crate) progress: u8,
    pub(crate) error: Option<String>,
    pub(crate) frames: Option<Arc<FrameSequence>>,
    pub(crate) local_audio_path: Option<PathBuf>,
    pub(crate) cancel: CancellationToken,
}

impl QueueEntry {
    pub(crate) fn new(source_ref: String, added_by: Option<String>, cancel: CancellationToken) -> Self {
        let added_by = added_by
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());
        Self {
            id: EntryId::next(),
            source_ref,
            metadata: TrackMetadata::default(),
            added_by,
            added_at: Utc::now(),
            stage: Stage::Queued,
            progress: 0,
            error: None,
            frames: None,
            local_audio_path: None,
            cancel,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntryId {
        self.id
    }

    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn frames(&self) -> Option<&Arc<FrameSequence>> {
        self.frames.as_ref()
    }

    /// Move to `next`, resetting progress. Returns false for a backwards or
    /// post-terminal transition, which is ignored.
    pub(crate) fn advance(&mut self, next: Stage) -> bool {
        if !self.stage.can_advance_to(next) {
            return false;
        }
        self.stage = next;
        self.progress = 0;
        true
    }

    pub(crate) fn fail(&mut self, reason: String) -> bool {
        if !self.advance(Stage::Error) {
            return false;
        }
        self.error = Some(reason);
        self.frames = None;
        true
    }

    /// Serializable view for UI sessions
    #[must_use]
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            source_ref: self.source_ref.clone(),
            title: self
                .metadata
                .title
                .clone()
                .unwrap_or_else(|| self.source_ref.clone()),
            artist: self.metadata.artist.clone(),
            duration: self.metadata.duration,
            thumbnail: self.metadata.thumbnail.clone(),
            added_by: self.added_by.clone(),
            added_at: self.added_at,
            stage: self.stage,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// Wire form of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub source_ref: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    pub stage: Stage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
