//! Collaborator contracts for media lookup, download and analysis.

use crate::entry::TrackMetadata;
use crate::error::CoreError;
use crate::features::FeatureTimeline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// A candidate audio source returned by a resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSource {
    /// Fetchable media locator (usually a page URL)
    pub locator: String,
    pub title: String,
    pub artist: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

impl ResolvedSource {
    pub fn new(locator: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            artist: None,
            duration: None,
            thumbnail: None,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    #[must_use]
    pub const fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    #[must_use]
    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail = Some(url.into());
        self
    }

    #[must_use]
    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: Some(self.title.clone()),
            artist: self.artist.clone(),
            duration: self.duration,
            thumbnail: self.thumbnail.clone(),
        }
    }
}

/// Download progress in percent (0.0-100.0)
pub type ProgressSender = mpsc::UnboundedSender<f32>;

/// Media lookup (URL or free-text search)
#[async_trait]
pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve a URL to one source, or search free text for candidates.
    ///
    /// # Errors
    ///
    /// `ResolveNotFound`, `ResolveNetwork` or `ResolveUnsupported`.
    async fn search_or_resolve(&self, query_or_url: &str) -> Result<Vec<ResolvedSource>, CoreError>;
}

/// Fetch and transcode media to a local audio file
#[async_trait]
pub trait Downloader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Download `locator` into a file named after `file_stem`, reporting
    /// progress as it goes.
    ///
    /// # Errors
    ///
    /// `DownloadNetwork` or `DownloadFormat`.
    async fn fetch(
        &self,
        locator: &str,
        file_stem: &str,
        progress: ProgressSender,
    ) -> Result<PathBuf, CoreError>;
}

/// Turn a decoded audio file into a feature timeline
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// `AnalysisDecode` when the file cannot be decoded.
    async fn analyze(&self, path: &Path) -> Result<FeatureTimeline, CoreError>;
}
