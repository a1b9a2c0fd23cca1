//! In-memory collaborators for handler tests.

use crate::app::AppState;
use async_trait::async_trait;
use jukebox_core::{
    Analyzer, CoreError, Downloader, FeatureTimeline, LightShowConfig, LightShowGenerator,
    ManagerSettings, PatternKind, Pipeline, ProgressSender, QueueManager, ResolvedSource, Resolver,
    SessionBroadcaster, StripConfig, StripLayout,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves anything except `"missing"` to a five second song
pub struct StaticResolver;

#[async_trait]
impl Resolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search_or_resolve(&self, query: &str) -> Result<Vec<ResolvedSource>, CoreError> {
        if query == "missing" {
            return Err(CoreError::ResolveNotFound {
                query: query.to_string(),
            });
        }
        Ok(vec![
            ResolvedSource::new(query, format!("Song {query}")).with_duration(5.0),
        ])
    }
}

/// Never finishes, so entries stay in `downloading`
pub struct StalledDownloader;

#[async_trait]
impl Downloader for StalledDownloader {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn fetch(
        &self,
        _locator: &str,
        _file_stem: &str,
        _progress: ProgressSender,
    ) -> Result<PathBuf, CoreError> {
        std::future::pending().await
    }
}

pub struct FailingAnalyzer;

#[async_trait]
impl Analyzer for FailingAnalyzer {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn analyze(&self, _path: &Path) -> Result<FeatureTimeline, CoreError> {
        Err(CoreError::AnalysisDecode {
            reason: "not audio".into(),
        })
    }
}

pub fn test_state() -> AppState {
    let strips = vec![StripConfig::new(1, "test", 4, PatternKind::Spectrum)];
    let generator = Arc::new(LightShowGenerator::new(
        StripLayout::new(&strips),
        LightShowConfig::default(),
    ));
    let pipeline = Pipeline::new(
        Arc::new(StaticResolver),
        Arc::new(StalledDownloader),
        Arc::new(FailingAnalyzer),
        generator,
    );
    let manager = QueueManager::new(
        ManagerSettings::default(),
        pipeline,
        SessionBroadcaster::new(64),
        None,
    );
    AppState {
        manager,
        sink_count: 0,
    }
}
