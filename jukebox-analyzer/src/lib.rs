//! Concrete [`Analyzer`]: symphonia decoding plus FFT band energies and
//! spectral-flux beat tracking.

mod decode;
mod spectral;

pub use decode::{DecodedAudio, decode_file};
pub use spectral::{SpectralSettings, estimate_tempo, extract, normalize, pick_beats};

use async_trait::async_trait;
use jukebox_core::{Analyzer, AnalyzerConfig, CoreError, FeatureTimeline};
use std::path::Path;
use tracing::info;

const LOG_TARGET: &str = "jukebox::analyzer";

/// Decodes and analyzes on the blocking thread pool
#[derive(Debug, Clone, Default)]
pub struct SpectralAnalyzer {
    settings: SpectralSettings,
}

impl SpectralAnalyzer {
    #[must_use]
    pub const fn new(config: &AnalyzerConfig) -> Self {
        Self {
            settings: SpectralSettings::from_config(config),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &SpectralSettings {
        &self.settings
    }
}

#[async_trait]
impl Analyzer for SpectralAnalyzer {
    fn name(&self) -> &'static str {
        "spectral"
    }

    async fn analyze(&self, path: &Path) -> Result<FeatureTimeline, CoreError> {
        let path = path.to_path_buf();
        let settings = self.settings;
        let timeline = tokio::task::spawn_blocking(move || {
            let audio = decode_file(&path)?;
            extract(&audio.samples, audio.sample_rate, &settings)
        })
        .await
        .map_err(|e| CoreError::AnalysisDecode {
            reason: format!("analysis task failed: {e}"),
        })??;

        info!(
            target: LOG_TARGET,
            frames = timeline.len(),
            rate = timeline.frame_rate,
            tempo = ?timeline.tempo_bpm,
            beats = timeline.frames.iter().filter(|f| f.beat).count(),
            "analysis complete"
        );
        Ok(timeline)
    }
}
