//! Feature timeline produced by an analyzer.

use crate::time::DurationExt;
use std::time::Duration;

/// Audio features for one fixed-step analysis frame. Band energies are
/// normalized to `0.0..=1.0` across the whole song.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureFrame {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    /// Overall amplitude (RMS), normalized
    pub energy: f32,
    /// Onset detected at this frame
    pub beat: bool,
}

impl FeatureFrame {
    #[must_use]
    pub const fn new(bass: f32, mid: f32, treble: f32, energy: f32, beat: bool) -> Self {
        Self {
            bass,
            mid,
            treble,
            energy,
            beat,
        }
    }
}

/// Fixed-rate sequence of feature frames for a whole song.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTimeline {
    /// Feature frames per second
    pub frame_rate: u32,
    /// Estimated tempo, if the analyzer found one
    pub tempo_bpm: Option<f32>,
    pub frames: Vec<FeatureFrame>,
}

impl FeatureTimeline {
    #[must_use]
    pub const fn new(frame_rate: u32, frames: Vec<FeatureFrame>) -> Self {
        Self {
            frame_rate,
            tempo_bpm: None,
            frames,
        }
    }

    #[must_use]
    pub const fn with_tempo(mut self, bpm: f32) -> Self {
        self.tempo_bpm = Some(bpm);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Length of the analyzed audio
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.frame_rate == 0 {
            return Duration::ZERO;
        }
        crate::time::frame_start(self.frames.len(), self.frame_rate)
    }

    /// Feature frame covering `position`, clamped to the last frame
    #[must_use]
    pub fn frame_at(&self, position: Duration) -> Option<&FeatureFrame> {
        let last = self.frames.len().checked_sub(1)?;
        self.frames.get(position.frame_index(self.frame_rate).min(last))
    }
}
