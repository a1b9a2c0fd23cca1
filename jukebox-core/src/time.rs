//! Time and frame-index conversion utilities.
//!
//! Frame arithmetic is done on integer milliseconds so that every pattern,
//! the streamer and the tests agree on exactly one rounding rule.

use std::time::Duration;

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Index of the frame showing at this playback position, i.e.
    /// `floor(position * frame_rate)`.
    fn frame_index(&self, frame_rate: u32) -> usize;

    /// Number of frames covering a song of this length at `frame_rate`,
    /// i.e. `round(duration * frame_rate)`, never less than one.
    fn frame_count(&self, frame_rate: u32) -> usize;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn frame_index(&self, frame_rate: u32) -> usize {
        let scaled = self.as_millis().saturating_mul(u128::from(frame_rate)) / 1000;
        usize::try_from(scaled).unwrap_or(usize::MAX)
    }

    fn frame_count(&self, frame_rate: u32) -> usize {
        let scaled = (self.as_millis().saturating_mul(u128::from(frame_rate)) + 500) / 1000;
        usize::try_from(scaled).unwrap_or(usize::MAX).max(1)
    }
}

/// Playback position of the start of `index` at `frame_rate`.
#[must_use]
pub fn frame_start(index: usize, frame_rate: u32) -> Duration {
    if frame_rate == 0 {
        return Duration::ZERO;
    }
    let millis = (index as u128).saturating_mul(1000) / u128::from(frame_rate);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
