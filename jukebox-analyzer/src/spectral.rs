//! Band energies, loudness and onsets from a mono signal.
//!
//! One analysis frame per timeline step: a Hann-windowed FFT starting at
//! the step gives the bass, mid and treble energies, RMS over the step
//! gives the loudness, and positive spectral flux between steps drives
//! beat detection. Every feature is scaled over the song between its
//! minimum and a high percentile, so a single transient does not flatten
//! everything else.

use jukebox_core::time::DurationExt;
use jukebox_core::{AnalyzerConfig, CoreError, FeatureFrame, FeatureTimeline};
use rustfft::{FftPlanner, num_complex::Complex};
use std::time::Duration;

const BASS_HZ: (f32, f32) = (20.0, 250.0);
const MID_HZ: (f32, f32) = (250.0, 2000.0);
const TREBLE_HZ: (f32, f32) = (2000.0, 8000.0);

/// Shortest spacing between two beats
const MIN_BEAT_GAP_SECS: f32 = 0.1;
/// Half-width of the adaptive onset threshold window
const THRESHOLD_WINDOW_SECS: f32 = 0.5;
/// Onsets weaker than this fraction of the strongest one are ignored
const NOISE_FLOOR: f32 = 0.05;
/// Beats needed before a tempo is reported
const MIN_TEMPO_BEATS: usize = 4;
/// Values above this percentile of a series saturate at 1.0
const NORMALIZE_PERCENTILE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSettings {
    pub timeline_rate: u32,
    pub fft_size: usize,
    /// Standard deviations above the local mean flux for an onset
    pub beat_sensitivity: f32,
}

impl SpectralSettings {
    #[must_use]
    pub const fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            timeline_rate: config.timeline_rate,
            fft_size: config.fft_size,
            beat_sensitivity: config.beat_sensitivity,
        }
    }
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

/// Inclusive FFT bin range for a frequency band
#[derive(Debug, Clone, Copy)]
struct Band {
    lo: usize,
    hi: usize,
}

impl Band {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn new((lo_hz, hi_hz): (f32, f32), bin_hz: f32, bins: usize) -> Self {
        let lo = (lo_hz / bin_hz).ceil().max(0.0) as usize;
        let hi = ((hi_hz / bin_hz).floor() as usize).min(bins.saturating_sub(1));
        Self { lo, hi }
    }

    fn energy(self, magnitudes: &[f32]) -> f32 {
        if self.lo > self.hi {
            return 0.0;
        }
        magnitudes
            .get(self.lo..=self.hi)
            .map_or(0.0, |m| m.iter().sum())
    }
}

fn hann(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    #[allow(clippy::cast_precision_loss)]
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32 / denom;
            0.5 * (1.0 - (std::f32::consts::TAU * x).cos())
        })
        .collect()
}

/// Build the feature timeline for a whole song.
///
/// # Errors
///
/// Returns `AnalysisDecode` for an empty signal.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn extract(
    samples: &[f32],
    sample_rate: u32,
    settings: &SpectralSettings,
) -> Result<FeatureTimeline, CoreError> {
    if samples.is_empty() || sample_rate == 0 {
        return Err(CoreError::AnalysisDecode {
            reason: "no samples to analyze".to_string(),
        });
    }
    let rate = settings.timeline_rate.max(1);
    let fft_size = settings.fft_size.max(2);
    let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate));
    let count = duration.frame_count(rate);
    let hop = f64::from(sample_rate) / f64::from(rate);
    let step = (hop.ceil() as usize).max(1);

    let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
    let window = hann(fft_size);
    let bins = fft_size / 2 + 1;
    let bin_hz = sample_rate as f32 / fft_size as f32;
    let bass_band = Band::new(BASS_HZ, bin_hz, bins);
    let mid_band = Band::new(MID_HZ, bin_hz, bins);
    let treble_band = Band::new(TREBLE_HZ, bin_hz, bins);
    let flux_bins = treble_band.hi + 1;

    let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
    let mut magnitudes = vec![0.0f32; bins];
    let mut previous = vec![0.0f32; bins];
    let mut bass = Vec::with_capacity(count);
    let mut mid = Vec::with_capacity(count);
    let mut treble = Vec::with_capacity(count);
    let mut energy = Vec::with_capacity(count);
    let mut flux: Vec<f32> = Vec::with_capacity(count);

    for k in 0..count {
        let start = (k as f64 * hop).round() as usize;
        for (i, (slot, w)) in buffer.iter_mut().zip(&window).enumerate() {
            let sample = samples.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * w, 0.0);
        }
        fft.process(&mut buffer);
        for (m, c) in magnitudes.iter_mut().zip(&buffer) {
            *m = c.norm();
        }

        bass.push(bass_band.energy(&magnitudes));
        mid.push(mid_band.energy(&magnitudes));
        treble.push(treble_band.energy(&magnitudes));
        energy.push(rms(samples, start, step));
        flux.push(
            magnitudes[..flux_bins]
                .iter()
                .zip(&previous[..flux_bins])
                .map(|(now, before)| (now - before).max(0.0))
                .sum(),
        );
        previous.copy_from_slice(&magnitudes);
    }

    let beats = pick_beats(&flux, rate, settings.beat_sensitivity);
    let tempo = estimate_tempo(&beats, rate);
    for series in [&mut bass, &mut mid, &mut treble, &mut energy] {
        normalize(series);
    }

    let frames = (0..count)
        .map(|k| FeatureFrame::new(bass[k], mid[k], treble[k], energy[k], beats[k]))
        .collect();
    let timeline = FeatureTimeline::new(rate, frames);
    Ok(match tempo {
        Some(bpm) => timeline.with_tempo(bpm),
        None => timeline,
    })
}

fn rms(samples: &[f32], start: usize, len: usize) -> f32 {
    let end = (start + len).min(samples.len());
    let Some(chunk) = samples.get(start..end).filter(|c| !c.is_empty()) else {
        return 0.0;
    };
    #[allow(clippy::cast_precision_loss)]
    let mean_square = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
    mean_square.sqrt()
}

/// Scale into `0.0..=1.0` against the minimum and the
/// [`NORMALIZE_PERCENTILE`] value, clamping above it. A flat series
/// becomes all zeros.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn normalize(values: &mut [f32]) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let mut sorted = values.to_vec();
    let top = if sorted.is_empty() {
        f32::NEG_INFINITY
    } else {
        let rank = ((sorted.len() - 1) as f32 * NORMALIZE_PERCENTILE).round() as usize;
        *sorted.select_nth_unstable_by(rank, f32::total_cmp).1
    };
    let range = top - min;
    if !range.is_finite() || range <= f32::EPSILON {
        values.fill(0.0);
        return;
    }
    for v in values {
        *v = ((*v - min) / range).clamp(0.0, 1.0);
    }
}

/// Peak-pick the onset curve against an adaptive threshold of
/// `local mean + sensitivity * local std`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn pick_beats(flux: &[f32], rate: u32, sensitivity: f32) -> Vec<bool> {
    let n = flux.len();
    let mut beats = vec![false; n];
    let peak = flux.iter().copied().fold(0.0f32, f32::max);
    if peak <= f32::EPSILON {
        return beats;
    }
    let rate = rate as f32;
    let half = ((THRESHOLD_WINDOW_SECS * rate) as usize).max(1);
    let gap = ((MIN_BEAT_GAP_SECS * rate).ceil() as usize).max(1);

    let mut sum = vec![0.0f64; n + 1];
    let mut sum_sq = vec![0.0f64; n + 1];
    for (i, &f) in flux.iter().enumerate() {
        sum[i + 1] = sum[i] + f64::from(f);
        sum_sq[i + 1] = sum_sq[i] + f64::from(f) * f64::from(f);
    }

    let mut last_beat: Option<usize> = None;
    for k in 0..n {
        let value = flux[k];
        if value < NOISE_FLOOR * peak {
            continue;
        }
        let lo = k.saturating_sub(half);
        let hi = (k + half + 1).min(n);
        let width = (hi - lo) as f64;
        let mean = (sum[hi] - sum[lo]) / width;
        let variance = ((sum_sq[hi] - sum_sq[lo]) / width - mean * mean).max(0.0);
        let threshold = mean + f64::from(sensitivity) * variance.sqrt();
        if f64::from(value) < threshold {
            continue;
        }
        let rising = k == 0 || value > flux[k - 1];
        let local_max = flux[k.saturating_sub(2)..(k + 3).min(n)]
            .iter()
            .all(|&f| f <= value);
        let spaced = last_beat.is_none_or(|b| k - b >= gap);
        if rising && local_max && spaced {
            beats[k] = true;
            last_beat = Some(k);
        }
    }
    beats
}

/// Median inter-beat interval as BPM, folded into `60..200`
#[allow(clippy::cast_precision_loss)]
pub fn estimate_tempo(beats: &[bool], rate: u32) -> Option<f32> {
    let positions: Vec<usize> = beats
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| b.then_some(i))
        .collect();
    if positions.len() < MIN_TEMPO_BEATS {
        return None;
    }
    let mut intervals: Vec<usize> = positions.windows(2).map(|w| w[1] - w[0]).collect();
    intervals.sort_unstable();
    let median = intervals[intervals.len() / 2];
    if median == 0 {
        return None;
    }
    let mut bpm = 60.0 * rate as f32 / median as f32;
    while bpm < 60.0 {
        bpm *= 2.0;
    }
    while bpm >= 200.0 {
        bpm /= 2.0;
    }
    Some(bpm)
}
