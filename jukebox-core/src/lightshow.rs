//! Feature timeline to LED frame conversion.
//!
//! Each pattern is a pure function of the timeline, the strip length and the
//! output frame rate. All patterns share [`output_frame_count`] so one frame
//! index addresses every strip of a song.

use crate::config::LightShowConfig;
use crate::error::{CoreError, Result};
use crate::features::{FeatureFrame, FeatureTimeline};
use crate::layout::StripLayout;
use crate::protocol::encode_frame;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Three bands colored by bass, mid and treble energy
    #[default]
    Spectrum,
    /// Travelling sine envelope scaled by overall energy
    Wave,
    /// Whole strip flashes on beats and decays in between
    Pulse,
    /// A short lit segment running along the strip
    Chase,
}

impl PatternKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spectrum => "spectrum",
            Self::Wave => "wave",
            Self::Pulse => "pulse",
            Self::Chase => "chase",
        }
    }

    /// Render `strip_len` LEDs for every output frame
    #[must_use]
    pub fn render(
        self,
        timeline: &FeatureTimeline,
        strip_len: usize,
        frame_rate: u32,
        style: &LightShowConfig,
    ) -> Vec<Vec<Rgb>> {
        match self {
            Self::Spectrum => spectrum(timeline, strip_len, frame_rate, style),
            Self::Wave => wave(timeline, strip_len, frame_rate, style),
            Self::Pulse => pulse(timeline, strip_len, frame_rate, style),
            Self::Chase => chase(timeline, strip_len, frame_rate, style),
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0 };

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from unit-range channels
    #[must_use]
    pub fn from_unit(r: f32, g: f32, b: f32) -> Self {
        Self::new(channel(r), channel(g), channel(b))
    }

    /// Perceived brightness in `0..=255`
    #[must_use]
    pub fn brightness(self) -> u8 {
        self.r.max(self.g).max(self.b)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[allow(clippy::cast_precision_loss)]
fn as_f32(n: usize) -> f32 {
    n as f32
}

#[allow(clippy::cast_precision_loss)]
fn rate_f32(frame_rate: u32) -> f32 {
    frame_rate.max(1) as f32
}

/// Output frames for `n` timeline frames at `in_rate` rendered at
/// `out_rate`: `round(n * out_rate / in_rate)`, at least one for a
/// non-empty timeline.
#[must_use]
pub fn output_frame_count(n: usize, in_rate: u32, out_rate: u32) -> usize {
    if n == 0 || in_rate == 0 || out_rate == 0 {
        return 0;
    }
    let n = n as u128;
    let scaled = (n * u128::from(out_rate) * 2 + u128::from(in_rate)) / (u128::from(in_rate) * 2);
    usize::try_from(scaled).unwrap_or(usize::MAX).max(1)
}

/// Features for each output frame. When several timeline frames fall into
/// one output frame their bands are averaged and any beat is kept.
fn resample(timeline: &FeatureTimeline, out_rate: u32) -> Vec<FeatureFrame> {
    let n = timeline.frames.len();
    let count = output_frame_count(n, timeline.frame_rate, out_rate);
    let in_rate = u128::from(timeline.frame_rate);
    let out_rate = u128::from(out_rate);
    let index = |k: usize| usize::try_from(k as u128 * in_rate / out_rate).unwrap_or(usize::MAX);

    (0..count)
        .map(|k| {
            let start = index(k).min(n - 1);
            let end = index(k + 1).clamp(start + 1, n);
            let window = &timeline.frames[start..end];
            let len = as_f32(window.len());
            let sum = window.iter().fold(FeatureFrame::default(), |acc, f| {
                FeatureFrame::new(
                    acc.bass + f.bass,
                    acc.mid + f.mid,
                    acc.treble + f.treble,
                    acc.energy + f.energy,
                    acc.beat || f.beat,
                )
            });
            FeatureFrame::new(
                sum.bass / len,
                sum.mid / len,
                sum.treble / len,
                sum.energy / len,
                sum.beat,
            )
        })
        .collect()
}

/// Red for bass, green for mid, blue for treble, scaled so the dominant
/// band is at full intensity
fn base_color(f: &FeatureFrame) -> (f32, f32, f32) {
    let peak = f.bass.max(f.mid).max(f.treble);
    if peak <= f32::EPSILON {
        return (1.0, 1.0, 1.0);
    }
    (f.bass / peak, f.mid / peak, f.treble / peak)
}

fn beat_gain(f: &FeatureFrame, style: &LightShowConfig) -> f32 {
    if f.beat { style.beat_brightness } else { 1.0 }
}

#[must_use]
pub fn spectrum(
    timeline: &FeatureTimeline,
    strip_len: usize,
    frame_rate: u32,
    style: &LightShowConfig,
) -> Vec<Vec<Rgb>> {
    // rounding up keeps bass and mid visible on strips shorter than three
    let bass_end = strip_len.div_ceil(3);
    let mid_end = (strip_len * 2).div_ceil(3);
    resample(timeline, frame_rate)
        .iter()
        .map(|f| {
            let gain = beat_gain(f, style);
            let bass = Rgb::from_unit(f.bass.sqrt() * gain, 0.0, 0.0);
            let mid = Rgb::from_unit(0.0, f.mid.sqrt() * gain, 0.0);
            let treble = Rgb::from_unit(0.0, 0.0, f.treble.sqrt() * gain);
            (0..strip_len)
                .map(|i| match i {
                    i if i < bass_end => bass,
                    i if i < mid_end => mid,
                    _ => treble,
                })
                .collect()
        })
        .collect()
}

#[must_use]
pub fn wave(
    timeline: &FeatureTimeline,
    strip_len: usize,
    frame_rate: u32,
    style: &LightShowConfig,
) -> Vec<Vec<Rgb>> {
    let wavelength = as_f32((strip_len / 4).max(1));
    let dt = 1.0 / f64::from(frame_rate.max(1));
    resample(timeline, frame_rate)
        .iter()
        .enumerate()
        .map(|(k, f)| {
            // Phase from cumulative time, wrapped before narrowing to f32
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let shift = ((k as f64 * dt * f64::from(style.wave_speed)).fract()) as f32;
            let amplitude = f.energy.sqrt() * beat_gain(f, style);
            let (r, g, b) = base_color(f);
            (0..strip_len)
                .map(|i| {
                    let phase = (as_f32(i) / wavelength - shift) * TAU;
                    let level = (phase.sin() + 1.0) / 2.0 * amplitude;
                    Rgb::from_unit(r * level, g * level, b * level)
                })
                .collect()
        })
        .collect()
}

#[must_use]
pub fn pulse(
    timeline: &FeatureTimeline,
    strip_len: usize,
    frame_rate: u32,
    style: &LightShowConfig,
) -> Vec<Vec<Rgb>> {
    let decay = (-style.pulse_decay_per_sec / rate_f32(frame_rate)).exp();
    let mut level = 0.0_f32;
    resample(timeline, frame_rate)
        .iter()
        .map(|f| {
            level = if f.beat { 1.0 } else { level * decay };
            let floor = 0.2 * f.energy.sqrt();
            let brightness = level.max(floor);
            let (r, g, b) = base_color(f);
            vec![Rgb::from_unit(r * brightness, g * brightness, b * brightness); strip_len]
        })
        .collect()
}

#[must_use]
pub fn chase(
    timeline: &FeatureTimeline,
    strip_len: usize,
    frame_rate: u32,
    style: &LightShowConfig,
) -> Vec<Vec<Rgb>> {
    let frames = resample(timeline, frame_rate);
    if strip_len == 0 {
        return vec![Vec::new(); frames.len()];
    }
    let len = as_f32(strip_len);
    let tail = usize::from(style.chase_length).clamp(1, strip_len);
    let tempo_factor = timeline.tempo_bpm.map_or(1.0, |bpm| (bpm / 120.0).clamp(0.25, 4.0));
    let mut head = 0.0_f32;

    frames
        .iter()
        .map(|f| {
            let laps_per_sec = style.chase_speed * tempo_factor * (0.25 + f.energy);
            head = (head + laps_per_sec * len / rate_f32(frame_rate)).rem_euclid(len);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let head_index = (head as usize).min(strip_len - 1);

            let (r, g, b) = base_color(f);
            let dim = 0.1 * f.energy.sqrt();
            let mut leds = vec![Rgb::from_unit(r * dim, g * dim, b * dim); strip_len];
            for d in 0..tail {
                let level = (1.0 - as_f32(d) / as_f32(tail)) * beat_gain(f, style);
                let idx = (head_index + strip_len - d) % strip_len;
                leds[idx] = Rgb::from_unit(r * level, g * level, b * level);
            }
            leds
        })
        .collect()
}

/// Precomputed wire frames for one song. Immutable once built.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frame_rate: u32,
    led_count: usize,
    frames: Vec<Bytes>,
    levels: Vec<Vec<u8>>,
}

impl FrameSequence {
    #[must_use]
    pub const fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    #[must_use]
    pub const fn led_count(&self) -> usize {
        self.led_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Clamp an index into `0..len`
    #[must_use]
    pub fn clamp_index(&self, index: usize) -> usize {
        index.min(self.frames.len().saturating_sub(1))
    }

    /// Encoded wire frame at `index`, clamped to the last frame
    #[must_use]
    pub fn frame(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(self.clamp_index(index))
    }

    /// Mean brightness per strip (0-100) at `index`, clamped
    #[must_use]
    pub fn levels(&self, index: usize) -> &[u8] {
        self.levels
            .get(self.clamp_index(index))
            .map_or(&[], Vec::as_slice)
    }
}

/// Renders every configured strip and packs the result into wire frames
#[derive(Debug, Clone)]
pub struct LightShowGenerator {
    layout: StripLayout,
    frame_rate: u32,
    style: LightShowConfig,
}

impl LightShowGenerator {
    #[must_use]
    pub fn new(layout: StripLayout, style: LightShowConfig) -> Self {
        Self {
            layout,
            frame_rate: style.frame_rate,
            style,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &StripLayout {
        &self.layout
    }

    #[must_use]
    pub const fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Run every strip's pattern over the timeline.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisDecode` for an empty timeline and `FrameEncode`
    /// when the layout does not fit the wire format.
    pub fn generate(&self, timeline: &FeatureTimeline) -> Result<FrameSequence> {
        if timeline.is_empty() || timeline.frame_rate == 0 {
            return Err(CoreError::AnalysisDecode {
                reason: "analyzer produced no feature frames".to_string(),
            });
        }
        let count = output_frame_count(timeline.len(), timeline.frame_rate, self.frame_rate);
        let rendered: Vec<Vec<Vec<Rgb>>> = self
            .layout
            .strips()
            .iter()
            .map(|s| s.pattern.render(timeline, s.len, self.frame_rate, &self.style))
            .collect();

        let led_count = self.layout.total_leds();
        let mut frames = Vec::with_capacity(count);
        let mut levels = Vec::with_capacity(count);
        let mut payload = Vec::with_capacity(led_count * 3);
        for k in 0..count {
            payload.clear();
            let mut strip_levels = Vec::with_capacity(rendered.len());
            for strip in &rendered {
                let leds = strip.get(k).map_or(&[][..], Vec::as_slice);
                let mut total = 0u32;
                for led in leds {
                    payload.extend_from_slice(&[led.r, led.g, led.b]);
                    total += u32::from(led.brightness());
                }
                strip_levels.push(mean_percent(total, leds.len()));
            }
            frames.push(encode_frame(&payload)?);
            levels.push(strip_levels);
        }

        Ok(FrameSequence {
            frame_rate: self.frame_rate,
            led_count,
            frames,
            levels,
        })
    }
}

fn mean_percent(total: u32, n: usize) -> u8 {
    let Ok(n) = u32::try_from(n) else { return 0 };
    if n == 0 {
        return 0;
    }
    u8::try_from(total * 100 / (n * 255)).unwrap_or(100)
}
