use crate::error::{CoreError, Result};
use crate::lightshow::PatternKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JukeboxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_strips")]
    pub strips: Vec<StripConfig>,
    #[serde(default)]
    pub lightshow: LightShowConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub streamer: StreamerConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub ytdlp: YtDlpConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve downloaded audio to browsers at `/api/audio/{id}`
    #[serde(default = "default_true")]
    pub serve_audio: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5000
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            serve_audio: true,
        }
    }
}

/// One physical LED strip. Strips are concatenated in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripConfig {
    pub id: u8,
    #[serde(default)]
    pub name: String,
    pub led_count: u16,
    #[serde(default)]
    pub pattern: PatternKind,
}

impl StripConfig {
    pub fn new(id: u8, name: impl Into<String>, led_count: u16, pattern: PatternKind) -> Self {
        Self {
            id,
            name: name.into(),
            led_count,
            pattern,
        }
    }
}

fn default_strips() -> Vec<StripConfig> {
    vec![
        StripConfig::new(0, "Main Strip", 150, PatternKind::Spectrum),
        StripConfig::new(1, "Left Strip", 300, PatternKind::Wave),
        StripConfig::new(2, "Right Strip", 300, PatternKind::Pulse),
        StripConfig::new(3, "Back Strip", 300, PatternKind::Chase),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightShowConfig {
    /// LED frames per second emitted for every strip
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Brightness multiplier applied on beat frames
    #[serde(default = "default_beat_brightness")]
    pub beat_brightness: f32,
    /// Exponential decay rate of the pulse pattern, per second
    #[serde(default = "default_pulse_decay")]
    pub pulse_decay_per_sec: f32,
    /// Wave crests passing a fixed LED per second
    #[serde(default = "default_wave_speed")]
    pub wave_speed: f32,
    /// Chase laps per second at 120 BPM and full energy
    #[serde(default = "default_chase_speed")]
    pub chase_speed: f32,
    /// Lit segment length of the chase pattern, in LEDs
    #[serde(default = "default_chase_length")]
    pub chase_length: u16,
}

const fn default_frame_rate() -> u32 {
    20
}

const fn default_beat_brightness() -> f32 {
    1.5
}

const fn default_pulse_decay() -> f32 {
    6.0
}

const fn default_wave_speed() -> f32 {
    2.0
}

const fn default_chase_speed() -> f32 {
    0.5
}

const fn default_chase_length() -> u16 {
    20
}

impl Default for LightShowConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            beat_brightness: default_beat_brightness(),
            pulse_decay_per_sec: default_pulse_decay(),
            wave_speed: default_wave_speed(),
            chase_speed: default_chase_speed(),
            chase_length: default_chase_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Songs downloaded/analyzed in parallel
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Where downloaded audio is written (defaults to the cache dir)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Reject sources longer than this; 0 disables the limit
    #[serde(default = "default_max_song_duration")]
    pub max_song_duration_secs: u64,
    /// Minimum spacing between progress events when the percentage moved
    /// by less than one point
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
    /// Delete a song's audio once it finished playing
    #[serde(default = "default_true")]
    pub delete_finished_audio: bool,
}

const fn default_max_concurrent() -> usize {
    2
}

const fn default_max_song_duration() -> u64 {
    600
}

const fn default_progress_interval() -> u64 {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            download_dir: None,
            max_song_duration_secs: default_max_song_duration(),
            progress_interval_ms: default_progress_interval(),
            delete_finished_audio: true,
        }
    }
}

impl PipelineConfig {
    /// Resolved download directory
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(crate::paths::default_download_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Playback clock resolution
    #[serde(default = "default_clock_tick")]
    pub tick_ms: u64,
}

const fn default_clock_tick() -> u64 {
    250
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_clock_tick(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// LED refresh interval, independent of the playback clock
    #[serde(default = "default_stream_tick")]
    pub tick_ms: u64,
    /// Per-sink write deadline for one frame
    #[serde(default = "default_sink_timeout")]
    pub sink_timeout_ms: u64,
}

const fn default_stream_tick() -> u64 {
    50
}

const fn default_sink_timeout() -> u64 {
    40
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_stream_tick(),
            sink_timeout_ms: default_sink_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Byte stream over a TCP connection (SBC or network bridge)
    Tcp,
    /// One datagram per frame
    Udp,
    /// A character device such as a serial tty, configured externally
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    #[serde(default)]
    pub name: Option<String>,
    /// `host:port` for network sinks, a filesystem path for devices
    pub target: String,
}

impl SinkConfig {
    /// Display name, falling back to `kind:target`
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            let kind = match self.kind {
                SinkKind::Tcp => "tcp",
                SinkKind::Udp => "udp",
                SinkKind::Device => "device",
            };
            format!("{kind}:{}", self.target)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtDlpConfig {
    #[serde(default = "default_ytdlp_binary")]
    pub binary: String,
    /// Directory containing ffmpeg/ffprobe when they are not on PATH
    #[serde(default)]
    pub ffmpeg_location: Option<PathBuf>,
    #[serde(default = "default_search_results")]
    pub search_results: u8,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

const fn default_search_results() -> u8 {
    10
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_ytdlp_binary(),
            ffmpeg_location: None,
            search_results: default_search_results(),
            audio_format: default_audio_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Feature frames per second produced by the analyzer
    #[serde(default = "default_timeline_rate")]
    pub timeline_rate: u32,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Onset threshold in standard deviations above the local mean
    #[serde(default = "default_beat_sensitivity")]
    pub beat_sensitivity: f32,
}

const fn default_timeline_rate() -> u32 {
    43
}

const fn default_fft_size() -> usize {
    2048
}

const fn default_beat_sensitivity() -> f32 {
    1.5
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            timeline_rate: default_timeline_rate(),
            fft_size: default_fft_size(),
            beat_sensitivity: default_beat_sensitivity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Mirror logs to `~/.cache/jukebox-led/jukebox.log`
    #[serde(default)]
    pub enabled: bool,
}

impl JukeboxConfig {
    /// Get the config file path (`~/.config/jukebox-led/config.toml`)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` after writing the template, or an error if
    /// the file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, CONFIG_TEMPLATE)?;
            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        Self::load(&config_path)
    }

    /// Load and validate a config file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate config text
    ///
    /// # Errors
    ///
    /// Returns an error on TOML syntax errors or invalid values.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with built-in defaults (reference strip layout, no sinks)
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            strips: default_strips(),
            ..Self::default()
        }
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.strips.is_empty() {
            return Err(invalid("strips: at least one strip is required"));
        }
        let mut total: u32 = 0;
        for strip in &self.strips {
            if strip.led_count == 0 {
                return Err(invalid(format!("strips[{}].led_count must be > 0", strip.id)));
            }
            total += u32::from(strip.led_count);
        }
        if total > u32::from(u16::MAX) {
            return Err(invalid(format!(
                "strips: {total} LEDs exceed the frame protocol limit of {}",
                u16::MAX
            )));
        }
        let mut ids: Vec<u8> = self.strips.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.strips.len() {
            return Err(invalid("strips: ids must be unique"));
        }
        if self.lightshow.frame_rate == 0 {
            return Err(invalid("lightshow.frame_rate must be > 0"));
        }
        if self.playback.tick_ms == 0 {
            return Err(invalid("playback.tick_ms must be > 0"));
        }
        if self.streamer.tick_ms == 0 {
            return Err(invalid("streamer.tick_ms must be > 0"));
        }
        if self.pipeline.max_concurrent == 0 {
            return Err(invalid("pipeline.max_concurrent must be > 0"));
        }
        if self.analyzer.timeline_rate == 0 {
            return Err(invalid("analyzer.timeline_rate must be > 0"));
        }
        if !self.analyzer.fft_size.is_power_of_two() {
            return Err(invalid("analyzer.fft_size must be a power of two"));
        }
        for sink in &self.sinks {
            if sink.target.trim().is_empty() {
                return Err(CoreError::ConfigMissingField {
                    field: format!("sinks[{}].target", sink.display_name()),
                });
            }
        }
        Ok(())
    }

    /// Total LEDs across all strips
    #[must_use]
    pub fn total_leds(&self) -> usize {
        self.strips.iter().map(|s| usize::from(s.led_count)).sum()
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::ConfigInvalid {
        message: message.into(),
    }
}

/// Template written on first run
pub const CONFIG_TEMPLATE: &str = r##"# JukeboxLED Configuration
# ~/.config/jukebox-led/config.toml

[server]
host = "0.0.0.0"
port = 5000
serve_audio = true

# Strips are concatenated in this order on the wire.
# Patterns: "spectrum", "wave", "pulse", "chase"
[[strips]]
id = 0
name = "Main Strip"
led_count = 150
pattern = "spectrum"

[[strips]]
id = 1
name = "Left Strip"
led_count = 300
pattern = "wave"

[[strips]]
id = 2
name = "Right Strip"
led_count = 300
pattern = "pulse"

[[strips]]
id = 3
name = "Back Strip"
led_count = 300
pattern = "chase"

[lightshow]
frame_rate = 20
beat_brightness = 1.5
pulse_decay_per_sec = 6.0
wave_speed = 2.0
chase_speed = 0.5
chase_length = 20

[pipeline]
max_concurrent = 2
# download_dir = "/var/lib/jukebox/downloads"
max_song_duration_secs = 600  # 0 = no limit
progress_interval_ms = 2000
delete_finished_audio = true

[playback]
tick_ms = 250

[streamer]
tick_ms = 50
sink_timeout_ms = 40

# Hardware sinks: "tcp" (host:port), "udp" (host:port), "device" (/dev/ttyACM0)
# [[sinks]]
# kind = "tcp"
# name = "pi"
# target = "192.168.1.50:7777"

[ytdlp]
binary = "yt-dlp"
# ffmpeg_location = "/opt/ffmpeg/bin"
search_results = 10
audio_format = "mp3"

[analyzer]
timeline_rate = 43
fft_size = 2048
beat_sensitivity = 1.5

[logging]
enabled = false
"##;
