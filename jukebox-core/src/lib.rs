pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod features;
pub mod layout;
pub mod lightshow;
pub mod manager;
pub mod paths;
pub mod pipeline;
pub mod protocol;
pub mod provider;
pub mod streamer;
pub mod time;

#[cfg(test)]
mod testing;

pub use broadcaster::{
    RequestError, SessionBroadcaster, SessionEvent, SessionId, SessionInfo, StateSnapshot,
};
pub use clock::{ClockState, PlaybackClock, PlaybackTime, TickOutcome};
pub use config::{
    AnalyzerConfig, JukeboxConfig, LightShowConfig, LoggingConfig, PipelineConfig,
    PlaybackConfig, ServerConfig, SinkConfig, SinkKind, StreamerConfig, StripConfig,
    YtDlpConfig,
};
pub use entry::{EntryId, EntrySnapshot, Stage, TrackMetadata};
pub use error::{CoreError, ErrorCategory, Result};
pub use features::{FeatureFrame, FeatureTimeline};
pub use layout::{PlacedStrip, StripLayout};
pub use lightshow::{FrameSequence, LightShowGenerator, PatternKind, Rgb};
pub use manager::{ManagerSettings, NowPlaying, QueueManager};
pub use paths::{
    CONFIG_DIR_NAME, CONFIG_ENV_VAR, CONFIG_FILE_NAME, cache_dir, config_dir, config_path,
    default_download_dir, log_file_path,
};
pub use pipeline::Pipeline;
pub use protocol::{Decoded, FrameDecoder, SinkMessage, checksum, encode_frame};
pub use provider::{Analyzer, Downloader, ProgressSender, ResolvedSource, Resolver};
pub use streamer::{FrameSink, FrameStreamer, SinkReport, SinkReportSender, forward_sink_reports};
pub use time::DurationExt;
