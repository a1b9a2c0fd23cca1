use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classes shown to operators and UI sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Resolution,
    Download,
    Analysis,
    Sink,
    Protocol,
    Config,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - edit it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Request errors
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    // Resolver errors
    #[error("Nothing found for {query}")]
    ResolveNotFound { query: String },

    #[error("Resolver unreachable: {reason}")]
    ResolveNetwork { reason: String },

    #[error("Unsupported source: {reason}")]
    ResolveUnsupported { reason: String },

    // Downloader errors
    #[error("Download failed: {reason}")]
    DownloadNetwork { reason: String },

    #[error("Downloaded media could not be converted: {reason}")]
    DownloadFormat { reason: String },

    // Analyzer errors
    #[error("Audio analysis failed: {reason}")]
    AnalysisDecode { reason: String },

    // Sink errors
    #[error("Sink {sink} write failed: {reason}")]
    SinkWrite { sink: String, reason: String },

    #[error("Sink {sink} timed out after {timeout_ms}ms")]
    SinkTimeout { sink: String, timeout_ms: u64 },

    #[error("Sink {sink} rejected a frame: {reason}")]
    ProtocolChecksum { sink: String, reason: String },

    #[error("Frame cannot be encoded: {reason}")]
    FrameEncode { reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Map this error onto the operator-facing taxonomy.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigInvalid { .. }
            | Self::ConfigMissingField { .. }
            | Self::ConfigParseError(_) => ErrorCategory::Config,
            Self::InvalidInput { .. } => ErrorCategory::Input,
            Self::ResolveNotFound { .. }
            | Self::ResolveNetwork { .. }
            | Self::ResolveUnsupported { .. } => ErrorCategory::Resolution,
            Self::DownloadNetwork { .. } | Self::DownloadFormat { .. } => ErrorCategory::Download,
            Self::AnalysisDecode { .. } => ErrorCategory::Analysis,
            Self::SinkWrite { .. } | Self::SinkTimeout { .. } => ErrorCategory::Sink,
            Self::ProtocolChecksum { .. } => ErrorCategory::Protocol,
            Self::FrameEncode { .. } | Self::Cancelled | Self::IoError(_) | Self::JsonError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether this failure belongs to one entry's pipeline and should
    /// mark only that entry as errored.
    #[must_use]
    pub const fn is_pipeline_failure(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Resolution | ErrorCategory::Download | ErrorCategory::Analysis
        )
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
