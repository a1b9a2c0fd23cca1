use jukebox_core::CoreError;
use thiserror::Error;

/// Failures running or interpreting the yt-dlp executable.
#[derive(Debug, Error)]
pub enum YtDlpError {
    /// The executable could not be started at all.
    #[error("could not start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// yt-dlp has no extractor for this source, or it is a live stream.
    #[error("{0}")]
    Unsupported(String),

    /// The video is removed, private or blocked.
    #[error("{0}")]
    Unavailable(String),

    /// Anything network shaped: timeouts, HTTP errors, TLS failures.
    #[error("{0}")]
    Network(String),

    /// Post-processing (ffmpeg) failed or produced nothing.
    #[error("{0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected yt-dlp output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which collaborator contract the failure is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Download,
}

impl YtDlpError {
    /// Map onto the core taxonomy for the given phase
    #[must_use]
    pub fn into_core(self, phase: Phase, query: &str) -> CoreError {
        let reason = self.to_string();
        match (self, phase) {
            (Self::Unsupported(_), _) => CoreError::ResolveUnsupported { reason },
            (Self::Unavailable(_), _) => CoreError::ResolveNotFound {
                query: query.to_string(),
            },
            (Self::Format(_), _) => CoreError::DownloadFormat { reason },
            (Self::Spawn { .. } | Self::Network(_) | Self::Io(_) | Self::Json(_), Phase::Resolve) => {
                CoreError::ResolveNetwork { reason }
            }
            (Self::Spawn { .. } | Self::Network(_) | Self::Io(_) | Self::Json(_), Phase::Download) => {
                CoreError::DownloadNetwork { reason }
            }
        }
    }

    /// Classify a failed run from its stderr
    #[must_use]
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix("ERROR:"))
            .or_else(|| stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("yt-dlp exited with an error")
            .trim()
            .to_string();
        let lower = message.to_lowercase();

        if lower.contains("unsupported url") || lower.contains("is live") || lower.contains("live event") {
            Self::Unsupported(message)
        } else if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("removed")
            || lower.contains("not available")
            || lower.contains("http error 404")
        {
            Self::Unavailable(message)
        } else if lower.contains("ffmpeg")
            || lower.contains("ffprobe")
            || lower.contains("postprocessing")
            || lower.contains("audio conversion")
        {
            Self::Format(message)
        } else {
            Self::Network(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, YtDlpError>;
