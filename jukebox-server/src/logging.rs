//! Console tracing from the first line of `main`, with the log file
//! attached once the config has been loaded.

use jukebox_core::LoggingConfig;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

const DEFAULT_FILTER: &str = "info,jukebox::streamer=warn";

type FileLayer = fmt::Layer<Registry, DefaultFields, Format, Arc<File>>;

/// Slot for the file layer, empty until [`LogHandle::apply`] fills it
pub struct LogHandle {
    file: reload::Handle<Option<FileLayer>, Registry>,
}

fn file_slot() -> (reload::Layer<Option<FileLayer>, Registry>, LogHandle) {
    let (layer, file) = reload::Layer::new(None);
    (layer, LogHandle { file })
}

/// Install the global subscriber: `RUST_LOG` or the default filter,
/// console output, and an empty file slot.
pub fn init_tracing() -> LogHandle {
    let (file_layer, handle) = file_slot();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(fmt::layer())
        .init();
    handle
}

impl LogHandle {
    /// Mirror logs to the cache log file when `[logging] enabled` is set
    pub fn apply(&self, config: &LoggingConfig) {
        if !config.enabled {
            return;
        }
        let log_path = jukebox_core::log_file_path();
        match self.attach(&log_path) {
            Ok(()) => info!("Logging to {}", log_path.display()),
            Err(e) => warn!("Failed to create log file at {}: {e}", log_path.display()),
        }
    }

    /// Truncate `path` and start writing every event to it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be created, or if the
    /// subscriber holding the slot is gone.
    pub fn attach(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let layer = fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false);
        self.file.reload(Some(layer)).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_attached_after_start() {
        let (file_layer, handle) = file_slot();
        let subscriber = tracing_subscriber::registry().with(file_layer);
        let path = std::env::temp_dir()
            .join("jukebox-server-tests")
            .join("attach")
            .join("jukebox.log");

        tracing::subscriber::with_default(subscriber, || {
            info!("before the file");
            handle.attach(&path).unwrap();
            info!("after the file");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("after the file"), "{written}");
        assert!(!written.contains("before the file"), "{written}");
    }

    #[test]
    fn test_disabled_logging_leaves_slot_empty() {
        let (_layer, handle) = file_slot();
        handle.apply(&LoggingConfig::default());
        assert!(handle.file.with_current(Option::is_none).unwrap());
    }
}
