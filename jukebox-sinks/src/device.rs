use crate::link::{LOG_TARGET, Link, read_reports};
use async_trait::async_trait;
use bytes::Bytes;
use jukebox_core::{FrameSink, Result, SinkReportSender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Frames written to a device node such as `/dev/ttyACM0`.
///
/// Line settings (baud rate, raw mode) are left to the operating system;
/// configure the port with `stty` before starting. The node is reopened
/// after a write error, which covers USB boards being replugged.
pub struct DeviceSink {
    name: String,
    path: PathBuf,
    link: Link<File>,
    reports: Option<SinkReportSender>,
    retry_delay: Duration,
}

impl DeviceSink {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        reports: Option<SinkReportSender>,
    ) -> Self {
        let name = name.into();
        Self {
            link: Link::new(name.clone()),
            name,
            path: path.into(),
            reports,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn the open/reopen supervisor
    #[must_use]
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel_token).await })
    }

    async fn run(&self, cancel_token: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let opened = OpenOptions::new()
                .write(true)
                .append(true)
                .open(&self.path)
                .await;

            match opened {
                Ok(file) => {
                    failures = 0;
                    self.link.install(file).await;
                    info!(target: LOG_TARGET, sink = %self.name, path = %self.path.display(), "device opened");

                    let reader = open_reader(&self.path).await;
                    let read_back = async {
                        match reader {
                            Some(reader) => {
                                read_reports(reader, &self.name, self.reports.as_ref()).await
                            }
                            None => std::future::pending().await,
                        }
                    };

                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            self.link.clear().await;
                            break;
                        }
                        result = read_back => {
                            if let Err(e) = result {
                                debug!(target: LOG_TARGET, sink = %self.name, "read failed: {e}");
                            }
                            // a device that reports EOF has gone away
                        }
                        () = self.link.wait_lost() => {}
                    }
                    self.link.clear().await;
                    warn!(target: LOG_TARGET, sink = %self.name, "device lost, reopening");
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        warn!(target: LOG_TARGET, sink = %self.name, path = %self.path.display(), "open failed: {e}");
                    } else {
                        debug!(target: LOG_TARGET, sink = %self.name, attempt = failures, "open failed: {e}");
                    }
                }
            }

            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }
        debug!(target: LOG_TARGET, sink = %self.name, "supervisor stopped");
    }
}

/// Only character devices talk back; reading a regular file would just
/// replay what was written.
#[cfg(unix)]
async fn open_reader(path: &Path) -> Option<File> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.file_type().is_char_device() {
        return None;
    }
    File::open(path).await.ok()
}

#[cfg(not(unix))]
async fn open_reader(_path: &Path) -> Option<File> {
    None
}

#[async_trait]
impl FrameSink for DeviceSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.link.is_connected()
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.link.write(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_core::encode_frame;

    async fn wait_ready(sink: &DeviceSink) {
        for _ in 0..2000 {
            if sink.is_ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("device never opened");
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("jukebox-sinks-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[tokio::test]
    async fn test_frames_appended_to_device() {
        let path = scratch("frames.bin");
        let sink = Arc::new(
            DeviceSink::new("tty", &path, None).with_retry_delay(Duration::from_millis(10)),
        );
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sink).start(cancel.clone());
        wait_ready(&sink).await;

        let first = encode_frame(&[1, 2, 3]).unwrap();
        let second = encode_frame(&[4, 5, 6, 7, 8, 9]).unwrap();
        sink.send_frame(first.clone()).await.unwrap();
        sink.send_frame(second.clone()).await.unwrap();

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written, [&first[..], &second[..]].concat());

        cancel.cancel();
        handle.await.unwrap();
        assert!(!sink.is_ready());
    }

    #[tokio::test]
    async fn test_missing_device_is_not_ready() {
        let path = std::env::temp_dir().join("jukebox-sinks-tests/missing/tty");
        let sink = Arc::new(
            DeviceSink::new("gone", path, None).with_retry_delay(Duration::from_millis(5)),
        );
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sink).start(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sink.is_ready());
        cancel.cancel();
        handle.await.unwrap();
    }
}
