use crate::link::{LOG_TARGET, Link, read_reports};
use async_trait::async_trait;
use bytes::Bytes;
use jukebox_core::{FrameSink, Result, SinkReportSender};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Frames over a TCP byte stream, reconnecting in the background.
///
/// Frames sent while disconnected are dropped by the streamer since
/// [`FrameSink::is_ready`] reports false.
pub struct TcpSink {
    name: String,
    addr: String,
    link: Link<OwnedWriteHalf>,
    reports: Option<SinkReportSender>,
    retry_delay: Duration,
}

impl TcpSink {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        reports: Option<SinkReportSender>,
    ) -> Self {
        let name = name.into();
        Self {
            link: Link::new(name.clone()),
            name,
            addr: addr.into(),
            reports,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Spawn the connection supervisor
    #[must_use]
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel_token).await })
    }

    async fn run(&self, cancel_token: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let connect = tokio::select! {
                () = cancel_token.cancelled() => break,
                result = TcpStream::connect(&self.addr) => result,
            };

            match connect {
                Ok(stream) => {
                    failures = 0;
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(target: LOG_TARGET, sink = %self.name, "set_nodelay failed: {e}");
                    }
                    let (reader, writer) = stream.into_split();
                    self.link.install(writer).await;
                    info!(target: LOG_TARGET, sink = %self.name, addr = %self.addr, "connected");

                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            self.link.clear().await;
                            break;
                        }
                        result = read_reports(reader, &self.name, self.reports.as_ref()) => {
                            if let Err(e) = result {
                                debug!(target: LOG_TARGET, sink = %self.name, "read failed: {e}");
                            }
                        }
                        () = self.link.wait_lost() => {}
                    }
                    self.link.clear().await;
                    warn!(target: LOG_TARGET, sink = %self.name, "connection lost, reconnecting");
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        warn!(target: LOG_TARGET, sink = %self.name, addr = %self.addr, "connect failed: {e}");
                    } else {
                        debug!(target: LOG_TARGET, sink = %self.name, attempt = failures, "connect failed: {e}");
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

#[async_trait]
impl FrameSink for TcpSink {
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
