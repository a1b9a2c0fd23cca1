//! Reconnecting writer shared by the stream-oriented sinks.

use jukebox_core::{CoreError, Result, SinkMessage, SinkReport, SinkReportSender};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Notify};

pub(crate) const LOG_TARGET: &str = "jukebox::sinks";

/// The write half of a connection that a supervisor task keeps alive.
/// A failed write drops the writer and wakes the supervisor.
pub(crate) struct Link<W> {
    sink: String,
    writer: Mutex<Option<W>>,
    connected: AtomicBool,
    lost: Notify,
}

impl<W> Link<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            lost: Notify::new(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) async fn install(&self, writer: W) {
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) async fn clear(&self) {
        *self.writer.lock().await = None;
        self.connected.store(false, Ordering::Release);
    }

    /// Resolves once a write has failed on the current connection
    pub(crate) async fn wait_lost(&self) {
        loop {
            self.lost.notified().await;
            // a permit left over from an earlier connection
            if !self.is_connected() {
                return;
            }
        }
    }

    pub(crate) async fn write(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(self.write_error("not connected"));
        };
        let result = match writer.write_all(frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            *guard = None;
            self.connected.store(false, Ordering::Release);
            self.lost.notify_one();
            return Err(self.write_error(e));
        }
        Ok(())
    }

    fn write_error(&self, reason: impl std::fmt::Display) -> CoreError {
        CoreError::SinkWrite {
            sink: self.sink.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Forward newline-separated back-channel text as parsed reports until
/// the stream ends. Invalid UTF-8 (line noise on serial links) is
/// replaced rather than treated as fatal.
pub(crate) async fn read_reports<R>(
    reader: R,
    sink: &str,
    reports: Option<&SinkReportSender>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        forward_line(&String::from_utf8_lossy(&line), sink, reports);
    }
}

pub(crate) fn forward_line(line: &str, sink: &str, reports: Option<&SinkReportSender>) {
    if let Some(message) = SinkMessage::parse(line)
        && let Some(tx) = reports
    {
        let _ = tx.send(SinkReport {
            sink: sink.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_read_reports() {
        let input: &[u8] = b"TOTAL_LEDS=1050\r\nSTRIP_SEGMENTS=150,300,300,300\n\xff\xfe\nFrame OK\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_reports(input, "due", Some(&tx)).await.unwrap();

        let mut messages = Vec::new();
        while let Ok(report) = rx.try_recv() {
            assert_eq!(report.sink, "due");
            messages.push(report.message);
        }
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], SinkMessage::TotalLeds(1050));
        assert_eq!(
            messages[1],
            SinkMessage::StripSegments(vec![150, 300, 300, 300])
        );
        assert!(matches!(messages[2], SinkMessage::Other(_)));
        assert_eq!(messages[3], SinkMessage::FrameOk);
    }

    #[tokio::test]
    async fn test_write_without_connection_fails() {
        let link: Link<Vec<u8>> = Link::new("idle");
        assert!(!link.is_connected());
        let err = link.write(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, CoreError::SinkWrite { ref sink, .. } if sink == "idle"));

        link.install(Vec::new()).await;
        assert!(link.is_connected());
        link.write(&[1, 2, 3]).await.unwrap();
        link.clear().await;
        assert!(!link.is_connected());
    }
}
