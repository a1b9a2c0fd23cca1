use crate::link::{LOG_TARGET, forward_line};
use async_trait::async_trait;
use bytes::Bytes;
use jukebox_core::{CoreError, FrameSink, Result, SinkReportSender};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Datagrams larger than this are not back-channel text
const REPORT_BUFFER: usize = 2048;

/// One datagram per frame. There is no connection to lose, so the sink
/// is always ready; an unreachable receiver only shows up as send errors.
pub struct UdpSink {
    name: String,
    socket: UdpSocket,
    reports: Option<SinkReportSender>,
}

impl UdpSink {
    /// Bind an ephemeral local port and fix the destination.
    ///
    /// # Errors
    ///
    /// Returns `SinkWrite` if the target does not resolve or the socket
    /// cannot be bound.
    pub async fn connect(
        name: impl Into<String>,
        target: &str,
        reports: Option<SinkReportSender>,
    ) -> Result<Self> {
        let name = name.into();
        let failed = |reason: String| CoreError::SinkWrite {
            sink: name.clone(),
            reason,
        };

        let remote = tokio::net::lookup_host(target)
            .await
            .map_err(|e| failed(format!("cannot resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| failed(format!("{target} resolved to no addresses")))?;
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| failed(format!("bind failed: {e}")))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| failed(format!("connect to {remote} failed: {e}")))?;

        info!(target: LOG_TARGET, sink = %name, %remote, "udp sink ready");
        Ok(Self {
            name,
            socket,
            reports,
        })
    }

    /// Spawn the back-channel receiver
    #[must_use]
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.receive(cancel_token).await })
    }

    async fn receive(&self, cancel_token: CancellationToken) {
        let mut buf = vec![0u8; REPORT_BUFFER];
        loop {
            let received = tokio::select! {
                () = cancel_token.cancelled() => break,
                result = self.socket.recv(&mut buf) => result,
            };
            match received {
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    for line in text.lines() {
                        forward_line(line, &self.name, self.reports.as_ref());
                    }
                }
                Err(e) => {
                    // ICMP port unreachable surfaces here on connected sockets
                    debug!(target: LOG_TARGET, sink = %self.name, "recv failed: {e}");
                    tokio::select! {
                        () = cancel_token.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_millis(500)) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl FrameSink for UdpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.socket
            .send(&frame)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::SinkWrite {
                sink: self.name.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_core::{SinkMessage, checksum, encode_frame};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_one_datagram_per_frame() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Arc::new(UdpSink::connect("esp", &target, Some(tx)).await.unwrap());
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&sink).start(cancel.clone());

        let rgb = [255u8, 0, 0, 0, 255, 0, 0, 0, 255];
        let frame = encode_frame(&rgb).unwrap();
        sink.send_frame(frame.clone()).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &frame[..]);
        let sum = u16::from_le_bytes([buf[n - 2], buf[n - 1]]);
        assert_eq!(sum, checksum(&rgb));

        receiver
            .send_to(b"TOTAL_LEDS=3\nFrame OK\n", from)
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.sink, "esp");
        assert_eq!(first.message, SinkMessage::TotalLeds(3));
        assert_eq!(rx.recv().await.unwrap().message, SinkMessage::FrameOk);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unresolvable_target_fails() {
        let err = UdpSink::connect("bad", "not-a-host-without-port", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::SinkWrite { ref sink, .. } if sink == "bad"));
    }
}
