//! Pushes the frame for the current playback position to every sink.

use crate::broadcaster::{SessionBroadcaster, SessionEvent};
use crate::entry::EntryId;
use crate::error::{CoreError, Result};
use crate::manager::NowPlaying;
use crate::protocol::SinkMessage;
use crate::time::DurationExt;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const LOG_TARGET: &str = "jukebox::streamer";

/// Minimum spacing between warnings for one sink
const WARN_INTERVAL: Duration = Duration::from_secs(5);

/// A hardware receiver of encoded frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the sink can take a frame right now
    fn is_ready(&self) -> bool {
        true
    }

    /// Write one complete wire frame.
    ///
    /// # Errors
    ///
    /// Returns `SinkWrite` when the transport fails.
    async fn send_frame(&self, frame: Bytes) -> Result<()>;
}

/// A back-channel line received from a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: String,
    pub message: SinkMessage,
}

pub type SinkReportSender = mpsc::UnboundedSender<SinkReport>;

struct SinkSlot {
    sink: Arc<dyn FrameSink>,
    in_flight: Arc<AtomicBool>,
    last_warning: Arc<Mutex<Option<Instant>>>,
}

impl SinkSlot {
    fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_warning: Arc::new(Mutex::new(None)),
        }
    }

    /// Fire and forget. A sink still busy with the previous frame misses
    /// this one; frames are never queued.
    fn dispatch(&self, frame: Bytes, timeout: Duration) {
        if !self.sink.is_ready() {
            return;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!(target: LOG_TARGET, sink = self.sink.name(), "busy, frame skipped");
            return;
        }

        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.in_flight);
        let last_warning = Arc::clone(&self.last_warning);
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, sink.send_frame(frame))
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::SinkTimeout {
                        sink: sink.name().to_string(),
                        timeout_ms: timeout.as_millis_u64(),
                    })
                });
            in_flight.store(false, Ordering::Release);

            if let Err(e) = result {
                let now = Instant::now();
                let mut last = last_warning.lock().await;
                if last.is_none_or(|at| now.saturating_duration_since(at) >= WARN_INTERVAL) {
                    *last = Some(now);
                    warn!(target: LOG_TARGET, sink = sink.name(), "{e}");
                }
            }
        });
    }
}

/// Fixed-rate frame pump, independent of the playback clock's ticker
pub struct FrameStreamer {
    slots: Vec<SinkSlot>,
    now_playing: watch::Receiver<NowPlaying>,
    tick: Duration,
    sink_timeout: Duration,
    cancel_token: CancellationToken,
}

impl FrameStreamer {
    /// Create a frame streamer
    ///
    /// # Arguments
    /// * `now_playing` - Feed published by the queue manager
    /// * `sinks` - Every registered hardware sink
    /// * `tick` - Interval between frame pushes
    /// * `sink_timeout` - Per-sink deadline for one frame
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    #[must_use]
    pub fn new(
        now_playing: watch::Receiver<NowPlaying>,
        sinks: Vec<Arc<dyn FrameSink>>,
        tick: Duration,
        sink_timeout: Duration,
        cancel_token: Option<CancellationToken>,
    ) -> Self {
        Self {
            slots: sinks.into_iter().map(SinkSlot::new).collect(),
            now_playing,
            tick,
            sink_timeout,
            cancel_token: cancel_token.unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.slots.len()
    }

    /// Start the streamer in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            target: LOG_TARGET,
            sinks = self.slots.len(),
            tick_ms = self.tick.as_millis_u64(),
            "frame streamer started"
        );
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "frame streamer shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.emit(Instant::now());
                }
            }
        }
    }

    /// Push the frame showing at `now` to every sink. Returns the song and
    /// clamped frame index sent, or `None` when nothing is playing.
    pub fn emit(&self, now: Instant) -> Option<(EntryId, usize)> {
        let (song_id, index, frame) = {
            let playing = self.now_playing.borrow();
            if !playing.is_playing {
                return None;
            }
            let song_id = playing.song_id?;
            let index = playing.frame_index_at(now)?;
            let frame = playing.frames.as_ref()?.frame(index)?.clone();
            (song_id, index, frame)
        };
        for slot in &self.slots {
            slot.dispatch(frame.clone(), self.sink_timeout);
        }
        Some((song_id, index))
    }
}

/// Surface sink back-channel lines: configuration info becomes advisory
/// `sink_status` events, checksum complaints are logged.
pub async fn forward_sink_reports(
    mut reports: mpsc::UnboundedReceiver<SinkReport>,
    broadcaster: Arc<SessionBroadcaster>,
    cancel_token: CancellationToken,
) {
    loop {
        let report = tokio::select! {
            () = cancel_token.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => report,
                None => break,
            },
        };
        match &report.message {
            SinkMessage::FrameOk => {
                trace!(target: LOG_TARGET, sink = %report.sink, "frame acknowledged");
            }
            SinkMessage::ChecksumError(line) => {
                let error = CoreError::ProtocolChecksum {
                    sink: report.sink.clone(),
                    reason: line.clone(),
                };
                warn!(target: LOG_TARGET, "{error}");
            }
            message => {
                if message.is_info() {
                    info!(target: LOG_TARGET, sink = %report.sink, "{message}");
                } else {
                    debug!(target: LOG_TARGET, sink = %report.sink, "{message}");
                }
                broadcaster.publish(SessionEvent::SinkStatus {
                    sink: report.sink,
                    message: message.to_string(),
                });
            }
        }
    }
}
