//! Fan-out of queue and playback events to connected UI sessions.

use crate::entry::{EntryId, EntrySnapshot, Stage};
use crate::error::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const LOG_TARGET: &str = "jukebox::sessions";

/// Events delivered to every session, serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    QueueUpdated {
        queue: Vec<EntrySnapshot>,
    },
    SongStarted {
        song: EntrySnapshot,
    },
    SongFinished {
        song_id: EntryId,
        skipped: bool,
    },
    SongProgress {
        song_id: EntryId,
        stage: Stage,
        progress: u8,
    },
    SongError {
        song_id: EntryId,
        error: String,
    },
    PlaybackTimeUpdate {
        song_id: EntryId,
        current_time: f64,
        duration: f64,
        /// Mean brightness per strip, 0-100
        levels: Vec<u8>,
    },
    PlaybackStateChanged {
        is_playing: bool,
    },
    VolumeChanged {
        volume: f32,
    },
    /// Advisory status text reported by a hardware sink
    SinkStatus {
        sink: String,
        message: String,
    },
    CurrentState(StateSnapshot),
}

impl SessionEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueueUpdated { .. } => "queue_updated",
            Self::SongStarted { .. } => "song_started",
            Self::SongFinished { .. } => "song_finished",
            Self::SongProgress { .. } => "song_progress",
            Self::SongError { .. } => "song_error",
            Self::PlaybackTimeUpdate { .. } => "playback_time_update",
            Self::PlaybackStateChanged { .. } => "playback_state_changed",
            Self::VolumeChanged { .. } => "volume_changed",
            Self::SinkStatus { .. } => "sink_status",
            Self::CurrentState(_) => "current_state",
        }
    }
}

/// Everything a session needs to rebuild its view from scratch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current: Option<EntrySnapshot>,
    pub queue: Vec<EntrySnapshot>,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
}

/// Reply to a single session's failed request
#[derive(Debug, Clone, Serialize)]
pub struct RequestError {
    pub category: &'static str,
    pub message: String,
}

impl RequestError {
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let category = match category {
            ErrorCategory::Input => "input",
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::Download => "download",
            ErrorCategory::Analysis => "analysis",
            ErrorCategory::Sink => "sink",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Config => "config",
            ErrorCategory::Internal => "internal",
        };
        Self {
            category,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A connected browser
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// One producer, many consumers. Every event goes through a single
/// broadcast channel so all sessions observe the same order.
pub struct SessionBroadcaster {
    event_tx: broadcast::Sender<Arc<SessionEvent>>,
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
    next_id: AtomicU64,
}

impl SessionBroadcaster {
    pub const DEFAULT_CAPACITY: usize = 256;

    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            event_tx,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Deliver an event to all current subscribers
    pub fn publish(&self, event: SessionEvent) {
        debug!(target: LOG_TARGET, kind = event.kind(), "publish");
        // No subscribers is fine
        let _ = self.event_tx.send(Arc::new(event));
    }

    /// Raw event stream, for consumers that are not UI sessions
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.event_tx.subscribe()
    }

    /// Register a session. Subscribes before registering so nothing
    /// published after this call is missed.
    pub async fn connect(
        &self,
        display_name: Option<String>,
    ) -> (SessionId, broadcast::Receiver<Arc<SessionEvent>>) {
        let rx = self.event_tx.subscribe();
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().await.insert(
            id,
            SessionInfo {
                id,
                display_name,
                connected_at: Utc::now(),
            },
        );
        debug!(target: LOG_TARGET, %id, "session connected");
        (id, rx)
    }

    pub async fn disconnect(&self, id: SessionId) {
        if self.sessions.write().await.remove(&id).is_some() {
            debug!(target: LOG_TARGET, %id, "session disconnected");
        }
    }

    /// Remember the session's last display name
    pub async fn rename(&self, id: SessionId, display_name: String) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&id) else {
            return false;
        };
        session.display_name = Some(display_name);
        true
    }

    pub async fn display_name(&self, id: SessionId) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|s| s.display_name.clone())
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(id: u64, pct: u8) -> SessionEvent {
        SessionEvent::SongProgress {
            song_id: EntryId::from(id),
            stage: Stage::Downloading,
            progress: pct,
        }
    }

    #[tokio::test]
    async fn test_sessions_see_events_in_order() {
        let broadcaster = SessionBroadcaster::new(16);
        let (_a, mut rx_a) = broadcaster.connect(None).await;
        let (_b, mut rx_b) = broadcaster.connect(Some("bee".into())).await;

        broadcaster.publish(progress(1, 40));
        broadcaster.publish(progress(2, 10));
        broadcaster.publish(progress(1, 90));

        for rx in [&mut rx_a, &mut rx_b] {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(rx.recv().await.unwrap());
            }
            assert_eq!(*seen[0], progress(1, 40));
            assert_eq!(*seen[2], progress(1, 90));
        }
        assert_eq!(broadcaster.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_rename_and_disconnect() {
        let broadcaster = SessionBroadcaster::new(4);
        let (id, _rx) = broadcaster.connect(None).await;
        assert!(broadcaster.rename(id, "Dana".into()).await);
        assert_eq!(broadcaster.display_name(id).await.as_deref(), Some("Dana"));
        broadcaster.disconnect(id).await;
        assert!(!broadcaster.rename(id, "x".into()).await);
        assert_eq!(broadcaster.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_session_lags() {
        let broadcaster = SessionBroadcaster::new(2);
        let (_id, mut rx) = broadcaster.connect(None).await;
        for pct in 0..5 {
            broadcaster.publish(progress(1, pct));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(SessionEvent::PlaybackStateChanged { is_playing: true })
            .unwrap();
        assert_eq!(json["type"], "playback_state_changed");
        assert_eq!(json["is_playing"], true);

        let json = serde_json::to_value(progress(7, 55)).unwrap();
        assert_eq!(json["type"], "song_progress");
        assert_eq!(json["song_id"], 7);
        assert_eq!(json["stage"], "downloading");

        let snapshot = StateSnapshot {
            current: None,
            queue: Vec::new(),
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 0.5,
        };
        let json = serde_json::to_value(SessionEvent::CurrentState(snapshot)).unwrap();
        assert_eq!(json["type"], "current_state");
        assert_eq!(json["volume"], 0.5);
    }
}
