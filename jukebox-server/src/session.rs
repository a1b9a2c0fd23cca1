//! WebSocket session protocol at `/ws`.
//!
//! Every message in either direction is a JSON object tagged by `type`.
//! Broadcast events reach all sessions in publish order; replies to a
//! single request go only to the session that sent it.

use crate::app::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::sink::{Sink, SinkExt};
use futures::stream::StreamExt;
use jukebox_core::{
    CoreError, EntryId, ErrorCategory, QueueManager, RequestError, SessionEvent, SessionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "jukebox::ws";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipDirection {
    #[default]
    Next,
    Previous,
}

/// Requests a session may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        display_name: Option<String>,
    },
    AddSong {
        url: String,
        #[serde(default)]
        added_by: Option<String>,
    },
    RemoveFromQueue {
        song_id: EntryId,
    },
    SkipSong {
        #[serde(default)]
        direction: SkipDirection,
    },
    TogglePlayback {
        playing: bool,
    },
    SetVolume {
        volume: f32,
    },
    RequestCurrentState,
    RequestQueue,
}

/// Messages addressed to one session only
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Direct {
    Welcome { session_id: SessionId },
    SongAdded { song_id: EntryId },
    RequestError(RequestError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Event(SessionEvent),
    Direct(Direct),
}

impl Reply {
    fn error(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Direct(Direct::RequestError(RequestError::new(category, message)))
    }

    fn from_error(error: &CoreError) -> Self {
        Self::error(error.category(), error.to_string())
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> bool
where
    S: Sink<Message> + Unpin,
    T: Serialize + ?Sized,
{
    match serde_json::to_string(value) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!(target: LOG_TARGET, "failed to serialize outbound message: {e}");
            true
        }
    }
}

async fn run_session(socket: WebSocket, state: AppState) {
    let broadcaster = Arc::clone(state.manager.broadcaster());
    let cancel_token = state.manager.cancel_token();
    let (id, mut events) = broadcaster.connect(None).await;
    info!(target: LOG_TARGET, %id, "session opened");

    let (mut sender, mut receiver) = socket.split();
    let initial = SessionEvent::CurrentState(state.manager.snapshot().await);
    let mut open = send_json(&mut sender, &initial).await;

    while open {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => open = send_json(&mut sender, event.as_ref()).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(target: LOG_TARGET, %id, missed, "session lagged, resyncing");
                    let snapshot = resync(&state.manager, &mut events).await;
                    open = send_json(&mut sender, &snapshot).await;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&state, id, text.as_str()).await {
                        open = send_json(&mut sender, &reply).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: LOG_TARGET, %id, "socket error: {e}");
                    break;
                }
            },
        }
    }

    broadcaster.disconnect(id).await;
    info!(target: LOG_TARGET, %id, "session closed");
}

/// Replace a lagged receiver and take the state to resend.
///
/// The old receiver still holds its retained backlog, all of which is
/// older than the snapshot. Resubscribing first means only events
/// published after this point follow the snapshot.
async fn resync(
    manager: &QueueManager,
    events: &mut broadcast::Receiver<Arc<SessionEvent>>,
) -> SessionEvent {
    *events = events.resubscribe();
    SessionEvent::CurrentState(manager.snapshot().await)
}

/// Parse and handle one text frame
pub async fn handle_text(state: &AppState, session: SessionId, text: &str) -> Option<Reply> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => handle_message(state, session, message).await,
        Err(e) => {
            debug!(target: LOG_TARGET, %session, "unrecognized message: {e}");
            Some(Reply::error(
                ErrorCategory::Input,
                format!("unrecognized message: {e}"),
            ))
        }
    }
}

/// Apply a request. Queue operations on entries that no longer exist are
/// silent no-ops; two clients racing the same skip is not an error.
pub async fn handle_message(
    state: &AppState,
    session: SessionId,
    message: ClientMessage,
) -> Option<Reply> {
    let manager = &state.manager;
    match message {
        ClientMessage::Hello { display_name } => {
            let name = display_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            if let Some(name) = name {
                manager.broadcaster().rename(session, name).await;
            }
            Some(Reply::Direct(Direct::Welcome {
                session_id: session,
            }))
        }
        ClientMessage::AddSong { url, added_by } => {
            let added_by = match added_by {
                Some(name) => Some(name),
                None => manager.broadcaster().display_name(session).await,
            };
            match manager.enqueue(&url, added_by).await {
                Ok(song_id) => Some(Reply::Direct(Direct::SongAdded { song_id })),
                Err(e) => Some(Reply::from_error(&e)),
            }
        }
        ClientMessage::RemoveFromQueue { song_id } => {
            if !manager.remove(song_id).await {
                debug!(target: LOG_TARGET, %session, %song_id, "remove ignored");
            }
            None
        }
        ClientMessage::SkipSong { direction } => match direction {
            SkipDirection::Next => {
                if !manager.skip().await {
                    debug!(target: LOG_TARGET, %session, "skip ignored, nothing playing");
                }
                None
            }
            SkipDirection::Previous => Some(Reply::error(
                ErrorCategory::Input,
                "only skipping forward is supported",
            )),
        },
        ClientMessage::TogglePlayback { playing } => {
            manager.toggle_playback(playing).await;
            None
        }
        ClientMessage::SetVolume { volume } => {
            manager.set_volume(volume).await;
            None
        }
        ClientMessage::RequestCurrentState => Some(Reply::Event(SessionEvent::CurrentState(
            manager.snapshot().await,
        ))),
        ClientMessage::RequestQueue => Some(Reply::Event(SessionEvent::QueueUpdated {
            queue: manager.queue().await,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_parse_client_messages() {
        let parse = |s: &str| serde_json::from_str::<ClientMessage>(s).unwrap();
        assert_eq!(
            parse(r#"{"type":"add_song","url":"never gonna"}"#),
            ClientMessage::AddSong {
                url: "never gonna".into(),
                added_by: None
            }
        );
        assert_eq!(
            parse(r#"{"type":"skip_song"}"#),
            ClientMessage::SkipSong {
                direction: SkipDirection::Next
            }
        );
        assert_eq!(
            parse(r#"{"type":"remove_from_queue","song_id":7}"#),
            ClientMessage::RemoveFromQueue {
                song_id: EntryId::from(7)
            }
        );
        assert_eq!(
            parse(r#"{"type":"toggle_playback","playing":false}"#),
            ClientMessage::TogglePlayback { playing: false }
        );
        assert_eq!(
            parse(r#"{"type":"request_current_state"}"#),
            ClientMessage::RequestCurrentState
        );
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = Reply::Direct(Direct::SongAdded {
            song_id: EntryId::from(3),
        });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, serde_json::json!({"type": "song_added", "song_id": 3}));

        let reply = Reply::error(ErrorCategory::Input, "bad");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "request_error");
        assert_eq!(json["category"], "input");

        let reply = Reply::Event(SessionEvent::VolumeChanged { volume: 0.5 });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "volume_changed");
    }

    #[tokio::test]
    async fn test_hello_name_is_used_for_added_by() {
        let state = test_state();
        let (id, _rx) = state.manager.broadcaster().connect(None).await;

        let reply = handle_message(
            &state,
            id,
            ClientMessage::Hello {
                display_name: Some("  Robin ".into()),
            },
        )
        .await;
        assert!(matches!(
            reply,
            Some(Reply::Direct(Direct::Welcome { session_id })) if session_id == id
        ));

        let reply = handle_message(
            &state,
            id,
            ClientMessage::AddSong {
                url: "song one".into(),
                added_by: None,
            },
        )
        .await;
        let Some(Reply::Direct(Direct::SongAdded { song_id })) = reply else {
            panic!("expected song_added, got {reply:?}");
        };
        let queue = state.manager.queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, song_id);
        assert_eq!(queue[0].added_by, "Robin");
    }

    #[tokio::test]
    async fn test_bad_requests_reply_with_input_error() {
        let state = test_state();
        let (id, _rx) = state.manager.broadcaster().connect(None).await;

        let reply = handle_message(
            &state,
            id,
            ClientMessage::AddSong {
                url: " ".into(),
                added_by: None,
            },
        )
        .await;
        assert!(matches!(
            reply,
            Some(Reply::Direct(Direct::RequestError(ref e))) if e.category == "input"
        ));

        let reply = handle_text(&state, id, r#"{"type":"launch_rockets"}"#).await;
        assert!(matches!(
            reply,
            Some(Reply::Direct(Direct::RequestError(ref e))) if e.category == "input"
        ));

        let reply = handle_message(
            &state,
            id,
            ClientMessage::SkipSong {
                direction: SkipDirection::Previous,
            },
        )
        .await;
        assert!(matches!(reply, Some(Reply::Direct(Direct::RequestError(_)))));
    }

    #[tokio::test]
    async fn test_benign_races_are_silent() {
        let state = test_state();
        let (id, _rx) = state.manager.broadcaster().connect(None).await;
        let song_id = state.manager.enqueue("kept", None).await.unwrap();

        let reply = handle_message(
            &state,
            id,
            ClientMessage::RemoveFromQueue {
                song_id: EntryId::from(u64::MAX),
            },
        )
        .await;
        assert!(reply.is_none());
        let reply = handle_message(
            &state,
            id,
            ClientMessage::SkipSong {
                direction: SkipDirection::Next,
            },
        )
        .await;
        assert!(reply.is_none());

        let queue = state.manager.queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, song_id);
    }

    #[tokio::test]
    async fn test_state_requests_and_volume() {
        let state = test_state();
        let (id, mut rx) = state.manager.broadcaster().connect(None).await;

        let reply = handle_message(&state, id, ClientMessage::SetVolume { volume: 3.0 }).await;
        assert!(reply.is_none());
        let event = rx.recv().await.unwrap();
        assert_eq!(*event, SessionEvent::VolumeChanged { volume: 1.0 });

        let reply = handle_message(&state, id, ClientMessage::RequestCurrentState).await;
        let Some(Reply::Event(SessionEvent::CurrentState(snapshot))) = reply else {
            panic!("expected current_state, got {reply:?}");
        };
        assert!((snapshot.volume - 1.0).abs() < f32::EPSILON);
        assert!(snapshot.current.is_none());

        let reply = handle_message(&state, id, ClientMessage::RequestQueue).await;
        assert!(matches!(
            reply,
            Some(Reply::Event(SessionEvent::QueueUpdated { ref queue })) if queue.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_lagged_session_resyncs_without_stale_events() {
        let state = test_state();
        let (_id, mut rx) = state.manager.broadcaster().connect(None).await;

        for step in 0..=100u8 {
            state.manager.set_volume(f32::from(step) / 100.0).await;
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));

        let snapshot = resync(&state.manager, &mut rx).await;
        let SessionEvent::CurrentState(snapshot) = snapshot else {
            panic!("expected current_state, got {snapshot:?}");
        };
        assert!((snapshot.volume - 1.0).abs() < f32::EPSILON);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        state.manager.set_volume(0.25).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(*event, SessionEvent::VolumeChanged { volume: 0.25 });
    }
}
