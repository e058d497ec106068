//! WebSocket API
//!
//! Two channels per session: `/ws/{session}` streams bus events (job
//! lifecycle, slices, sequences) with history replay on connect, and
//! `/ws/sequencer/{session}` drives the sequencer transport.
//!
//! Sockets are split into sink/stream halves so the event pump and the
//! message loop can run in one `select!` without fighting over the socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use loopforge_common::db::jobs;
use loopforge_common::events::{BeatData, ForgeEvent, TransportData};

use crate::AppState;

/// Sequencer resolution: ticks per beat.
const TICKS_PER_BEAT: f64 = 24.0;

type WsSink = SplitSink<WebSocket, Message>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/:session_id", get(session_ws))
        .route("/ws/sequencer/:session_id", get(sequencer_ws))
}

async fn session_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_session_socket(socket, state, session_id))
}

async fn send_json(sink: &mut WsSink, value: serde_json::Value) -> bool {
    match serde_json::to_string(&value) {
        Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

/// Real-time session updates: history replay, then live events.
async fn handle_session_socket(socket: WebSocket, state: AppState, session_id: Uuid) {
    let (mut sink, mut stream) = socket.split();

    // Replay what the client missed while disconnected
    for event in state.event_bus.history(session_id, None) {
        let Ok(text) = serde_json::to_string(&event) else { continue };
        if sink.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    if !send_current_state(&mut sink, &state, session_id).await {
        return;
    }

    let mut events = BroadcastStream::new(state.event_bus.subscribe());

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Ok(event)) if event.session_id() == session_id => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(session_id = %session_id, skipped, "WS subscriber lagged");
                    }
                    None => break,
                }
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(request) = serde_json::from_str::<serde_json::Value>(&text) else { continue };

                match request.get("type").and_then(|t| t.as_str()) {
                    Some("ping") => {
                        if !send_json(&mut sink, json!({"type": "pong"})).await {
                            break;
                        }
                    }
                    Some("get_state") => {
                        if !send_current_state(&mut sink, &state, session_id).await {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Push the session's current job rows so a fresh client can render state.
async fn send_current_state(sink: &mut WsSink, state: &AppState, session_id: Uuid) -> bool {
    let jobs = match jobs::list(&state.db, Some(session_id), None, 100).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load jobs for WS state");
            return true;
        }
    };

    for job in jobs {
        let message = json!({
            "type": format!("job.{}", job.status.to_string().to_lowercase()),
            "session_id": session_id,
            "data": job,
            "timestamp": Utc::now(),
        });
        if !send_json(sink, message).await {
            return false;
        }
    }
    true
}

async fn sequencer_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_sequencer_socket(socket, state, session_id))
}

/// Transport state for one sequencer connection.
struct SequencerState {
    is_playing: bool,
    current_beat: f64,
    bpm: f64,
    events: Vec<serde_json::Value>,
    current_event_index: usize,
    last_whole_beat: i64,
}

impl SequencerState {
    fn new() -> Self {
        Self {
            is_playing: false,
            current_beat: 0.0,
            bpm: 120.0,
            events: Vec::new(),
            current_event_index: 0,
            last_whole_beat: -1,
        }
    }

    fn tick_interval(&self) -> Duration {
        let beat_duration = 60.0 / self.bpm;
        Duration::from_secs_f64(beat_duration / TICKS_PER_BEAT)
    }

    fn event_time(&self, index: usize) -> f64 {
        self.events
            .get(index)
            .and_then(|e| e.get("time"))
            .and_then(|t| t.as_f64())
            .unwrap_or(0.0)
    }
}

fn fresh_interval(sequencer: &SequencerState) -> tokio::time::Interval {
    let mut tick = tokio::time::interval(sequencer.tick_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick
}

/// Sequencer transport loop.
///
/// Emitted beat positions are monotone non-decreasing while playing; once
/// `is_playing` flips to false no further trigger/beat messages are sent.
async fn handle_sequencer_socket(socket: WebSocket, state: AppState, session_id: Uuid) {
    let (mut sink, mut stream) = socket.split();
    let mut sequencer = SequencerState::new();
    let mut tick = fresh_interval(&sequencer);

    loop {
        tokio::select! {
            _ = tick.tick(), if sequencer.is_playing => {
                if !advance_playback(&mut sink, &state, &mut sequencer, session_id).await {
                    break;
                }
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(request) = serde_json::from_str::<serde_json::Value>(&text) else { continue };

                if !handle_transport_message(&mut sink, &state, &mut sequencer, session_id, &request)
                    .await
                {
                    break;
                }
                // bpm or sequence changes retime the tick clock
                tick = fresh_interval(&sequencer);
            }
        }
    }
}

/// Apply one client transport message. Returns false when the socket died.
async fn handle_transport_message(
    sink: &mut WsSink,
    state: &AppState,
    sequencer: &mut SequencerState,
    session_id: Uuid,
    request: &serde_json::Value,
) -> bool {
    match request.get("type").and_then(|t| t.as_str()) {
        Some("load_sequence") => {
            sequencer.events = request
                .get("events")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            sequencer.bpm = request
                .get("bpm")
                .and_then(|b| b.as_f64())
                .filter(|b| *b > 0.0 && *b <= 300.0)
                .unwrap_or(120.0);
            sequencer.current_event_index = 0;
            sequencer.current_beat = 0.0;
            sequencer.last_whole_beat = -1;

            send_json(
                sink,
                json!({"type": "loaded", "num_events": sequencer.events.len()}),
            )
            .await
        }

        Some("play") => {
            sequencer.is_playing = true;
            state.event_bus.emit(ForgeEvent::Transport {
                session_id,
                data: TransportData {
                    is_playing: true,
                    beat: sequencer.current_beat,
                },
                timestamp: Utc::now(),
            });
            send_json(
                sink,
                json!({"type": "state", "is_playing": true, "beat": sequencer.current_beat}),
            )
            .await
        }

        Some("stop") => {
            sequencer.is_playing = false;
            state.event_bus.emit(ForgeEvent::Transport {
                session_id,
                data: TransportData {
                    is_playing: false,
                    beat: sequencer.current_beat,
                },
                timestamp: Utc::now(),
            });
            send_json(
                sink,
                json!({"type": "state", "is_playing": false, "beat": sequencer.current_beat}),
            )
            .await
        }

        Some("seek") => {
            sequencer.current_beat = request.get("beat").and_then(|b| b.as_f64()).unwrap_or(0.0);
            sequencer.last_whole_beat = sequencer.current_beat as i64 - 1;
            // Skip ahead to the first event at or after the new position
            sequencer.current_event_index = 0;
            while sequencer.current_event_index < sequencer.events.len()
                && sequencer.event_time(sequencer.current_event_index) < sequencer.current_beat
            {
                sequencer.current_event_index += 1;
            }
            true
        }

        Some("set_bpm") => {
            sequencer.bpm = request
                .get("bpm")
                .and_then(|b| b.as_f64())
                .filter(|b| *b > 0.0 && *b <= 300.0)
                .unwrap_or(sequencer.bpm);
            true
        }

        Some("ping") => send_json(sink, json!({"type": "pong"})).await,

        _ => true,
    }
}

/// One playback tick: fire due events, announce whole-beat crossings,
/// advance the transport, and wrap at the loop end.
async fn advance_playback(
    sink: &mut WsSink,
    state: &AppState,
    sequencer: &mut SequencerState,
    session_id: Uuid,
) -> bool {
    while sequencer.current_event_index < sequencer.events.len()
        && sequencer.event_time(sequencer.current_event_index) <= sequencer.current_beat
    {
        let event = sequencer.events[sequencer.current_event_index].clone();
        state.event_bus.emit(ForgeEvent::Trigger {
            session_id,
            data: event.clone(),
            timestamp: Utc::now(),
        });
        if !send_json(
            sink,
            json!({"type": "trigger", "event": event, "beat": sequencer.current_beat}),
        )
        .await
        {
            sequencer.is_playing = false;
            return false;
        }
        sequencer.current_event_index += 1;
    }

    let whole_beat = sequencer.current_beat as i64;
    if whole_beat != sequencer.last_whole_beat {
        sequencer.last_whole_beat = whole_beat;
        state.event_bus.emit(ForgeEvent::Beat {
            session_id,
            data: BeatData { beat: whole_beat },
            timestamp: Utc::now(),
        });
        if !send_json(sink, json!({"type": "beat", "beat": whole_beat})).await {
            sequencer.is_playing = false;
            return false;
        }
    }

    sequencer.current_beat += 1.0 / TICKS_PER_BEAT;

    // Loop: one beat of tail after the last event, then wrap to the top
    if !sequencer.events.is_empty() && sequencer.current_event_index >= sequencer.events.len() {
        let max_time = (0..sequencer.events.len())
            .map(|i| sequencer.event_time(i))
            .fold(0.0f64, f64::max);
        if sequencer.current_beat > max_time + 1.0 {
            sequencer.current_event_index = 0;
            sequencer.current_beat = 0.0;
            sequencer.last_whole_beat = -1;
        }
    }

    true
}
