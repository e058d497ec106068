//! Event types for the LoopForge event system
//!
//! Provides the shared `ForgeEvent` definition and the `EventBus` used by the
//! job orchestrator, the API edge and the sequencer transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Progress payload for `job.progress`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressData {
    pub job_id: Uuid,
    pub progress: f64,
    pub stage: String,
}

/// Payload for `job.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedData {
    pub job_id: Uuid,
    pub job_type: String,
    pub output_paths: HashMap<String, String>,
}

/// Payload for `job.failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailedData {
    pub job_id: Uuid,
    pub job_type: Option<String>,
    pub error: String,
}

/// Payload for `slice_bank.created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceBankCreatedData {
    pub slice_bank_id: Uuid,
    pub num_slices: usize,
    pub role: String,
}

/// Payload for `sequence.generated`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceGeneratedData {
    pub sequence_id: Uuid,
    pub num_events: usize,
    pub seed: i64,
}

/// Payload for `beat` (sequencer transport tick)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatData {
    pub beat: i64,
}

/// Payload for `transport` (sequencer play/stop/seek state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportData {
    pub is_playing: bool,
    pub beat: f64,
}

/// LoopForge event types
///
/// Events form a closed set: job lifecycle, session updates, slice/sequence
/// creation, and sequencer playback. The serialized shape is
/// `{type, session_id, data, timestamp}`, matching what WebSocket clients
/// consume directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ForgeEvent {
    /// New job row inserted; `data` is the job snapshot
    #[serde(rename = "job.created")]
    JobCreated {
        session_id: Uuid,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Job claimed by a worker
    #[serde(rename = "job.started")]
    JobStarted {
        session_id: Uuid,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Debounced progress update for a running job
    #[serde(rename = "job.progress")]
    JobProgress {
        session_id: Uuid,
        data: JobProgressData,
        timestamp: DateTime<Utc>,
    },

    /// Terminal: job finished with its output paths
    #[serde(rename = "job.completed")]
    JobCompleted {
        session_id: Uuid,
        data: JobCompletedData,
        timestamp: DateTime<Utc>,
    },

    /// Terminal: job failed with a short human message
    #[serde(rename = "job.failed")]
    JobFailed {
        session_id: Uuid,
        data: JobFailedData,
        timestamp: DateTime<Utc>,
    },

    /// Session created from an upload; `data` is the session snapshot
    #[serde(rename = "session.created")]
    SessionCreated {
        session_id: Uuid,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Session fields changed (bpm/key/duration from analysis)
    #[serde(rename = "session.updated")]
    SessionUpdated {
        session_id: Uuid,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// A slice bank was persisted
    #[serde(rename = "slice_bank.created")]
    SliceBankCreated {
        session_id: Uuid,
        data: SliceBankCreatedData,
        timestamp: DateTime<Utc>,
    },

    /// A trigger sequence was generated and persisted
    #[serde(rename = "sequence.generated")]
    SequenceGenerated {
        session_id: Uuid,
        data: SequenceGeneratedData,
        timestamp: DateTime<Utc>,
    },

    /// Sequencer fired a trigger event; `data` carries the event payload
    #[serde(rename = "trigger")]
    Trigger {
        session_id: Uuid,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Sequencer crossed an integer beat boundary
    #[serde(rename = "beat")]
    Beat {
        session_id: Uuid,
        data: BeatData,
        timestamp: DateTime<Utc>,
    },

    /// Sequencer transport state changed
    #[serde(rename = "transport")]
    Transport {
        session_id: Uuid,
        data: TransportData,
        timestamp: DateTime<Utc>,
    },
}

impl ForgeEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ForgeEvent::JobCreated { .. } => "job.created",
            ForgeEvent::JobStarted { .. } => "job.started",
            ForgeEvent::JobProgress { .. } => "job.progress",
            ForgeEvent::JobCompleted { .. } => "job.completed",
            ForgeEvent::JobFailed { .. } => "job.failed",
            ForgeEvent::SessionCreated { .. } => "session.created",
            ForgeEvent::SessionUpdated { .. } => "session.updated",
            ForgeEvent::SliceBankCreated { .. } => "slice_bank.created",
            ForgeEvent::SequenceGenerated { .. } => "sequence.generated",
            ForgeEvent::Trigger { .. } => "trigger",
            ForgeEvent::Beat { .. } => "beat",
            ForgeEvent::Transport { .. } => "transport",
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            ForgeEvent::JobCreated { session_id, .. }
            | ForgeEvent::JobStarted { session_id, .. }
            | ForgeEvent::JobProgress { session_id, .. }
            | ForgeEvent::JobCompleted { session_id, .. }
            | ForgeEvent::JobFailed { session_id, .. }
            | ForgeEvent::SessionCreated { session_id, .. }
            | ForgeEvent::SessionUpdated { session_id, .. }
            | ForgeEvent::SliceBankCreated { session_id, .. }
            | ForgeEvent::SequenceGenerated { session_id, .. }
            | ForgeEvent::Trigger { session_id, .. }
            | ForgeEvent::Beat { session_id, .. }
            | ForgeEvent::Transport { session_id, .. } => *session_id,
        }
    }

    /// When the event was published
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ForgeEvent::JobCreated { timestamp, .. }
            | ForgeEvent::JobStarted { timestamp, .. }
            | ForgeEvent::JobProgress { timestamp, .. }
            | ForgeEvent::JobCompleted { timestamp, .. }
            | ForgeEvent::JobFailed { timestamp, .. }
            | ForgeEvent::SessionCreated { timestamp, .. }
            | ForgeEvent::SessionUpdated { timestamp, .. }
            | ForgeEvent::SliceBankCreated { timestamp, .. }
            | ForgeEvent::SequenceGenerated { timestamp, .. }
            | ForgeEvent::Trigger { timestamp, .. }
            | ForgeEvent::Beat { timestamp, .. }
            | ForgeEvent::Transport { timestamp, .. } => *timestamp,
        }
    }
}

/// How many past events are kept per session for replay on reconnect.
const HISTORY_LIMIT: usize = 100;

/// Central event distribution bus
///
/// Built on `tokio::sync::broadcast`, which gives:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers with automatic cleanup on drop
/// - Lagged-receiver detection instead of head-of-line blocking
///
/// `emit` is callable from any thread (the broadcast sender is `Send + Sync`),
/// so job workers on blocking threads publish directly without marshaling.
/// Per-session delivery order follows publish order; there is no total order
/// across sessions.
///
/// On top of the live channel the bus keeps the last [`HISTORY_LIMIT`] events
/// per session so a reconnecting WebSocket client can replay what it missed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ForgeEvent>,
    capacity: usize,
    history: Arc<Mutex<HashMap<Uuid, VecDeque<ForgeEvent>>>>,
}

impl EventBus {
    /// Creates a new EventBus with the given live-channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            capacity,
            history: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to all future events.
    ///
    /// Receivers filter by `event.session_id()` where per-session delivery is
    /// wanted; a receiver used unfiltered is a global subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event, ignoring whether anyone is listening.
    ///
    /// The event is recorded in the session's replay history either way.
    pub fn emit(&self, event: ForgeEvent) {
        self.store_in_history(&event);
        let _ = self.tx.send(event);
    }

    /// Events recorded for a session, oldest first, optionally only those
    /// published after `since`.
    pub fn history(&self, session_id: Uuid, since: Option<DateTime<Utc>>) -> Vec<ForgeEvent> {
        let history = self.history.lock().expect("event history lock poisoned");
        match history.get(&session_id) {
            Some(events) => events
                .iter()
                .filter(|e| since.map_or(true, |s| e.timestamp() > s))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop the replay history for a session (on session delete).
    pub fn clear_history(&self, session_id: Uuid) {
        let mut history = self.history.lock().expect("event history lock poisoned");
        history.remove(&session_id);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn store_in_history(&self, event: &ForgeEvent) {
        let mut history = self.history.lock().expect("event history lock poisoned");
        let entries = history.entry(event.session_id()).or_default();
        entries.push_back(event.clone());
        while entries.len() > HISTORY_LIMIT {
            entries.pop_front();
        }
    }
}

/// Helper constructor for `job.progress`
pub fn job_progress(session_id: Uuid, job_id: Uuid, progress: f64, stage: &str) -> ForgeEvent {
    ForgeEvent::JobProgress {
        session_id,
        data: JobProgressData {
            job_id,
            progress,
            stage: stage.to_string(),
        },
        timestamp: Utc::now(),
    }
}

/// Helper constructor for `job.completed`
pub fn job_completed(
    session_id: Uuid,
    job_id: Uuid,
    job_type: &str,
    output_paths: HashMap<String, String>,
) -> ForgeEvent {
    ForgeEvent::JobCompleted {
        session_id,
        data: JobCompletedData {
            job_id,
            job_type: job_type.to_string(),
            output_paths,
        },
        timestamp: Utc::now(),
    }
}

/// Helper constructor for `job.failed`
pub fn job_failed(
    session_id: Uuid,
    job_id: Uuid,
    job_type: Option<String>,
    error: String,
) -> ForgeEvent {
    ForgeEvent::JobFailed {
        session_id,
        data: JobFailedData {
            job_id,
            job_type,
            error,
        },
        timestamp: Utc::now(),
    }
}
