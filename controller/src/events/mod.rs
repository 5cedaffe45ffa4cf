//! Progress events streamed to log viewers
//!
//! Every build and rollout reports its phase transitions through an
//! [`EventSink`]. Events are grouped by room (the build slug or release id);
//! the last event of a room carries `end = true`.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Log,
    Error,
}

/// One progress message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub room: String,
    pub message: String,
    pub kind: EventKind,

    /// Terminates the room's stream
    pub end: bool,
}

/// Receiver of progress events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Broadcasts events to any number of subscribers and mirrors them into tracing
pub struct ChannelSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        match event.kind {
            EventKind::Log => info!("[{}] {}", event.room, event.message),
            EventKind::Error => error!("[{}] {}", event.room, event.message),
        }
        // No subscribers is fine, tracing already has the message
        let _ = self.tx.send(event);
    }
}

/// Room-scoped handle used by the build engine and the rollout controller
#[derive(Clone)]
pub struct Progress {
    sink: Arc<dyn EventSink>,
    room: String,
}

impl Progress {
    pub fn new(sink: Arc<dyn EventSink>, room: impl Into<String>) -> Self {
        Self {
            sink,
            room: room.into(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn log(&self, message: impl Into<String>) {
        self.send(message.into(), EventKind::Log, false);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(message.into(), EventKind::Error, false);
    }

    /// Final success summary, closes the room
    pub fn finish_ok(&self, message: impl Into<String>) {
        self.send(message.into(), EventKind::Log, true);
    }

    /// Final one-line failure reason, closes the room
    pub fn finish_err(&self, message: impl Into<String>) {
        self.send(message.into(), EventKind::Error, true);
    }

    fn send(&self, message: String, kind: EventKind, end: bool) {
        self.sink.emit(ProgressEvent {
            room: self.room.clone(),
            message,
            kind,
            end,
        });
    }
}
