//! Output channel: the standing listener for sandbox messages and the
//! transcript it feeds.
//!
//! Sandboxes post `{"type": "log", "text": ..., "level"?: ..., "generation"?: ...}`.
//! The sender's origin is not checked. Anything that does not match the schema
//! is dropped without surfacing an error. Messages tagged with a generation
//! older than the current run come from a replaced sandbox and are dropped
//! too; untagged messages (a markup document posting by hand) are accepted.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{event, trace};

use crate::{
    TRACE_TARGET_SANDBOX,
    host::{NoopDisplay, TranscriptDisplay},
    sandbox::Generation,
};

/// Prefix marking error entries on display.
pub const ERROR_MARKER: &str = "[err] ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[default]
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: LogKind,
    pub text: String,
}

impl LogEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            text: text.into(),
        }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.kind, LogKind::Error)
    }

    /// The line shown to the user.
    #[must_use]
    pub fn line(&self) -> String {
        match self.kind {
            LogKind::Info => self.text.clone(),
            LogKind::Error => format!("{ERROR_MARKER}{}", self.text),
        }
    }
}

/// Message accepted from a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Log {
        text: String,
        #[serde(default)]
        level: LogKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<Generation>,
    },
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Sent by a sandbox that a newer run has replaced.
    Stale,
    /// Did not match the message schema.
    Rejected,
}

#[derive(Default)]
struct ChannelState {
    generation: Generation,
    transcript: Vec<LogEvent>,
}

pub struct OutputChannel {
    state: Mutex<ChannelState>,
    display: Arc<dyn TranscriptDisplay>,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new(Arc::new(NoopDisplay))
    }
}

impl OutputChannel {
    /// Lines are forwarded to `display` while the transcript lock is held, so
    /// the display must not call back into the channel.
    pub fn new(display: Arc<dyn TranscriptDisplay>) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            display,
        }
    }

    /// Clear the transcript and start a new generation.
    pub fn begin_run(&self) -> Generation {
        let mut state = self.state.lock();
        state.generation = state.generation.next();
        state.transcript.clear();
        self.display.clear();
        state.generation
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.transcript.clear();
        self.display.clear();
    }

    pub fn generation(&self) -> Generation {
        self.state.lock().generation
    }

    pub fn append(&self, event: LogEvent) {
        let mut state = self.state.lock();
        Self::push(&mut state, &*self.display, event);
    }

    /// Append on behalf of run `generation`. Dropped once a newer run has
    /// begun.
    pub fn append_for(&self, generation: Generation, event: LogEvent) -> Delivery {
        let mut state = self.state.lock();
        if generation != state.generation {
            trace!(
                %generation,
                current = %state.generation,
                "Discarding output of a replaced run"
            );
            return Delivery::Stale;
        }
        Self::push(&mut state, &*self.display, event);
        Delivery::Accepted
    }

    /// Accept a raw message as delivered by the cross-document bridge.
    pub fn receive_json(&self, raw: &str) -> Delivery {
        match serde_json::from_str::<InboundMessage>(raw) {
            Ok(message) => self.receive(message),
            Err(error) => {
                trace!(%error, "Discarding malformed sandbox message");
                Delivery::Rejected
            }
        }
    }

    pub fn receive_value(&self, value: serde_json::Value) -> Delivery {
        match serde_json::from_value::<InboundMessage>(value) {
            Ok(message) => self.receive(message),
            Err(error) => {
                trace!(%error, "Discarding malformed sandbox message");
                Delivery::Rejected
            }
        }
    }

    pub fn receive(&self, message: InboundMessage) -> Delivery {
        let InboundMessage::Log {
            text,
            level,
            generation,
        } = message;

        let mut state = self.state.lock();
        if let Some(generation) = generation.filter(|g| *g < state.generation) {
            trace!(
                %generation,
                current = %state.generation,
                "Discarding message from a replaced sandbox"
            );
            return Delivery::Stale;
        }

        match level {
            LogKind::Info => event!(
                target: TRACE_TARGET_SANDBOX,
                tracing::Level::DEBUG,
                log.output = %text,
                "sandbox log"
            ),
            LogKind::Error => event!(
                target: TRACE_TARGET_SANDBOX,
                tracing::Level::DEBUG,
                log.error = %text,
                "sandbox error"
            ),
        }
        Self::push(&mut state, &*self.display, LogEvent { kind: level, text });
        Delivery::Accepted
    }

    pub fn entries(&self) -> Vec<LogEvent> {
        self.state.lock().transcript.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.state
            .lock()
            .transcript
            .iter()
            .map(LogEvent::line)
            .collect()
    }

    fn push(state: &mut ChannelState, display: &dyn TranscriptDisplay, event: LogEvent) {
        display.append_line(&event.line());
        state.transcript.push(event);
    }
}
