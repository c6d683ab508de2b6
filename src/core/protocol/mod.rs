//! Protocol translation.
//!
//! Each backend family speaks its own JSON dialect. A [`Dialect`] selects one
//! decode function; all of them share the contract
//! `decode(raw) -> Result<Event, DecodeOutcome>`, where
//! [`DecodeOutcome::Ignorable`] marks a well-formed message that carries
//! nothing to deliver.

mod fields;
pub mod legacy;
pub mod streaming_tts;
pub mod task;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::core::event::{Event, EventKind, EventPayload};

pub(crate) use fields::Fields;

/// Why a raw message did not produce an event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    #[error("message is empty")]
    MessageEmpty,

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("unknown event name '{0}'")]
    UnknownEventName(String),

    #[error("header has no status code")]
    MissingStatusCode,

    #[error("message has no usable header")]
    MissingHeader,

    #[error("field '{0}' has an unexpected type")]
    InvalidField(String),

    /// Well-formed, but nothing to deliver.
    #[error("message carries no deliverable content")]
    Ignorable,
}

impl DecodeOutcome {
    pub fn is_ignorable(&self) -> bool {
        matches!(self, DecodeOutcome::Ignorable)
    }
}

/// Whether missing or mistyped fields are tolerated or escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    #[default]
    Strict,
    /// Best effort: keep whatever can be recovered.
    Lenient,
}

impl DecodeMode {
    pub fn is_lenient(&self) -> bool {
        matches!(self, DecodeMode::Lenient)
    }
}

/// Header fields a dialect insists on in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredFields {
    /// `header.name` (legacy) or `header.event` (task-oriented dialects).
    pub event_name: bool,
    /// `header.status`.
    pub status_code: bool,
}

/// A server wire-message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `header.name` / `header.status` envelope with a flat payload.
    Legacy,
    /// `header.event` task protocol with `payload.output.sentence`.
    TaskOriented,
    /// Task protocol for streaming text-to-speech.
    StreamingTts,
}

impl Dialect {
    pub const fn required_fields(&self) -> RequiredFields {
        match self {
            Dialect::Legacy => RequiredFields {
                event_name: true,
                status_code: true,
            },
            Dialect::TaskOriented | Dialect::StreamingTts => RequiredFields {
                event_name: true,
                status_code: false,
            },
        }
    }

    /// Decode one raw text message.
    pub fn decode(&self, raw: &str, mode: DecodeMode) -> Result<Event, DecodeOutcome> {
        let root = parse_root(raw)?;
        match self {
            Dialect::Legacy => legacy::decode(&root, raw, mode),
            Dialect::TaskOriented => task::decode(&root, raw, mode),
            Dialect::StreamingTts => streaming_tts::decode(&root, raw, mode),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Legacy => write!(f, "legacy"),
            Dialect::TaskOriented => write!(f, "task-oriented"),
            Dialect::StreamingTts => write!(f, "streaming-tts"),
        }
    }
}

fn parse_root(raw: &str) -> Result<Map<String, Value>, DecodeOutcome> {
    if raw.trim().is_empty() {
        return Err(DecodeOutcome::MessageEmpty);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecodeOutcome::MalformedJson(format!(
            "expected an object, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(DecodeOutcome::MalformedJson(e.to_string())),
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Recover a minimal event from a message whose header is absent or has no
/// name, by looking at the top-level keys local events use.
pub(crate) fn recover_from_top_level(
    root: &Map<String, Value>,
    raw: &str,
    mode: DecodeMode,
) -> Result<Event, DecodeOutcome> {
    if root.contains_key("channelClosed") {
        return Ok(Event::new(EventKind::Close, raw));
    }
    if let Some(reason) = root.get("TaskFailed") {
        let mut event = Event::new(EventKind::TaskFailed, raw);
        event.status_text = reason.as_str().map(str::to_string).unwrap_or_default();
        return Ok(event);
    }
    if mode.is_lenient() {
        return Ok(Event::new(EventKind::Message, raw));
    }
    Err(DecodeOutcome::MissingHeader)
}

/// Remembers `SentenceBegin` timing per sentence so a `SentenceEnd` that
/// lacks it can be completed.
#[derive(Debug, Default)]
pub struct SentenceTracker {
    begins: HashMap<i32, i64>,
}

impl SentenceTracker {
    pub fn observe(&mut self, event: &mut Event) {
        let EventPayload::Recognition(result) = &mut event.payload else {
            return;
        };
        match event.kind {
            EventKind::SentenceBegin => {
                self.begins
                    .insert(result.sentence_index, result.sentence_begin_time);
            }
            EventKind::SentenceEnd => {
                let begin = self.begins.remove(&result.sentence_index);
                if result.sentence_begin_time == 0 {
                    result.sentence_begin_time = begin.unwrap_or_default();
                }
            }
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.begins.clear();
    }
}

/// Stateful translator owned by one connection.
#[derive(Debug)]
pub struct Translator {
    dialect: Dialect,
    mode: DecodeMode,
    sentences: SentenceTracker,
}

impl Translator {
    pub fn new(dialect: Dialect, mode: DecodeMode) -> Self {
        Self {
            dialect,
            mode,
            sentences: SentenceTracker::default(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn decode(&mut self, raw: &str) -> Result<Event, DecodeOutcome> {
        let mut event = self.dialect.decode(raw, self.mode)?;
        self.sentences.observe(&mut event);
        Ok(event)
    }

    pub fn reset(&mut self) {
        self.sentences.reset();
    }
}
