//! Canonical event model.
//!
//! Every server message, whatever its dialect, is translated into an [`Event`].
//! Locally originated notifications (channel closed, connect failure, a
//! synthesised `Started`) use the same type so callers never need to tell
//! them apart.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Response text carried by the synthetic `Close` event.
pub const CLOSE_RESPONSE: &str = r#"{"channelClosed": "nls request finished."}"#;

/// Kind of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    TaskFailed,
    Started,
    ResultChanged,
    SentenceBegin,
    SentenceEnd,
    Completed,
    Close,
    Binary,
    Message,
    SentenceSynthesis,
    SentenceSemantics,
    WakeWordVerificationCompleted,
    DialogResultGenerated,
    MetaInfo,
}

impl EventKind {
    /// Terminal kinds end the request; nothing may follow `Close`. Dialogs
    /// end on `DialogResultGenerated` and treat `Completed` as intermediate.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::TaskFailed | EventKind::Completed | EventKind::Close
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskFailed => "TaskFailed",
            EventKind::Started => "Started",
            EventKind::ResultChanged => "ResultChanged",
            EventKind::SentenceBegin => "SentenceBegin",
            EventKind::SentenceEnd => "SentenceEnd",
            EventKind::Completed => "Completed",
            EventKind::Close => "Close",
            EventKind::Binary => "Binary",
            EventKind::Message => "Message",
            EventKind::SentenceSynthesis => "SentenceSynthesis",
            EventKind::SentenceSemantics => "SentenceSemantics",
            EventKind::WakeWordVerificationCompleted => "WakeWordVerificationCompleted",
            EventKind::DialogResultGenerated => "DialogResultGenerated",
            EventKind::MetaInfo => "MetaInfo",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Word-level timing, in milliseconds from the start of the audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WordInfo {
    pub text: String,
    pub start_time: i64,
    pub end_time: i64,
}

/// Intermediate result of the next sentence, attached to `SentenceEnd`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StashResult {
    pub sentence_id: i32,
    pub begin_time: i64,
    pub current_time: i64,
    pub text: String,
}

/// Recognition and transcription payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    pub display_text: String,
    pub spoken_text: String,
    /// Sentence index (`index` or `sentence_id` depending on the dialect).
    pub sentence_index: i32,
    /// Sentence end time, or current time for intermediate results.
    pub sentence_time: i64,
    pub sentence_begin_time: i64,
    pub confidence: f64,
    /// Non-zero when the sentence was cut by the silence timeout.
    pub sentence_timeout_status: i32,
    pub words: Vec<WordInfo>,
    pub stash: Option<StashResult>,
    /// Billed audio duration in seconds, when reported.
    pub usage_duration: i64,
}

/// Per-sentence synthesis metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SynthesisResult {
    pub sentence_index: i32,
    pub words: Vec<WordInfo>,
    /// Billed characters, when reported.
    pub characters: i64,
}

/// Wake-word verification outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WakeWordResult {
    pub accepted: bool,
    pub known: bool,
    pub user_id: String,
    pub gender: i32,
}

/// Kind-specific data carried by an [`Event`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventPayload {
    #[default]
    None,
    Recognition(RecognitionResult),
    Synthesis(SynthesisResult),
    WakeWord(WakeWordResult),
    Binary(Bytes),
}

/// A decoded notification for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub status_code: i32,
    pub status_text: String,
    pub task_id: String,
    /// Event name as it appeared on the wire (empty for local events).
    pub name: String,
    /// Raw response text; empty for binary frames.
    pub response: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(kind: EventKind, response: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: 0,
            status_text: String::new(),
            task_id: String::new(),
            name: String::new(),
            response: response.into(),
            payload: EventPayload::None,
        }
    }

    /// Local `Close` notification.
    pub fn close(task_id: &str) -> Self {
        let mut event = Self::new(EventKind::Close, CLOSE_RESPONSE);
        event.task_id = task_id.to_string();
        event
    }

    /// Local `TaskFailed` notification. The response is JSON so raw-mode
    /// callers still receive well-formed text.
    pub fn task_failed(task_id: &str, status_code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let response = serde_json::json!({ "TaskFailed": message }).to_string();
        let mut event = Self::new(EventKind::TaskFailed, response);
        event.task_id = task_id.to_string();
        event.status_code = status_code;
        event.status_text = message;
        event
    }

    /// `Started` synthesised when data arrives before the server's own.
    pub fn synthesized_started(task_id: &str, name: &str) -> Self {
        let response = serde_json::json!({
            "header": {
                "name": name,
                "status": 20000000,
                "status_text": "Gateway:SUCCESS:Success.",
                "task_id": task_id,
            }
        })
        .to_string();
        let mut event = Self::new(EventKind::Started, response);
        event.task_id = task_id.to_string();
        event.name = name.to_string();
        event.status_code = 20000000;
        event
    }

    pub fn binary(task_id: &str, data: Bytes) -> Self {
        let mut event = Self::new(EventKind::Binary, "");
        event.task_id = task_id.to_string();
        event.payload = EventPayload::Binary(data);
        event
    }

    pub fn recognition(&self) -> Option<&RecognitionResult> {
        match &self.payload {
            EventPayload::Recognition(r) => Some(r),
            _ => None,
        }
    }

    pub fn synthesis(&self) -> Option<&SynthesisResult> {
        match &self.payload {
            EventPayload::Synthesis(s) => Some(s),
            _ => None,
        }
    }

    pub fn wake_word(&self) -> Option<&WakeWordResult> {
        match &self.payload {
            EventPayload::WakeWord(w) => Some(w),
            _ => None,
        }
    }

    pub fn binary_data(&self) -> Option<&Bytes> {
        match &self.payload {
            EventPayload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Recognised text, if any.
    pub fn text(&self) -> &str {
        self.recognition().map(|r| r.text.as_str()).unwrap_or("")
    }
}
