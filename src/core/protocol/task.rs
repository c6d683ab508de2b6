//! Task-oriented dialect used by the realtime transcription models.
//!
//! ```json
//! {
//!   "header": {"event": "result-generated", "task_id": "..."},
//!   "payload": {
//!     "output": {"sentence": {"sentence_id": 2, "begin_time": 170, "end_time": 920,
//!                             "text": "...", "sentence_end": true,
//!                             "words": [{"text": "...", "begin_time": 170, "end_time": 295}]}},
//!     "usage": {"duration": 3}
//!   }
//! }
//! ```

use serde_json::{Map, Value};

use super::{DecodeMode, DecodeOutcome, Dialect, Fields, recover_from_top_level};
use crate::core::event::{Event, EventKind, EventPayload, RecognitionResult};

pub const TASK_STARTED: &str = "task-started";
pub const RESULT_GENERATED: &str = "result-generated";
pub const TASK_FINISHED: &str = "task-finished";
pub const TASK_FAILED: &str = "task-failed";

/// Decoded envelope shared by both task-oriented dialects.
pub(crate) struct TaskEnvelope<'a> {
    pub(crate) event: Event,
    pub(crate) payload: Option<Fields<'a>>,
}

/// Outcome of reading the header before the payload is looked at.
pub(crate) enum Header<'a> {
    /// Lifecycle event that needs no payload.
    Done(Event),
    /// `result-generated`; the caller decodes the payload.
    Result(TaskEnvelope<'a>),
}

pub(crate) fn decode_header<'a>(
    dialect: Dialect,
    root: &'a Map<String, Value>,
    raw: &str,
    mode: DecodeMode,
) -> Result<Header<'a>, DecodeOutcome> {
    let required = dialect.required_fields();
    let fields = Fields::new(root, mode);

    let Some(header) = fields.object("header")? else {
        return recover_from_top_level(root, raw, mode).map(Header::Done);
    };
    let Some(name) = header.opt_str("event")? else {
        return recover_from_top_level(root, raw, mode).map(Header::Done);
    };

    let kind = match name.as_str() {
        TASK_STARTED => EventKind::Started,
        TASK_FINISHED => EventKind::Completed,
        TASK_FAILED => EventKind::TaskFailed,
        RESULT_GENERATED => EventKind::ResultChanged,
        _ if mode.is_lenient() || !required.event_name => EventKind::Message,
        _ => return Err(DecodeOutcome::UnknownEventName(name)),
    };

    let mut event = Event::new(kind, raw);
    event.task_id = header.string("task_id")?;
    if kind == EventKind::TaskFailed {
        let code = header.string("error_code")?;
        let message = header.string("error_message")?;
        event.status_text = if code.is_empty() {
            message
        } else {
            format!("{code}: {message}")
        };
    }
    event.name = name;

    if kind != EventKind::ResultChanged {
        return Ok(Header::Done(event));
    }
    Ok(Header::Result(TaskEnvelope {
        event,
        payload: fields.object("payload")?,
    }))
}

pub(crate) fn decode(
    root: &Map<String, Value>,
    raw: &str,
    mode: DecodeMode,
) -> Result<Event, DecodeOutcome> {
    let TaskEnvelope { mut event, payload } =
        match decode_header(Dialect::TaskOriented, root, raw, mode)? {
            Header::Done(event) => return Ok(event),
            Header::Result(envelope) => envelope,
        };

    let Some(payload) = payload else {
        return Err(DecodeOutcome::Ignorable);
    };
    let sentence = match payload.object("output")? {
        Some(output) => output.object("sentence")?,
        None => None,
    };
    let Some(sentence) = sentence else {
        return Err(DecodeOutcome::Ignorable);
    };
    if sentence.bool("heartbeat")? {
        return Err(DecodeOutcome::Ignorable);
    }

    // end wins over begin when both are flagged
    event.kind = if sentence.bool("sentence_end")? {
        EventKind::SentenceEnd
    } else if sentence.bool("sentence_begin")? {
        EventKind::SentenceBegin
    } else {
        EventKind::ResultChanged
    };

    let begin_time = sentence.i64("begin_time")?;
    let time = sentence.opt_i64("end_time")?.unwrap_or(begin_time);
    let usage_duration = match payload.object("usage")? {
        Some(usage) => usage.i64("duration")?,
        None => 0,
    };

    event.payload = EventPayload::Recognition(RecognitionResult {
        text: sentence.string("text")?,
        sentence_index: sentence.i32("sentence_id")?,
        sentence_time: time,
        sentence_begin_time: begin_time,
        words: sentence.words("words", "begin_time", "end_time")?,
        usage_duration,
        ..Default::default()
    });
    Ok(event)
}
