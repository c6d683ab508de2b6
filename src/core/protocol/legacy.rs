//! Legacy gateway dialect.
//!
//! ```json
//! {
//!   "header": {"namespace": "SpeechTranscriber", "name": "SentenceEnd",
//!              "status": 20000000, "task_id": "..."},
//!   "payload": {"index": 1, "time": 2460, "begin_time": 810,
//!               "result": "...", "confidence": 0.9,
//!               "words": [{"text": "...", "startTime": 810, "endTime": 2460}]}
//! }
//! ```

use serde_json::{Map, Value};

use super::{DecodeMode, DecodeOutcome, Dialect, Fields, recover_from_top_level};
use crate::core::event::{
    Event, EventKind, EventPayload, RecognitionResult, StashResult, SynthesisResult,
    WakeWordResult,
};

/// Map a legacy `header.name` to its event kind.
pub fn event_kind(name: &str) -> Option<EventKind> {
    let kind = match name {
        "TaskFailed" => EventKind::TaskFailed,
        "RecognitionStarted" | "TranscriptionStarted" | "SynthesisStarted" => EventKind::Started,
        "RecognitionResultChanged" | "TranscriptionResultChanged" => EventKind::ResultChanged,
        "RecognitionCompleted" | "TranscriptionCompleted" | "SynthesisCompleted" => {
            EventKind::Completed
        }
        "SentenceBegin" => EventKind::SentenceBegin,
        "SentenceEnd" => EventKind::SentenceEnd,
        "SentenceSynthesis" => EventKind::SentenceSynthesis,
        "SentenceSemantics" => EventKind::SentenceSemantics,
        "WakeWordVerificationCompleted" => EventKind::WakeWordVerificationCompleted,
        "DialogResultGenerated" => EventKind::DialogResultGenerated,
        "MetaInfo" => EventKind::MetaInfo,
        _ => return None,
    };
    Some(kind)
}

pub(crate) fn decode(
    root: &Map<String, Value>,
    raw: &str,
    mode: DecodeMode,
) -> Result<Event, DecodeOutcome> {
    let required = Dialect::Legacy.required_fields();
    let fields = Fields::new(root, mode);

    let Some(header) = fields.object("header")? else {
        return recover_from_top_level(root, raw, mode);
    };
    let Some(name) = header.opt_str("name")? else {
        return recover_from_top_level(root, raw, mode);
    };

    let kind = match event_kind(&name) {
        Some(kind) => kind,
        None if mode.is_lenient() || !required.event_name => EventKind::Message,
        None => return Err(DecodeOutcome::UnknownEventName(name)),
    };

    let status_code = match header.opt_i64("status")? {
        Some(code) => i32::try_from(code).unwrap_or_default(),
        None if mode.is_lenient() || !required.status_code => 0,
        None => return Err(DecodeOutcome::MissingStatusCode),
    };

    let mut event = Event::new(kind, raw);
    event.name = name;
    event.status_code = status_code;
    event.status_text = header.string("status_text")?;
    event.task_id = header.string("task_id")?;

    // completion of a synthesis and meta info carry no payload worth reading
    if event.name == "SynthesisCompleted" || kind == EventKind::MetaInfo {
        return Ok(event);
    }
    let Some(payload) = fields.object("payload")? else {
        return Ok(event);
    };

    event.payload = match kind {
        EventKind::SentenceSynthesis => EventPayload::Synthesis(SynthesisResult {
            sentence_index: payload.i32("index")?,
            words: payload.words("subtitles", "begin_time", "end_time")?,
            characters: usage(&payload, "characters")?,
        }),
        EventKind::WakeWordVerificationCompleted => EventPayload::WakeWord(WakeWordResult {
            accepted: payload.bool("accepted")?,
            known: payload.bool("known")?,
            user_id: payload.string("user_id")?,
            gender: payload.i32("gender")?,
        }),
        EventKind::TaskFailed | EventKind::Started | EventKind::Message => EventPayload::None,
        _ => EventPayload::Recognition(recognition(&payload, kind)?),
    };
    Ok(event)
}

fn recognition(payload: &Fields<'_>, kind: EventKind) -> Result<RecognitionResult, DecodeOutcome> {
    let stash = match payload.object("stash_result")? {
        Some(stash) if kind == EventKind::SentenceEnd => Some(StashResult {
            sentence_id: stash.i32("sentenceId")?,
            begin_time: stash.i64("beginTime")?,
            current_time: stash.i64("currentTime")?,
            text: stash.string("text")?,
        }),
        _ => None,
    };

    Ok(RecognitionResult {
        text: payload.string("result")?,
        display_text: payload.string("display_text")?,
        spoken_text: payload.string("spoken_text")?,
        sentence_index: payload.i32("index")?,
        sentence_time: payload.i64("time")?,
        sentence_begin_time: payload.i64("begin_time")?,
        confidence: payload.f64("confidence")?,
        sentence_timeout_status: payload.i32("status")?,
        words: payload.words("words", "startTime", "endTime")?,
        stash,
        usage_duration: usage(payload, "duration")?,
    })
}

fn usage(payload: &Fields<'_>, key: &str) -> Result<i64, DecodeOutcome> {
    match payload.object("usage")? {
        Some(usage) => usage.i64(key),
        None => Ok(0),
    }
}
