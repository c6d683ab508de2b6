//! Streaming text-to-speech dialect.
//!
//! Shares the task envelope with [`super::task`]. A `result-generated`
//! message is delivered as `SentenceSynthesis` only when it carries word
//! timing or usage; anything else is [`DecodeOutcome::Ignorable`].

use serde_json::{Map, Value};

use super::task::{Header, TaskEnvelope, decode_header};
use super::{DecodeMode, DecodeOutcome, Dialect};
use crate::core::event::{Event, EventKind, EventPayload, SynthesisResult};

pub(crate) fn decode(
    root: &Map<String, Value>,
    raw: &str,
    mode: DecodeMode,
) -> Result<Event, DecodeOutcome> {
    let TaskEnvelope { mut event, payload } =
        match decode_header(Dialect::StreamingTts, root, raw, mode)? {
            Header::Done(event) => return Ok(event),
            Header::Result(envelope) => envelope,
        };
    let Some(payload) = payload else {
        return Err(DecodeOutcome::Ignorable);
    };

    let mut result = SynthesisResult::default();
    if let Some(sentence) = payload
        .object("output")?
        .map(|output| output.object("sentence"))
        .transpose()?
        .flatten()
    {
        result.sentence_index = sentence.i32("index")?;
        result.words = sentence.words("words", "begin_time", "end_time")?;
    }

    let characters = match payload.object("usage")? {
        Some(usage) => usage.opt_i64("characters")?,
        None => None,
    };

    if result.words.is_empty() && characters.is_none() {
        return Err(DecodeOutcome::Ignorable);
    }
    result.characters = characters.unwrap_or_default();

    event.kind = EventKind::SentenceSynthesis;
    event.payload = EventPayload::Synthesis(result);
    Ok(event)
}
