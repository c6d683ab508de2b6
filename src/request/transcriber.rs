//! Real-time transcription (`SpeechTranscriber` namespace).

use super::params::{DEFAULT_GATEWAY_URL, INPUT_FORMATS, RequestParams};
use super::{AudioInput, Controllable, Recognition, Request, Sentences, ServiceSpec};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

const NAMESPACE: &str = "SpeechTranscriber";

pub struct TranscriberSpec {
    params: RequestParams,
    control_name: String,
}

impl TranscriberSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        Self {
            params: RequestParams::new(DEFAULT_GATEWAY_URL, sdk_name, long_connection),
            control_name: "ControlTranscriber".to_string(),
        }
    }
}

impl ServiceSpec for TranscriberSpec {
    const LABEL: &'static str = "SpeechTranscriber";
    const DIALECT: Dialect = Dialect::Legacy;

    fn params(&self) -> &RequestParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut RequestParams {
        &mut self.params
    }

    fn started_name(&self) -> &'static str {
        "TranscriptionStarted"
    }

    fn start_directive(&self, task_id: &str) -> String {
        self.params
            .legacy_start(NAMESPACE, "StartTranscription", task_id)
    }

    fn stop_directive(&self, task_id: &str) -> String {
        self.params
            .legacy_command(NAMESPACE, "StopTranscription", task_id, Default::default())
    }

    fn control_directive(&self, task_id: &str, message: &str) -> NlsResult<String> {
        self.params
            .legacy_control(NAMESPACE, &self.control_name, task_id, message)
    }
}

impl AudioInput for TranscriberSpec {}
impl Recognition for TranscriberSpec {}
impl Sentences for TranscriberSpec {}
impl Controllable for TranscriberSpec {}

pub type SpeechTranscriberRequest = Request<TranscriberSpec>;

impl Request<TranscriberSpec> {
    pub fn set_format(&self, format: &str) -> NlsResult<()> {
        self.configure(|s| s.params.set_format(format, INPUT_FORMATS))
    }

    pub fn set_sample_rate(&self, rate: u32) -> NlsResult<()> {
        self.configure(|s| s.params.set_sample_rate(rate))
    }

    pub fn set_intermediate_result(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_intermediate_result", enable)
    }

    pub fn set_punctuation_prediction(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_punctuation_prediction", enable)
    }

    pub fn set_inverse_text_normalization(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_inverse_text_normalization", enable)
    }

    pub fn set_semantic_sentence_detection(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_semantic_sentence_detection", enable)
    }

    /// Silence that ends a sentence, 200..=6000 ms.
    pub fn set_max_sentence_silence(&self, ms: u32) -> NlsResult<()> {
        if !(200..=6000).contains(&ms) {
            return Err(NlsError::config(format!(
                "max_sentence_silence {ms} is outside 200..=6000"
            )));
        }
        self.put_param("max_sentence_silence", ms)
    }

    pub fn set_enable_nlp(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_nlp", enable)
    }

    pub fn set_nlp_model(&self, model: &str) -> NlsResult<()> {
        self.put_non_empty("nlp_model", model)
    }

    pub fn set_enable_words(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_words", enable)
    }

    pub fn set_enable_ignore_sentence_timeout(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_ignore_sentence_timeout", enable)
    }

    pub fn set_disfluency(&self, enable: bool) -> NlsResult<()> {
        self.put_param("disfluency", enable)
    }

    /// Noise gate in -1.0..=1.0.
    pub fn set_speech_noise_threshold(&self, value: f32) -> NlsResult<()> {
        if !(-1.0..=1.0).contains(&value) {
            return Err(NlsError::config(format!(
                "speech_noise_threshold {value} is outside -1..=1"
            )));
        }
        self.put_param("speech_noise_threshold", value)
    }

    pub fn set_customization_id(&self, id: &str) -> NlsResult<()> {
        self.put_non_empty("customization_id", id)
    }

    pub fn set_vocabulary_id(&self, id: &str) -> NlsResult<()> {
        self.put_non_empty("vocabulary_id", id)
    }

    /// Header name used by [`Request::control`]; `ControlTranscriber` by default.
    pub fn set_control_header_name(&self, name: &str) -> NlsResult<()> {
        if name.is_empty() {
            return Err(NlsError::config("control header name must not be empty"));
        }
        self.configure(|s| {
            s.control_name = name.to_string();
            Ok(())
        })
    }

    pub fn set_on_sentence_semantics<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&crate::core::event::Event) + Send + Sync + 'static,
    {
        self.set_on_event(crate::core::event::EventKind::SentenceSemantics, callback)
    }
}
