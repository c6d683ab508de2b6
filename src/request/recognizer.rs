//! One-sentence recognition (`SpeechRecognizer` namespace).

use super::params::{DEFAULT_GATEWAY_URL, INPUT_FORMATS, RequestParams};
use super::{AudioInput, Recognition, Request, ServiceSpec};
use crate::core::protocol::Dialect;
use crate::errors::NlsResult;

const NAMESPACE: &str = "SpeechRecognizer";

pub struct RecognizerSpec {
    params: RequestParams,
}

impl RecognizerSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        Self {
            params: RequestParams::new(DEFAULT_GATEWAY_URL, sdk_name, long_connection),
        }
    }
}

impl ServiceSpec for RecognizerSpec {
    const LABEL: &'static str = "SpeechRecognizer";
    const DIALECT: Dialect = Dialect::Legacy;

    fn params(&self) -> &RequestParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut RequestParams {
        &mut self.params
    }

    fn started_name(&self) -> &'static str {
        "RecognitionStarted"
    }

    fn start_directive(&self, task_id: &str) -> String {
        self.params.legacy_start(NAMESPACE, "StartRecognition", task_id)
    }

    fn stop_directive(&self, task_id: &str) -> String {
        self.params
            .legacy_command(NAMESPACE, "StopRecognition", task_id, Default::default())
    }
}

impl AudioInput for RecognizerSpec {}
impl Recognition for RecognizerSpec {}

pub type SpeechRecognizerRequest = Request<RecognizerSpec>;

impl Request<RecognizerSpec> {
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

    pub fn set_enable_voice_detection(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_voice_detection", enable)
    }

    pub fn set_max_start_silence(&self, ms: u32) -> NlsResult<()> {
        self.put_param("max_start_silence", ms)
    }

    pub fn set_max_end_silence(&self, ms: u32) -> NlsResult<()> {
        self.put_param("max_end_silence", ms)
    }

    pub fn set_customization_id(&self, id: &str) -> NlsResult<()> {
        self.put_non_empty("customization_id", id)
    }

    pub fn set_vocabulary_id(&self, id: &str) -> NlsResult<()> {
        self.put_non_empty("vocabulary_id", id)
    }

    pub fn set_audio_address(&self, address: &str) -> NlsResult<()> {
        self.put_non_empty("audio_address", address)
    }
}
