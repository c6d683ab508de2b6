//! Streaming-input text-to-speech (`FlowingSpeechSynthesizer` namespace).
//!
//! Text arrives in chunks after start via `RunSynthesis`; `FlushSynthesis`
//! forces synthesis of what is buffered, `StopSynthesis` ends the input.

use serde_json::{Map, Value};

use super::params::{DEFAULT_GATEWAY_URL, RequestParams};
use super::synthesizer::{OUTPUT_FORMATS, check_rate, check_volume};
use super::{Request, Sentences, ServiceSpec, Synthesis, TextInput};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

const NAMESPACE: &str = "FlowingSpeechSynthesizer";

pub struct FlowingSynthesizerSpec {
    params: RequestParams,
}

impl FlowingSynthesizerSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        Self {
            params: RequestParams::new(DEFAULT_GATEWAY_URL, sdk_name, long_connection),
        }
    }
}

impl ServiceSpec for FlowingSynthesizerSpec {
    const LABEL: &'static str = "FlowingSynthesizer";
    const DIALECT: Dialect = Dialect::Legacy;

    fn params(&self) -> &RequestParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut RequestParams {
        &mut self.params
    }

    fn started_name(&self) -> &'static str {
        "SynthesisStarted"
    }

    fn start_directive(&self, task_id: &str) -> String {
        self.params.legacy_start(NAMESPACE, "StartSynthesis", task_id)
    }

    fn stop_directive(&self, task_id: &str) -> String {
        self.params
            .legacy_command(NAMESPACE, "StopSynthesis", task_id, Map::new())
    }

    fn text_directive(&self, task_id: &str, text: &str) -> NlsResult<String> {
        if text.is_empty() {
            return Err(NlsError::config("text must not be empty"));
        }
        let mut payload = Map::new();
        payload.insert("text".to_string(), Value::from(text));
        Ok(self
            .params
            .legacy_command(NAMESPACE, "RunSynthesis", task_id, payload))
    }

    fn flush_directive(&self, task_id: &str) -> NlsResult<String> {
        Ok(self
            .params
            .legacy_command(NAMESPACE, "FlushSynthesis", task_id, Map::new()))
    }
}

impl Synthesis for FlowingSynthesizerSpec {}
impl Sentences for FlowingSynthesizerSpec {}
impl TextInput for FlowingSynthesizerSpec {}

pub type FlowingSynthesizerRequest = Request<FlowingSynthesizerSpec>;

impl Request<FlowingSynthesizerSpec> {
    pub fn set_voice(&self, voice: &str) -> NlsResult<()> {
        self.put_non_empty("voice", voice)
    }

    pub fn set_format(&self, format: &str) -> NlsResult<()> {
        self.configure(|s| s.params.set_format(format, OUTPUT_FORMATS))
    }

    pub fn set_sample_rate(&self, rate: u32) -> NlsResult<()> {
        self.configure(|s| s.params.set_sample_rate(rate))
    }

    pub fn set_volume(&self, volume: u32) -> NlsResult<()> {
        check_volume(volume)?;
        self.put_param("volume", volume)
    }

    pub fn set_speech_rate(&self, rate: i32) -> NlsResult<()> {
        check_rate("speech_rate", rate)?;
        self.put_param("speech_rate", rate)
    }

    pub fn set_pitch_rate(&self, rate: i32) -> NlsResult<()> {
        check_rate("pitch_rate", rate)?;
        self.put_param("pitch_rate", rate)
    }

    pub fn set_enable_subtitle(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_subtitle", enable)
    }
}
