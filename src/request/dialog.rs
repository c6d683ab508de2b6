//! Voice assistant dialog (`DialogAssistant` / `DialogAssistant.v2`).
//!
//! A dialog either starts from audio (`StartRecognition`) or from a text
//! query (`ExecuteDialog`). Results arrive as recognition events followed
//! by `DialogResultGenerated`; wake-word checks report
//! `WakeWordVerificationCompleted`.

use serde_json::{Map, Value};

use super::params::{DEFAULT_GATEWAY_URL, INPUT_FORMATS, RequestParams};
use super::{AudioInput, Recognition, Request, ServiceSpec};
use crate::core::directive::LegacyDirective;
use crate::core::event::{Event, EventKind};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogVersion {
    #[default]
    V1,
    /// `DialogAssistant.v2` with multi-group results.
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialogInput {
    Audio,
    Text,
}

pub struct DialogSpec {
    params: RequestParams,
    version: DialogVersion,
    input: DialogInput,
}

impl DialogSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool, version: DialogVersion) -> Self {
        Self {
            params: RequestParams::new(DEFAULT_GATEWAY_URL, sdk_name, long_connection),
            version,
            input: DialogInput::Audio,
        }
    }

    fn namespace(&self) -> &'static str {
        match self.version {
            DialogVersion::V1 => "DialogAssistant",
            DialogVersion::V2 => "DialogAssistant.v2",
        }
    }

    fn directive(&self, name: &str, task_id: &str) -> LegacyDirective {
        let directive = LegacyDirective::new(self.namespace(), name, &self.params.appkey, task_id);
        match self.version {
            DialogVersion::V1 => directive,
            DialogVersion::V2 => directive.with_header_field("enable_multi_group", Value::Bool(true)),
        }
    }
}

impl ServiceSpec for DialogSpec {
    const LABEL: &'static str = "DialogAssistant";
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

    fn validate(&self) -> NlsResult<()> {
        self.params.validate(Self::DIALECT)?;
        if self.input == DialogInput::Text && !self.params.payload.contains_key("query") {
            return Err(NlsError::config("a text dialog needs a query"));
        }
        Ok(())
    }

    fn start_directive(&self, task_id: &str) -> String {
        let name = match self.input {
            DialogInput::Audio => "StartRecognition",
            DialogInput::Text => "ExecuteDialog",
        };
        let mut payload = self.params.start_payload();
        payload
            .entry("session_id")
            .or_insert_with(|| Value::from(task_id));
        self.directive(name, task_id)
            .with_payload(payload)
            .with_context(self.params.context())
            .to_json()
    }

    fn stop_directive(&self, task_id: &str) -> String {
        self.directive("StopRecognition", task_id).to_json()
    }

    /// `RecognitionCompleted` only ends the audio part of a dialog.
    fn terminal_kind(&self) -> EventKind {
        EventKind::DialogResultGenerated
    }

    fn control_directive(&self, task_id: &str, _message: &str) -> NlsResult<String> {
        Ok(self
            .directive("StopWakeWordVerification", task_id)
            .with_payload(Map::new())
            .to_json())
    }
}

impl AudioInput for DialogSpec {}
impl Recognition for DialogSpec {}

pub type DialogAssistantRequest = Request<DialogSpec>;

impl Request<DialogSpec> {
    /// Start a dialog from the configured text query instead of audio.
    pub fn execute_dialog(&self) -> NlsResult<()> {
        self.configure(|s| {
            s.input = DialogInput::Text;
            Ok(())
        })?;
        let started = self.start();
        // the next start defaults to audio again
        self.spec.lock().input = DialogInput::Audio;
        started
    }

    /// Ask the server to stop verifying the wake word.
    pub fn stop_wake_word_verification(&self) -> NlsResult<()> {
        self.node.send_control("{}")
    }

    pub fn set_format(&self, format: &str) -> NlsResult<()> {
        self.configure(|s| s.params.set_format(format, INPUT_FORMATS))
    }

    pub fn set_sample_rate(&self, rate: u32) -> NlsResult<()> {
        self.configure(|s| s.params.set_sample_rate(rate))
    }

    pub fn set_session_id(&self, session_id: &str) -> NlsResult<()> {
        self.put_non_empty("session_id", session_id)
    }

    pub fn set_query(&self, query: &str) -> NlsResult<()> {
        self.put_non_empty("query", query)
    }

    /// `params` must be a JSON object.
    pub fn set_query_params(&self, params: &str) -> NlsResult<()> {
        let value: Value = serde_json::from_str(params)
            .map_err(|e| NlsError::config(format!("query params: {e}")))?;
        if !value.is_object() {
            return Err(NlsError::config("query params must be a JSON object"));
        }
        self.put_param("query_params", value)
    }

    pub fn set_query_context(&self, context: &str) -> NlsResult<()> {
        self.put_non_empty("query_context", context)
    }

    pub fn set_wake_word(&self, wake_word: &str) -> NlsResult<()> {
        self.put_non_empty("wake_word", wake_word)
    }

    pub fn set_wake_word_model(&self, model: &str) -> NlsResult<()> {
        self.put_non_empty("wake_word_model", model)
    }

    pub fn set_wake_word_verification(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_wake_word_verification", enable)
    }

    pub fn set_on_wake_word_verification_completed<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::WakeWordVerificationCompleted, callback)
    }

    pub fn set_on_dialog_result_generated<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::DialogResultGenerated, callback)
    }
}
