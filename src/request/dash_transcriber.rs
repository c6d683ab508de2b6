//! DashScope real-time transcription (Paraformer and FunASR models).
//!
//! Uses the task-oriented dialect: `run-task` opens the task, audio goes as
//! binary frames, `finish-task` ends the input.

use serde_json::{Map, Value};

use super::params::{DEFAULT_DASHSCOPE_URL, INPUT_FORMATS, RequestParams};
use super::{AudioInput, Recognition, Request, Sentences, ServiceSpec};
use crate::core::directive::{TaskAction, TaskDirective, TaskPayload};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

pub const DEFAULT_PARAFORMER_MODEL: &str = "paraformer-realtime-v2";

pub struct ParaformerSpec {
    params: RequestParams,
    model: String,
    resources: Vec<Value>,
}

impl ParaformerSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        let mut params = RequestParams::new(DEFAULT_DASHSCOPE_URL, sdk_name, long_connection);
        params.put("punctuation_prediction_enabled", true);
        params.put("inverse_text_normalization_enabled", true);
        Self {
            params,
            model: DEFAULT_PARAFORMER_MODEL.to_string(),
            resources: Vec::new(),
        }
    }

    fn run_task(&self, task_id: &str) -> TaskDirective {
        TaskDirective::new(
            TaskAction::RunTask,
            task_id,
            TaskPayload {
                task_group: Some("audio".to_string()),
                task: Some("asr".to_string()),
                function: Some("recognition".to_string()),
                model: Some(self.model.clone()),
                parameters: Some(self.params.start_payload()),
                resources: (!self.resources.is_empty()).then(|| self.resources.clone()),
                input: Map::new(),
            },
        )
    }
}

impl ServiceSpec for ParaformerSpec {
    const LABEL: &'static str = "DashParaformerTranscriber";
    const DIALECT: Dialect = Dialect::TaskOriented;

    fn params(&self) -> &RequestParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut RequestParams {
        &mut self.params
    }

    fn started_name(&self) -> &'static str {
        "task-started"
    }

    fn start_directive(&self, task_id: &str) -> String {
        self.run_task(task_id).to_json()
    }

    fn stop_directive(&self, task_id: &str) -> String {
        TaskDirective::finish(task_id).to_json()
    }
}

impl AudioInput for ParaformerSpec {}
impl Recognition for ParaformerSpec {}
impl Sentences for ParaformerSpec {}

pub type DashParaformerTranscriberRequest = Request<ParaformerSpec>;

impl Request<ParaformerSpec> {
    /// `paraformer-realtime-v2` by default; FunASR models work the same way.
    pub fn set_model(&self, model: &str) -> NlsResult<()> {
        if model.is_empty() {
            return Err(NlsError::config("model must not be empty"));
        }
        self.configure(|s| {
            s.model = model.to_string();
            Ok(())
        })
    }

    pub fn set_format(&self, format: &str) -> NlsResult<()> {
        self.configure(|s| s.params.set_format(format, INPUT_FORMATS))
    }

    pub fn set_sample_rate(&self, rate: u32) -> NlsResult<()> {
        self.configure(|s| s.params.set_sample_rate(rate))
    }

    pub fn set_vocabulary_id(&self, id: &str) -> NlsResult<()> {
        self.put_non_empty("vocabulary_id", id)
    }

    pub fn set_disfluency_removal(&self, enable: bool) -> NlsResult<()> {
        self.put_param("disfluency_removal_enabled", enable)
    }

    pub fn set_language_hints(&self, languages: &[&str]) -> NlsResult<()> {
        let hints: Vec<Value> = languages.iter().map(|l| Value::from(*l)).collect();
        self.put_param("language_hints", hints)
    }

    pub fn set_semantic_punctuation(&self, enable: bool) -> NlsResult<()> {
        self.put_param("semantic_punctuation_enabled", enable)
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

    pub fn set_multi_threshold_mode(&self, enable: bool) -> NlsResult<()> {
        self.put_param("multi_threshold_mode_enabled", enable)
    }

    pub fn set_punctuation_prediction(&self, enable: bool) -> NlsResult<()> {
        self.put_param("punctuation_prediction_enabled", enable)
    }

    pub fn set_inverse_text_normalization(&self, enable: bool) -> NlsResult<()> {
        self.put_param("inverse_text_normalization_enabled", enable)
    }

    /// Keep the task alive through long silences.
    pub fn set_heartbeat(&self, enable: bool) -> NlsResult<()> {
        self.put_param("heartbeat", enable)
    }

    /// `resources` must be a JSON array, e.g. hot-word lists.
    pub fn set_resources(&self, resources: &str) -> NlsResult<()> {
        let value: Value = serde_json::from_str(resources)
            .map_err(|e| NlsError::config(format!("resources: {e}")))?;
        let Value::Array(items) = value else {
            return Err(NlsError::config("resources must be a JSON array"));
        };
        self.configure(|s| {
            s.resources = items;
            Ok(())
        })
    }
}
