//! DashScope CosyVoice streaming synthesis.
//!
//! `run-task` opens the task, each `continue-task` carries a chunk of text
//! and `finish-task` ends the input. Audio arrives as binary frames.

use serde_json::{Map, Value};

use super::params::{DEFAULT_DASHSCOPE_URL, RequestParams};
use super::{Request, ServiceSpec, Synthesis, TextInput};
use crate::core::directive::{TaskAction, TaskDirective, TaskPayload};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

const COSYVOICE_FORMATS: &[&str] = &["pcm", "wav", "mp3", "opus"];

/// Longest text one `continue-task` may carry, in characters.
pub const MAX_CHUNK_CHARS: usize = 2000;

pub struct CosyVoiceSpec {
    params: RequestParams,
    model: String,
    /// Sent as one `continue-task` plus `finish-task` right after start.
    single_round_text: Option<String>,
}

impl CosyVoiceSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        let mut params = RequestParams::new(DEFAULT_DASHSCOPE_URL, sdk_name, long_connection);
        params.format = "mp3".to_string();
        params.sample_rate = 22050;
        params.put("text_type", "PlainText");
        params.put("volume", 50);
        params.put("rate", 1.0);
        params.put("pitch", 1.0);
        params.put("seed", 0);
        Self {
            params,
            model: String::new(),
            single_round_text: None,
        }
    }
}

fn check_chunk(text: &str) -> NlsResult<()> {
    let chars = text.chars().count();
    if chars == 0 || chars > MAX_CHUNK_CHARS {
        return Err(NlsError::config(format!(
            "text must be 1..={MAX_CHUNK_CHARS} characters, got {chars}"
        )));
    }
    Ok(())
}

impl ServiceSpec for CosyVoiceSpec {
    const LABEL: &'static str = "DashCosyVoiceSynthesizer";
    const DIALECT: Dialect = Dialect::StreamingTts;

    fn params(&self) -> &RequestParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut RequestParams {
        &mut self.params
    }

    fn started_name(&self) -> &'static str {
        "task-started"
    }

    fn validate(&self) -> NlsResult<()> {
        self.params.validate(Self::DIALECT)?;
        if self.model.is_empty() {
            return Err(NlsError::config("model is not set"));
        }
        match self.params.payload.get("voice") {
            Some(Value::String(voice)) if !voice.is_empty() => Ok(()),
            _ => Err(NlsError::config("voice is not set")),
        }
    }

    fn start_directive(&self, task_id: &str) -> String {
        TaskDirective::new(
            TaskAction::RunTask,
            task_id,
            TaskPayload {
                task_group: Some("audio".to_string()),
                task: Some("tts".to_string()),
                function: Some("SpeechSynthesizer".to_string()),
                model: Some(self.model.clone()),
                parameters: Some(self.params.start_payload()),
                resources: None,
                input: Map::new(),
            },
        )
        .to_json()
    }

    fn stop_directive(&self, task_id: &str) -> String {
        TaskDirective::finish(task_id).to_json()
    }

    fn text_directive(&self, task_id: &str, text: &str) -> NlsResult<String> {
        check_chunk(text)?;
        Ok(TaskDirective::continue_with_text(task_id, text).to_json())
    }

    fn follow_up(&self, task_id: &str) -> Vec<String> {
        match &self.single_round_text {
            Some(text) => vec![
                TaskDirective::continue_with_text(task_id, text).to_json(),
                TaskDirective::finish(task_id).to_json(),
            ],
            None => Vec::new(),
        }
    }

    fn follow_up_ends_input(&self) -> bool {
        self.single_round_text.is_some()
    }
}

impl Synthesis for CosyVoiceSpec {}
impl TextInput for CosyVoiceSpec {}

pub type DashCosyVoiceSynthesizerRequest = Request<CosyVoiceSpec>;

impl Request<CosyVoiceSpec> {
    pub fn set_model(&self, model: &str) -> NlsResult<()> {
        if model.is_empty() {
            return Err(NlsError::config("model must not be empty"));
        }
        self.configure(|s| {
            s.model = model.to_string();
            Ok(())
        })
    }

    pub fn set_voice(&self, voice: &str) -> NlsResult<()> {
        self.put_non_empty("voice", voice)
    }

    /// `mp3` by default; `opus` is accepted by every model but cosyvoice-v1.
    pub fn set_format(&self, format: &str) -> NlsResult<()> {
        self.configure(|s| s.params.set_format(format, COSYVOICE_FORMATS))
    }

    pub fn set_sample_rate(&self, rate: u32) -> NlsResult<()> {
        self.configure(|s| s.params.set_sample_rate(rate))
    }

    pub fn set_volume(&self, volume: u32) -> NlsResult<()> {
        super::synthesizer::check_volume(volume)?;
        self.put_param("volume", volume)
    }

    /// Multiplier of the voice's natural pace, 0.5..=2.0.
    pub fn set_speech_rate(&self, rate: f32) -> NlsResult<()> {
        check_factor("speech rate", rate)?;
        self.put_param("rate", rate)
    }

    pub fn set_pitch_rate(&self, pitch: f32) -> NlsResult<()> {
        check_factor("pitch rate", pitch)?;
        self.put_param("pitch", pitch)
    }

    /// With SSML on, the text may only be sent once.
    pub fn set_ssml_enabled(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_ssml", enable)
    }

    /// Opus bit rate in kbps, 6..=510.
    pub fn set_bit_rate(&self, kbps: u32) -> NlsResult<()> {
        if !(6..=510).contains(&kbps) {
            return Err(NlsError::config(format!("bit rate {kbps} is outside 6..=510")));
        }
        self.put_param("bit_rate", kbps)
    }

    pub fn set_word_timestamp_enabled(&self, enable: bool) -> NlsResult<()> {
        self.put_param("word_timestamp_enabled", enable)
    }

    pub fn set_seed(&self, seed: u32) -> NlsResult<()> {
        if seed > 65535 {
            return Err(NlsError::config(format!("seed {seed} is outside 0..=65535")));
        }
        self.put_param("seed", seed)
    }

    pub fn set_language_hints(&self, languages: &[&str]) -> NlsResult<()> {
        let hints: Vec<Value> = languages.iter().map(|l| Value::from(*l)).collect();
        self.put_param("language_hints", hints)
    }

    pub fn set_instruction(&self, instruction: &str) -> NlsResult<()> {
        self.put_non_empty("instruction", instruction)
    }

    /// Text for a single-round synthesis; start then sends it and ends the input.
    pub fn set_single_round_text(&self, text: &str) -> NlsResult<()> {
        check_chunk(text)?;
        self.configure(|s| {
            s.single_round_text = Some(text.to_string());
            Ok(())
        })
    }

    pub fn clear_single_round_text(&self) -> NlsResult<()> {
        self.configure(|s| {
            s.single_round_text = None;
            Ok(())
        })
    }
}

fn check_factor(what: &str, value: f32) -> NlsResult<()> {
    if !(0.5..=2.0).contains(&value) {
        return Err(NlsError::config(format!("{what} {value} is outside 0.5..=2.0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CosyVoiceSpec {
        let mut spec = CosyVoiceSpec::new("nls-sdk", false);
        spec.params.set_token("sk-1").unwrap();
        spec.model = "cosyvoice-v2".to_string();
        spec.params.put("voice", "longxiaochun");
        spec
    }

    #[test]
    fn test_run_task_defaults() {
        let spec = spec();
        assert!(spec.validate().is_ok());
        let value: Value = serde_json::from_str(&spec.start_directive("t1")).unwrap();
        assert_eq!(value["payload"]["task"], "tts");
        assert_eq!(value["payload"]["function"], "SpeechSynthesizer");
        assert_eq!(value["payload"]["model"], "cosyvoice-v2");
        let parameters = &value["payload"]["parameters"];
        assert_eq!(parameters["text_type"], "PlainText");
        assert_eq!(parameters["format"], "mp3");
        assert_eq!(parameters["sample_rate"], 22050);
        assert_eq!(parameters["volume"], 50);
        assert_eq!(parameters["voice"], "longxiaochun");
    }

    #[test]
    fn test_voice_and_model_required() {
        let mut spec = spec();
        spec.params.payload.remove("voice");
        assert!(spec.validate().is_err());
        let mut spec = self::spec();
        spec.model.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_single_round_follow_up() {
        let mut spec = spec();
        assert!(spec.follow_up("t1").is_empty());
        assert!(!spec.follow_up_ends_input());
        spec.single_round_text = Some("你好".to_string());
        assert!(spec.follow_up_ends_input());
        let frames = spec.follow_up("t1");
        assert_eq!(frames.len(), 2);
        let first: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["header"]["action"], "continue-task");
        assert_eq!(first["payload"]["input"]["text"], "你好");
        let second: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(second["header"]["action"], "finish-task");
    }

    #[test]
    fn test_chunk_limits() {
        let spec = spec();
        assert!(spec.text_directive("t1", "").is_err());
        assert!(spec.text_directive("t1", &"字".repeat(MAX_CHUNK_CHARS)).is_ok());
        assert!(spec.text_directive("t1", &"字".repeat(MAX_CHUNK_CHARS + 1)).is_err());
        assert!(check_factor("rate", 0.4).is_err());
        assert!(check_factor("rate", 2.0).is_ok());
    }
}
