//! One-shot text-to-speech (`SpeechSynthesizer` namespace).
//!
//! The whole text goes in the start directive; the server streams audio
//! frames and ends with `SynthesisCompleted`. There is no stop directive.

use super::params::{DEFAULT_GATEWAY_URL, RequestParams};
use super::{Request, ServiceSpec, Synthesis};
use crate::core::protocol::Dialect;
use crate::errors::{NlsError, NlsResult};

const NAMESPACE: &str = "SpeechSynthesizer";

/// Output formats of the synthesis services.
pub(crate) const OUTPUT_FORMATS: &[&str] = &["pcm", "wav", "mp3"];

/// Longest text one request may carry, in characters.
pub const MAX_TEXT_CHARS: usize = 300;

pub struct SynthesizerSpec {
    params: RequestParams,
}

impl SynthesizerSpec {
    pub(crate) fn new(sdk_name: &str, long_connection: bool) -> Self {
        Self {
            params: RequestParams::new(DEFAULT_GATEWAY_URL, sdk_name, long_connection),
        }
    }
}

impl ServiceSpec for SynthesizerSpec {
    const LABEL: &'static str = "SpeechSynthesizer";
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

    fn validate(&self) -> NlsResult<()> {
        self.params.validate(Self::DIALECT)?;
        match self.params.payload.get("text") {
            Some(serde_json::Value::String(text)) if !text.is_empty() => Ok(()),
            _ => Err(NlsError::config("text is not set")),
        }
    }

    fn start_directive(&self, task_id: &str) -> String {
        self.params.legacy_start(NAMESPACE, "StartSynthesis", task_id)
    }

    fn stop_directive(&self, _task_id: &str) -> String {
        String::new()
    }
}

impl Synthesis for SynthesizerSpec {}

pub type SpeechSynthesizerRequest = Request<SynthesizerSpec>;

pub(crate) fn check_rate(what: &str, value: i32) -> NlsResult<()> {
    if !(-500..=500).contains(&value) {
        return Err(NlsError::config(format!("{what} {value} is outside -500..=500")));
    }
    Ok(())
}

pub(crate) fn check_volume(value: u32) -> NlsResult<()> {
    if value > 100 {
        return Err(NlsError::config(format!("volume {value} is outside 0..=100")));
    }
    Ok(())
}

impl Request<SynthesizerSpec> {
    pub fn set_text(&self, text: &str) -> NlsResult<()> {
        let chars = text.chars().count();
        if chars == 0 || chars > MAX_TEXT_CHARS {
            return Err(NlsError::config(format!(
                "text must be 1..={MAX_TEXT_CHARS} characters, got {chars}"
            )));
        }
        self.put_param("text", text)
    }

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

    /// 0 = statistical parametric, 1 = waveform concatenation.
    pub fn set_method(&self, method: u32) -> NlsResult<()> {
        if method > 1 {
            return Err(NlsError::config(format!("method {method} is not 0 or 1")));
        }
        self.put_param("method", method)
    }

    pub fn set_enable_subtitle(&self, enable: bool) -> NlsResult<()> {
        self.put_param("enable_subtitle", enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_required() {
        let mut spec = SynthesizerSpec::new("nls-sdk", false);
        spec.params.set_appkey("key").unwrap();
        spec.params.set_token("tok").unwrap();
        assert!(spec.validate().is_err());
        spec.params.put("text", "hello");
        assert!(spec.validate().is_ok());
        assert!(spec.stop_directive("t").is_empty());
    }

    #[test]
    fn test_range_checks() {
        assert!(check_rate("speech_rate", -500).is_ok());
        assert!(check_rate("speech_rate", 501).is_err());
        assert!(check_volume(100).is_ok());
        assert!(check_volume(101).is_err());
    }
}
