//! Configuration shared by every request type.

use http::{HeaderName, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

use crate::core::directive::{LegacyDirective, merge_object, sdk_context};
use crate::core::node::RequestTimeouts;
use crate::core::protocol::{DecodeMode, Dialect};
use crate::core::transport::ConnectTarget;
use crate::errors::{NlsError, NlsResult};

/// Legacy gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://nls-gateway.cn-shanghai.aliyuncs.com/ws/v1";

/// DashScope inference endpoint.
pub const DEFAULT_DASHSCOPE_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";

const NLS_TOKEN_HEADER: &str = "X-NLS-Token";

/// Audio formats the gateway accepts for recognition input.
pub(crate) const INPUT_FORMATS: &[&str] = &["pcm", "opus", "opu", "wav", "mp3", "aac", "speex"];

#[derive(Debug, Clone)]
pub struct RequestParams {
    pub(crate) url: String,
    pub(crate) appkey: String,
    pub(crate) token: String,
    pub(crate) sdk_name: String,
    pub(crate) payload: Map<String, Value>,
    pub(crate) context: Map<String, Value>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeouts: RequestTimeouts,
    pub(crate) decode_mode: Option<DecodeMode>,
    pub(crate) raw_mode: bool,
    pub(crate) long_connection: bool,
    pub(crate) format: String,
    pub(crate) sample_rate: u32,
    /// Task id of the current (or last) start attempt.
    pub(crate) task_id: String,
}

impl RequestParams {
    pub(crate) fn new(default_url: &str, sdk_name: &str, long_connection: bool) -> Self {
        Self {
            url: default_url.to_string(),
            appkey: String::new(),
            token: String::new(),
            sdk_name: sdk_name.to_string(),
            payload: Map::new(),
            context: Map::new(),
            headers: Vec::new(),
            timeouts: RequestTimeouts::default(),
            decode_mode: None,
            raw_mode: false,
            long_connection,
            format: "pcm".to_string(),
            sample_rate: 16000,
            task_id: String::new(),
        }
    }

    // ===== Setters =====

    pub fn set_url(&mut self, url: &str) -> NlsResult<()> {
        let parsed = Url::parse(url).map_err(|e| NlsError::config(format!("url {url}: {e}")))?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(NlsError::config(format!(
                    "url scheme must be ws or wss, got {other}"
                )));
            }
        }
        if parsed.host_str().is_none() {
            return Err(NlsError::config(format!("url {url} has no host")));
        }
        self.url = url.to_string();
        Ok(())
    }

    pub fn set_appkey(&mut self, appkey: &str) -> NlsResult<()> {
        non_empty("appkey", appkey)?;
        self.appkey = appkey.to_string();
        Ok(())
    }

    pub fn set_token(&mut self, token: &str) -> NlsResult<()> {
        non_empty("token", token)?;
        self.token = token.to_string();
        Ok(())
    }

    /// Merge a JSON object into the start directive's payload.
    pub fn set_payload_param(&mut self, json: &str) -> NlsResult<()> {
        merge_object(&mut self.payload, json)
            .map_err(|e| NlsError::config(format!("payload param is not a JSON object: {e}")))
    }

    /// Merge a JSON object into the start directive's context.
    pub fn set_context_param(&mut self, json: &str) -> NlsResult<()> {
        merge_object(&mut self.context, json)
            .map_err(|e| NlsError::config(format!("context param is not a JSON object: {e}")))
    }

    pub fn append_http_header(&mut self, key: &str, value: &str) -> NlsResult<()> {
        HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| NlsError::config(format!("header name {key}: {e}")))?;
        HeaderValue::from_str(value)
            .map_err(|e| NlsError::config(format!("header value for {key}: {e}")))?;
        self.headers.push((key.to_string(), value.to_string()));
        Ok(())
    }

    pub fn set_connect_timeout(&mut self, ms: u64) -> NlsResult<()> {
        self.timeouts.connect_ms = Some(positive("connect timeout", ms)?);
        Ok(())
    }

    pub fn set_recv_timeout(&mut self, ms: u64) -> NlsResult<()> {
        self.timeouts.recv_ms = Some(positive("recv timeout", ms)?);
        Ok(())
    }

    pub fn set_send_timeout(&mut self, ms: u64) -> NlsResult<()> {
        self.timeouts.send_ms = Some(positive("send timeout", ms)?);
        Ok(())
    }

    /// Per-request sync-call budget; `0` forces async mode for this request.
    pub fn set_sync_call_timeout(&mut self, ms: u64) {
        self.timeouts.sync_call_ms = Some(ms);
    }

    pub fn set_decode_mode(&mut self, mode: DecodeMode) {
        self.decode_mode = Some(mode);
    }

    pub(crate) fn set_format(&mut self, format: &str, allowed: &[&str]) -> NlsResult<()> {
        let format = format.to_ascii_lowercase();
        if !allowed.contains(&format.as_str()) {
            return Err(NlsError::config(format!(
                "format {format} is not one of {}",
                allowed.join(", ")
            )));
        }
        self.format = format;
        Ok(())
    }

    pub(crate) fn set_sample_rate(&mut self, rate: u32) -> NlsResult<()> {
        match rate {
            8000 | 16000 | 22050 | 24000 | 44100 | 48000 => {
                self.sample_rate = rate;
                Ok(())
            }
            other => Err(NlsError::config(format!("unsupported sample rate {other}"))),
        }
    }

    pub(crate) fn put(&mut self, key: &str, value: impl Into<Value>) {
        self.payload.insert(key.to_string(), value.into());
    }

    // ===== Derived values =====

    /// Raw mode decodes leniently unless a mode was chosen explicitly.
    pub(crate) fn effective_decode_mode(&self) -> DecodeMode {
        match self.decode_mode {
            Some(mode) => mode,
            None if self.raw_mode => DecodeMode::Lenient,
            None => DecodeMode::Strict,
        }
    }

    pub(crate) fn validate(&self, dialect: Dialect) -> NlsResult<()> {
        if self.token.is_empty() {
            return Err(NlsError::config("token is not set"));
        }
        if dialect == Dialect::Legacy && self.appkey.is_empty() {
            return Err(NlsError::config("appkey is not set"));
        }
        Ok(())
    }

    /// `context` block with SDK identification and caller extras.
    pub(crate) fn context(&self) -> Map<String, Value> {
        sdk_context(&self.sdk_name, &self.context)
    }

    /// Start payload: audio format and rate, then caller parameters on top.
    pub(crate) fn start_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("format".to_string(), Value::from(self.format.clone()));
        payload.insert("sample_rate".to_string(), Value::from(self.sample_rate));
        for (key, value) in &self.payload {
            payload.insert(key.clone(), value.clone());
        }
        payload
    }

    pub(crate) fn legacy_start(&self, namespace: &str, name: &str, task_id: &str) -> String {
        LegacyDirective::new(namespace, name, &self.appkey, task_id)
            .with_payload(self.start_payload())
            .with_context(self.context())
            .to_json()
    }

    /// Header-only (or small payload) follow-up directive of a legacy task.
    pub(crate) fn legacy_command(
        &self,
        namespace: &str,
        name: &str,
        task_id: &str,
        payload: Map<String, Value>,
    ) -> String {
        LegacyDirective::new(namespace, name, &self.appkey, task_id)
            .with_payload(payload)
            .to_json()
    }

    /// Control directive from a caller message of the form
    /// `{"payload": {...}, "context": {...}}` (both optional).
    pub(crate) fn legacy_control(
        &self,
        namespace: &str,
        name: &str,
        task_id: &str,
        message: &str,
    ) -> NlsResult<String> {
        let parsed: Map<String, Value> = serde_json::from_str(message)
            .map_err(|e| NlsError::config(format!("control message is not a JSON object: {e}")))?;
        let section = |key: &str| match parsed.get(key) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(Value::Null) | None => Ok(Map::new()),
            Some(_) => Err(NlsError::config(format!("control message {key} must be an object"))),
        };
        Ok(LegacyDirective::new(namespace, name, &self.appkey, task_id)
            .with_payload(section("payload")?)
            .with_context(section("context")?)
            .to_json())
    }

    pub(crate) fn target(&self, dialect: Dialect) -> NlsResult<ConnectTarget> {
        let url = Url::parse(&self.url).map_err(|e| NlsError::config(format!("url: {e}")))?;
        let mut target = ConnectTarget::new(url);
        match dialect {
            Dialect::Legacy => target
                .headers
                .push((NLS_TOKEN_HEADER.to_string(), self.token.clone())),
            Dialect::TaskOriented | Dialect::StreamingTts => target
                .headers
                .push(("Authorization".to_string(), format!("bearer {}", self.token))),
        }
        target.headers.extend(self.headers.iter().cloned());
        Ok(target)
    }
}

fn non_empty(what: &str, value: &str) -> NlsResult<()> {
    if value.trim().is_empty() {
        return Err(NlsError::config(format!("{what} must not be empty")));
    }
    Ok(())
}

fn positive(what: &str, ms: u64) -> NlsResult<u64> {
    if ms == 0 {
        return Err(NlsError::config(format!("{what} must be positive")));
    }
    Ok(ms)
}
