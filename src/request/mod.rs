//! Caller-facing request handles.
//!
//! [`Request<S>`] is one handle type parameterised by its service
//! description `S`. Operations every service shares live on
//! `impl<S: ServiceSpec> Request<S>`; capability traits such as
//! [`AudioInput`] or [`Synthesis`] unlock the callbacks and send methods a
//! service actually supports, so `send_audio` on a synthesizer does not
//! compile. Handles are cheap clones of one underlying request.

pub mod cosyvoice;
pub mod dash_transcriber;
pub mod dialog;
pub mod flowing_synthesizer;
pub mod params;
pub mod recognizer;
pub mod synthesizer;
pub mod transcriber;

pub use cosyvoice::{CosyVoiceSpec, DashCosyVoiceSynthesizerRequest};
pub use dash_transcriber::{DashParaformerTranscriberRequest, ParaformerSpec};
pub use dialog::{DialogAssistantRequest, DialogSpec};
pub use flowing_synthesizer::{FlowingSynthesizerRequest, FlowingSynthesizerSpec};
pub use params::RequestParams;
pub use recognizer::{RecognizerSpec, SpeechRecognizerRequest};
pub use synthesizer::{SpeechSynthesizerRequest, SynthesizerSpec};
pub use transcriber::{SpeechTranscriberRequest, TranscriberSpec};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::client::ClientContext;
use crate::core::directive::new_task_id;
use crate::core::encoder::EncoderType;
use crate::core::event::{Event, EventKind};
use crate::core::node::{
    CallbackMode, ConnectionNode, DirectiveSource, EventCallback, ExitStatus, Handshake,
    NodeState, RequestTimeouts,
};
use crate::core::protocol::{DecodeMode, Dialect};
use crate::core::registry::{OwnerId, RequestId};
use crate::errors::{NlsError, NlsResult};

// =============================================================================
// Service description
// =============================================================================

/// Static description of one service: dialect, directive shapes and the
/// parameters they are built from.
pub trait ServiceSpec: Send + 'static {
    const LABEL: &'static str;
    const DIALECT: Dialect;

    fn params(&self) -> &RequestParams;

    fn params_mut(&mut self) -> &mut RequestParams;

    /// Wire name of the started event, used when one is synthesised.
    fn started_name(&self) -> &'static str;

    fn validate(&self) -> NlsResult<()> {
        self.params().validate(Self::DIALECT)
    }

    fn start_directive(&self, task_id: &str) -> String;

    /// Empty when the service has nothing to send on stop.
    fn stop_directive(&self, task_id: &str) -> String;

    fn text_directive(&self, _task_id: &str, _text: &str) -> NlsResult<String> {
        Err(NlsError::config(format!("{} does not accept text", Self::LABEL)))
    }

    fn control_directive(&self, _task_id: &str, _message: &str) -> NlsResult<String> {
        Err(NlsError::config(format!(
            "{} does not accept control messages",
            Self::LABEL
        )))
    }

    fn flush_directive(&self, _task_id: &str) -> NlsResult<String> {
        Err(NlsError::config(format!("{} does not support flush", Self::LABEL)))
    }

    /// Frames sent automatically once started.
    fn follow_up(&self, _task_id: &str) -> Vec<String> {
        Vec::new()
    }

    /// `follow_up` closes the input itself, so nothing may be sent after it.
    fn follow_up_ends_input(&self) -> bool {
        false
    }

    /// Event that ends a successful task. `TaskFailed` always ends it.
    fn terminal_kind(&self) -> EventKind {
        EventKind::Completed
    }
}

impl<S: ServiceSpec> DirectiveSource for S {
    fn dialect(&self) -> Dialect {
        S::DIALECT
    }

    fn decode_mode(&self) -> DecodeMode {
        self.params().effective_decode_mode()
    }

    fn long_connection(&self) -> bool {
        self.params().long_connection
    }

    fn sample_rate(&self) -> u32 {
        self.params().sample_rate
    }

    fn timeouts(&self) -> RequestTimeouts {
        self.params().timeouts
    }

    fn handshake(&mut self) -> NlsResult<Handshake> {
        self.validate()?;
        let task_id = new_task_id();
        self.params_mut().task_id = task_id.clone();
        Ok(Handshake {
            target: self.params().target(S::DIALECT)?,
            start_command: self.start_directive(&task_id),
            started_name: self.started_name(),
            follow_up: self.follow_up(&task_id),
            follow_up_ends_input: self.follow_up_ends_input(),
            terminal: self.terminal_kind(),
            task_id,
        })
    }

    fn stop_command(&self) -> String {
        self.stop_directive(&self.params().task_id)
    }

    fn text_command(&self, text: &str) -> NlsResult<String> {
        self.text_directive(&self.params().task_id, text)
    }

    fn control_command(&self, message: &str) -> NlsResult<String> {
        self.control_directive(&self.params().task_id, message)
    }

    fn flush_command(&self) -> NlsResult<String> {
        self.flush_directive(&self.params().task_id)
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Services fed with audio.
pub trait AudioInput: ServiceSpec {}

/// Services fed with text after start.
pub trait TextInput: ServiceSpec {}

/// Services producing intermediate and final recognition results.
pub trait Recognition: ServiceSpec {}

/// Services segmenting their output into sentences.
pub trait Sentences: ServiceSpec {}

/// Services producing audio.
pub trait Synthesis: ServiceSpec {}

/// Services accepting mid-stream control directives.
pub trait Controllable: ServiceSpec {}

// =============================================================================
// Request handle
// =============================================================================

pub struct Request<S: ServiceSpec> {
    id: RequestId,
    owner: OwnerId,
    node: Arc<ConnectionNode>,
    spec: Arc<Mutex<S>>,
}

impl<S: ServiceSpec> Clone for Request<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            owner: self.owner,
            node: Arc::clone(&self.node),
            spec: Arc::clone(&self.spec),
        }
    }
}

impl<S: ServiceSpec> std::fmt::Debug for Request<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("service", &S::LABEL)
            .field("id", &self.id)
            .field("node", &self.node)
            .finish()
    }
}

impl<S: ServiceSpec> Request<S> {
    pub(crate) fn register(context: &Arc<ClientContext>, spec: S) -> Self {
        let spec = Arc::new(Mutex::new(spec));
        let directives: Arc<Mutex<dyn DirectiveSource>> = spec.clone();
        let node = ConnectionNode::new(S::LABEL, directives, Arc::downgrade(context));
        let id = context
            .manager
            .register(context.owner, S::LABEL, Arc::clone(&node));
        Self {
            id,
            owner: context.owner,
            node,
            spec,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn owner(&self) -> OwnerId {
        self.owner
    }

    // ===== Lifecycle =====

    pub fn start(&self) -> NlsResult<()> {
        self.node.start()
    }

    pub fn stop(&self) -> NlsResult<()> {
        self.node.stop()
    }

    pub fn cancel(&self) -> NlsResult<()> {
        self.node.cancel()
    }

    pub fn wait_started(&self, timeout: Duration) -> NlsResult<()> {
        self.node.wait_started(timeout)
    }

    pub fn wait_completed(&self, timeout: Duration) -> NlsResult<()> {
        self.node.wait_completed(timeout)
    }

    pub fn task_id(&self) -> String {
        self.node.task_id()
    }

    pub fn status(&self) -> NodeState {
        self.node.state()
    }

    pub fn exit_status(&self) -> ExitStatus {
        self.node.exit_status()
    }

    pub fn dump_all_info(&self) -> String {
        self.node.dump_all_info()
    }

    // ===== Configuration =====

    /// Run `f` against the request's configuration.
    pub(crate) fn configure<R>(&self, f: impl FnOnce(&mut S) -> NlsResult<R>) -> NlsResult<R> {
        if self.node.is_releasing() {
            return Err(NlsError::lifecycle("request is being released"));
        }
        f(&mut self.spec.lock())
    }

    pub(crate) fn put_param(&self, key: &str, value: impl Into<serde_json::Value>) -> NlsResult<()> {
        self.configure(|s| {
            s.params_mut().put(key, value);
            Ok(())
        })
    }

    pub(crate) fn put_non_empty(&self, key: &str, value: &str) -> NlsResult<()> {
        if value.is_empty() {
            return Err(NlsError::config(format!("{key} must not be empty")));
        }
        self.put_param(key, value)
    }

    pub fn set_url(&self, url: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_url(url))
    }

    pub fn set_appkey(&self, appkey: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_appkey(appkey))
    }

    pub fn set_token(&self, token: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_token(token))
    }

    pub fn set_payload_param(&self, json: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_payload_param(json))
    }

    pub fn set_context_param(&self, json: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_context_param(json))
    }

    pub fn append_http_header(&self, key: &str, value: &str) -> NlsResult<()> {
        self.configure(|s| s.params_mut().append_http_header(key, value))
    }

    pub fn set_connect_timeout(&self, ms: u64) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_connect_timeout(ms))
    }

    pub fn set_recv_timeout(&self, ms: u64) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_recv_timeout(ms))
    }

    pub fn set_send_timeout(&self, ms: u64) -> NlsResult<()> {
        self.configure(|s| s.params_mut().set_send_timeout(ms))
    }

    pub fn set_sync_call_timeout(&self, ms: u64) -> NlsResult<()> {
        self.configure(|s| {
            s.params_mut().set_sync_call_timeout(ms);
            Ok(())
        })
    }

    pub fn set_decode_mode(&self, mode: DecodeMode) -> NlsResult<()> {
        self.configure(|s| {
            s.params_mut().set_decode_mode(mode);
            Ok(())
        })
    }

    // ===== Callbacks =====

    /// Register a typed callback. Fails while raw message mode is on,
    /// except for binary data which keeps its own handler.
    pub fn set_on_event<F>(&self, kind: EventKind, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.node.is_releasing() {
            return Err(NlsError::lifecycle("request is being released"));
        }
        let callback: EventCallback = Arc::new(callback);
        self.node.dispatcher().with_mode(|mode| match mode {
            CallbackMode::Typed(table) => {
                table.set(kind, callback);
                Ok(())
            }
            CallbackMode::Raw { on_binary, .. } if kind == EventKind::Binary => {
                *on_binary = Some(callback);
                Ok(())
            }
            CallbackMode::Raw { .. } => Err(NlsError::config(format!(
                "cannot register a {kind} callback while raw message mode is on"
            ))),
        })
    }

    pub fn set_on_started<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::Started, callback)
    }

    pub fn set_on_completed<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::Completed, callback)
    }

    pub fn set_on_task_failed<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::TaskFailed, callback)
    }

    pub fn set_on_channel_closed<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::Close, callback)
    }

    /// Switch to raw message mode: every text message, local events
    /// included, goes to `callback` verbatim and typed callbacks are
    /// dropped. A registered binary-data callback is kept.
    pub fn set_on_message<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.node.is_releasing() {
            return Err(NlsError::lifecycle("request is being released"));
        }
        let on_message: EventCallback = Arc::new(callback);
        self.node.dispatcher().with_mode(|mode| {
            let on_binary = match mode {
                CallbackMode::Typed(table) => table.get(EventKind::Binary).cloned(),
                CallbackMode::Raw { on_binary, .. } => on_binary.clone(),
            };
            *mode = CallbackMode::Raw {
                on_message,
                on_binary,
            };
        });
        self.spec.lock().params_mut().raw_mode = true;
        Ok(())
    }

    pub fn is_raw_mode(&self) -> bool {
        self.node.dispatcher().is_raw()
    }
}

impl<S: AudioInput> Request<S> {
    /// Queue audio; returns the number of bytes accepted.
    pub fn send_audio(&self, data: &[u8], codec: EncoderType) -> NlsResult<usize> {
        self.node.send_audio(data, codec)
    }
}

impl<S: TextInput> Request<S> {
    pub fn send_text(&self, text: &str) -> NlsResult<usize> {
        self.node.send_text(text)
    }

    pub fn send_flush(&self) -> NlsResult<()> {
        self.node.send_flush()
    }
}

impl<S: Controllable> Request<S> {
    /// Send a control directive; `message` is a JSON object merged into its payload.
    pub fn control(&self, message: &str) -> NlsResult<()> {
        self.node.send_control(message)
    }
}

impl<S: Recognition> Request<S> {
    pub fn set_on_result_changed<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::ResultChanged, callback)
    }
}

impl<S: Sentences> Request<S> {
    pub fn set_on_sentence_begin<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::SentenceBegin, callback)
    }

    pub fn set_on_sentence_end<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::SentenceEnd, callback)
    }
}

impl<S: Synthesis> Request<S> {
    pub fn set_on_binary_data<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::Binary, callback)
    }

    pub fn set_on_sentence_synthesis<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::SentenceSynthesis, callback)
    }

    pub fn set_on_metainfo<F>(&self, callback: F) -> NlsResult<()>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_on_event(EventKind::MetaInfo, callback)
    }
}
