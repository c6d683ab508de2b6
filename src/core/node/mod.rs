//! Connection node: the per-request state machine.
//!
//! A node owns at most one transport channel at a time and drives it from a
//! single task on the client's worker runtime. The caller-facing methods
//! below are blocking, never touch the network themselves, and talk to the
//! task through an ordered command queue. In sync mode `start()`/`stop()`
//! wait on a condition variable for the matching event.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   Command (mpsc)   ┌──────────────────┐
//! │ start/stop/send* │───────────────────▶│ connection task  │◀──▶ TransportChannel
//! └────────┬─────────┘                    └────────┬─────────┘
//!          │ wait (Condvar)                        │ decode + deliver
//!          ▼                                       ▼
//!     NodeStatus  ◀───────── transitions ──── Dispatcher ──▶ user callbacks
//! ```

mod diagnostics;
mod dispatch;
mod state;
mod task;

pub use diagnostics::{ApiCall, Diagnostics};
pub use dispatch::{CallbackMode, CallbackTable, EventCallback};
pub use state::{ExitStatus, NodeState};

pub(crate) use dispatch::Dispatcher;
pub(crate) use task::{Command, Handshake, StartPlan};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientContext;
use crate::core::encoder::{AudioEncoder, EncoderType, build_encoder};
use crate::core::protocol::{DecodeMode, Dialect};
use crate::core::transport::TransportChannel;
use crate::errors::{NlsError, NlsResult};

// =============================================================================
// Constants
// =============================================================================

/// Pause between connect attempts.
pub(crate) const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(30);

/// Longest a release or cancel waits for a running callback to return.
pub(crate) const CALLBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Directive source
// =============================================================================

/// Per-timeout overrides a request may carry; `None` uses the client value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub connect_ms: Option<u64>,
    pub recv_ms: Option<u64>,
    pub send_ms: Option<u64>,
    pub sync_call_ms: Option<u64>,
}

/// What a request's configuration contributes to its node.
pub(crate) trait DirectiveSource: Send {
    fn dialect(&self) -> Dialect;

    fn decode_mode(&self) -> DecodeMode;

    fn long_connection(&self) -> bool;

    fn sample_rate(&self) -> u32;

    fn timeouts(&self) -> RequestTimeouts;

    /// Validate configuration, allocate a task id and build the start directive.
    fn handshake(&mut self) -> NlsResult<Handshake>;

    fn stop_command(&self) -> String;

    fn text_command(&self, _text: &str) -> NlsResult<String> {
        Err(NlsError::config("this request does not accept text"))
    }

    fn control_command(&self, _message: &str) -> NlsResult<String> {
        Err(NlsError::config("this request does not accept control messages"))
    }

    fn flush_command(&self) -> NlsResult<String> {
        Err(NlsError::config("this request does not support flush"))
    }
}

// =============================================================================
// Node
// =============================================================================

pub(crate) struct NodeStatus {
    pub(crate) state: NodeState,
    pub(crate) exit: ExitStatus,
    /// Incremented by every `start()`; stale tasks compare against it.
    pub(crate) attempt: u64,
    pub(crate) task_id: String,
    pub(crate) started: bool,
    /// Queued follow-up frames already ended the input; stop has nothing left to send.
    pub(crate) input_ended: bool,
    /// The attempt reached a terminal state and every terminal callback ran.
    pub(crate) finished: bool,
    pub(crate) failure: Option<NlsError>,
    pub(crate) commands: Option<mpsc::UnboundedSender<Command>>,
    pub(crate) cancel: Option<CancellationToken>,
}

#[derive(Clone, Copy)]
enum Milestone {
    Started,
    Finished,
}

pub struct ConnectionNode {
    label: &'static str,
    status: Mutex<NodeStatus>,
    changed: Condvar,
    releasing: AtomicBool,
    queued_audio: AtomicUsize,
    audio_limit: AtomicUsize,
    diagnostics: Mutex<Diagnostics>,
    dispatcher: Dispatcher,
    directives: Arc<Mutex<dyn DirectiveSource>>,
    context: Weak<ClientContext>,
    parked: Mutex<Option<Box<dyn TransportChannel>>>,
    encoder: Mutex<Option<Box<dyn AudioEncoder>>>,
}

impl ConnectionNode {
    pub(crate) fn new(
        label: &'static str,
        directives: Arc<Mutex<dyn DirectiveSource>>,
        context: Weak<ClientContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label,
            status: Mutex::new(NodeStatus {
                state: NodeState::Invalid,
                exit: ExitStatus::Invalid,
                attempt: 0,
                task_id: String::new(),
                started: false,
                input_ended: false,
                finished: false,
                failure: None,
                commands: None,
                cancel: None,
            }),
            changed: Condvar::new(),
            releasing: AtomicBool::new(false),
            queued_audio: AtomicUsize::new(0),
            audio_limit: AtomicUsize::new(usize::MAX),
            diagnostics: Mutex::new(Diagnostics::new()),
            dispatcher: Dispatcher::new(),
            directives,
            context,
            parked: Mutex::new(None),
            encoder: Mutex::new(None),
        })
    }

    // ===== Accessors =====

    pub fn state(&self) -> NodeState {
        self.status.lock().state
    }

    pub fn exit_status(&self) -> ExitStatus {
        self.status.lock().exit
    }

    pub fn task_id(&self) -> String {
        self.status.lock().task_id.clone()
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing.load(Ordering::Acquire)
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Structured diagnostic snapshot as a JSON string.
    pub fn dump_all_info(&self) -> String {
        let (state, task_id) = {
            let st = self.status.lock();
            (st.state, st.task_id.clone())
        };
        self.diagnostics.lock().dump(state, &task_id).to_string()
    }

    fn context(&self) -> NlsResult<Arc<ClientContext>> {
        self.context
            .upgrade()
            .ok_or_else(|| NlsError::lifecycle("client has been dropped"))
    }

    fn ensure_usable(&self) -> NlsResult<()> {
        if self.is_releasing() {
            return Err(NlsError::lifecycle("request is being released"));
        }
        Ok(())
    }

    fn sync_timeout(&self, context: &ClientContext) -> Option<Duration> {
        let per_request = self.directives.lock().timeouts().sync_call_ms;
        match per_request {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => context.config().sync_call_timeout(),
        }
    }

    // ===== Start =====

    /// Open the channel and send the start directive.
    ///
    /// Async mode returns once the connection task is spawned; sync mode
    /// blocks until `Started`, `TaskFailed` or the sync-call timeout.
    pub fn start(self: &Arc<Self>) -> NlsResult<()> {
        self.ensure_usable()?;
        let context = self.context()?;
        let handle = context.handle()?;
        let config = context.config();
        let current = self.state();
        if !current.can_start() {
            return Err(NlsError::state("start", current));
        }

        let (handshake, dialect, decode_mode, long_connection, timeouts) = {
            let mut directives = self.directives.lock();
            let handshake = directives.handshake()?;
            (
                handshake,
                directives.dialect(),
                directives.decode_mode(),
                directives.long_connection(),
                directives.timeouts(),
            )
        };

        let mut target = handshake.target;
        target.address_family = config.address_family;
        target.direct_host = config.direct_host;
        let plan = StartPlan {
            target,
            start_command: handshake.start_command,
            started_name: handshake.started_name,
            task_id: handshake.task_id,
            terminal: handshake.terminal,
            dialect,
            decode_mode,
            long_connection,
            connect_timeout: timeouts
                .connect_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.connect_timeout()),
            connect_retry_count: config.connect_retry_count.max(1),
            recv_timeout: timeouts
                .recv_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.recv_timeout()),
            send_timeout: timeouts
                .send_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.send_timeout()),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for frame in handshake.follow_up {
            let _ = tx.send(Command::Text(frame));
        }
        let token = CancellationToken::new();
        let attempt = {
            let mut st = self.status.lock();
            if !st.state.can_start() {
                return Err(NlsError::state("start", st.state));
            }
            st.attempt += 1;
            st.state = NodeState::Connecting;
            st.exit = ExitStatus::Invalid;
            st.started = false;
            st.input_ended = handshake.follow_up_ends_input;
            st.finished = false;
            st.failure = None;
            st.task_id = plan.task_id.clone();
            st.commands = Some(tx);
            st.cancel = Some(token.clone());
            st.attempt
        };

        self.queued_audio.store(0, Ordering::Release);
        self.audio_limit
            .store(config.audio_buffer_limit_bytes, Ordering::Release);
        *self.encoder.lock() = None;
        {
            let mut diag = self.diagnostics.lock();
            diag.reset_attempt();
            diag.begin_api(ApiCall::Start);
            diag.record_state(NodeState::Connecting);
        }
        self.dispatcher.open(attempt);

        info!(
            task_id = %plan.task_id,
            "Starting {} request against {}",
            self.label, plan.target.url
        );
        let env = task::TaskEnv {
            connector: Arc::clone(&context.connector),
            pool: Arc::clone(&context.pool),
            handle: handle.clone(),
        };
        handle.spawn(Arc::clone(self).run(attempt, plan, rx, token, env));

        let result = match self.sync_timeout(&context) {
            Some(budget) if !self.dispatcher.in_callback() => {
                self.wait_for(Milestone::Started, budget, "start")
            }
            _ => Ok(()),
        };
        self.diagnostics.lock().end_api();
        result
    }

    // ===== Stop / cancel =====

    /// Signal end of input. In-flight results keep arriving until the
    /// terminal `Completed` + `Close` (or `TaskFailed` + `Close`).
    pub fn stop(&self) -> NlsResult<()> {
        self.ensure_usable()?;
        let context = self.context()?;
        self.diagnostics.lock().begin_api(ApiCall::Stop);

        let queued = (|| {
            let command = self.directives.lock().stop_command();
            let mut st = self.status.lock();
            if !st.state.can_stop() || st.input_ended {
                return Err(NlsError::state("stop", st.state));
            }
            let sent = st
                .commands
                .as_ref()
                .is_some_and(|tx| tx.send(Command::Stop(command)).is_ok());
            if !sent {
                return Err(NlsError::state("stop", st.state));
            }
            st.state = NodeState::Stopping;
            st.exit = ExitStatus::Stopping;
            debug!(task_id = %st.task_id, "Stop queued");
            Ok(())
        })();

        let result = queued.and_then(|()| match self.sync_timeout(&context) {
            Some(budget) if !self.dispatcher.in_callback() => {
                self.wait_for(Milestone::Finished, budget, "stop")
            }
            _ => Ok(()),
        });
        self.diagnostics.lock().end_api();
        result
    }

    /// Tear down immediately. Idempotent; once it returns no callback of
    /// this attempt runs any more.
    pub fn cancel(&self) -> NlsResult<()> {
        self.diagnostics.lock().begin_api(ApiCall::Cancel);
        let token = {
            let mut st = self.status.lock();
            if st.state == NodeState::Invalid || st.state == NodeState::Destroyed || st.finished {
                drop(st);
                self.diagnostics.lock().end_api();
                return Ok(());
            }
            st.state = NodeState::Cancelled;
            st.exit = ExitStatus::Cancelled;
            st.finished = true;
            st.commands = None;
            info!(task_id = %st.task_id, "Request cancelled");
            st.cancel.take()
        };
        self.dispatcher.mute();
        self.changed.notify_all();
        if let Some(token) = token {
            token.cancel();
        }
        self.dispatcher.wait_idle(CALLBACK_DRAIN_TIMEOUT);

        let mut diag = self.diagnostics.lock();
        diag.record_state(NodeState::Cancelled);
        diag.end_api();
        Ok(())
    }

    // ===== Waiting (async mode) =====

    /// Block until `Started` for the current attempt, or fail.
    pub fn wait_started(&self, timeout: Duration) -> NlsResult<()> {
        self.wait_for(Milestone::Started, timeout, "start")
    }

    /// Block until the current attempt has finished.
    pub fn wait_completed(&self, timeout: Duration) -> NlsResult<()> {
        self.wait_for(Milestone::Finished, timeout, "completion")
    }

    fn wait_for(&self, milestone: Milestone, timeout: Duration, what: &str) -> NlsResult<()> {
        let deadline = Instant::now() + timeout;
        let mut st = self.status.lock();
        loop {
            if let Some(failure) = &st.failure {
                return Err(failure.clone());
            }
            match st.state {
                NodeState::Cancelled => return Err(NlsError::Cancelled),
                NodeState::Destroyed => return Err(NlsError::lifecycle("request released")),
                _ => {}
            }
            match milestone {
                Milestone::Started if st.started => return Ok(()),
                Milestone::Finished if st.finished => return Ok(()),
                Milestone::Started if st.finished => {
                    return Err(NlsError::state("start", st.state));
                }
                _ => {}
            }
            if st.state == NodeState::Invalid {
                return Err(NlsError::state("wait", st.state));
            }
            if self.changed.wait_until(&mut st, deadline).timed_out() {
                warn!(
                    task_id = %st.task_id,
                    "{} not resolved within {}ms (state {})",
                    what,
                    timeout.as_millis(),
                    st.state
                );
                return Err(NlsError::Timeout(format!(
                    "{what} not resolved within {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    // ===== Sending =====

    /// Queue one audio chunk, encoding it first unless `codec` is PCM.
    /// Returns the number of input bytes accepted.
    pub fn send_audio(&self, data: &[u8], codec: EncoderType) -> NlsResult<usize> {
        self.ensure_usable()?;
        self.check_sendable("send_audio")?;
        if data.is_empty() {
            return Ok(0);
        }

        let frame = if codec == EncoderType::None {
            Bytes::copy_from_slice(data)
        } else {
            Bytes::from(self.encode(data, codec)?)
        };

        let len = frame.len();
        let limit = self.audio_limit.load(Ordering::Acquire);
        let queued = self.queued_audio.fetch_add(len, Ordering::AcqRel);
        if queued + len > limit {
            self.queued_audio.fetch_sub(len, Ordering::AcqRel);
            return Err(NlsError::BufferFull { queued, limit });
        }

        if let Err(e) = self.enqueue("send_audio", Command::Audio(frame)) {
            self.queued_audio.fetch_sub(len, Ordering::AcqRel);
            return Err(e);
        }
        self.diagnostics.lock().record_audio(data.len());
        Ok(data.len())
    }

    /// Queue a text chunk (streaming synthesis, dialog queries).
    pub fn send_text(&self, text: &str) -> NlsResult<usize> {
        self.ensure_usable()?;
        self.check_sendable("send_text")?;
        let command = self.directives.lock().text_command(text)?;
        self.enqueue("send_text", Command::Text(command))?;
        self.diagnostics.lock().record_text();
        Ok(text.len())
    }

    /// Queue a service control directive.
    pub fn send_control(&self, message: &str) -> NlsResult<()> {
        self.ensure_usable()?;
        self.check_sendable("control")?;
        let command = self.directives.lock().control_command(message)?;
        let mut diag = self.diagnostics.lock();
        diag.begin_api(ApiCall::Control);
        drop(diag);
        let result = self.enqueue("control", Command::Text(command));
        self.diagnostics.lock().end_api();
        result
    }

    /// Ask the server to synthesise buffered text now.
    pub fn send_flush(&self) -> NlsResult<()> {
        self.ensure_usable()?;
        self.check_sendable("flush")?;
        let command = self.directives.lock().flush_command()?;
        self.enqueue("flush", Command::Text(command))
    }

    fn check_sendable(&self, operation: &'static str) -> NlsResult<()> {
        let state = self.state();
        if state.can_send() {
            Ok(())
        } else {
            Err(NlsError::state(operation, state))
        }
    }

    fn enqueue(&self, operation: &'static str, command: Command) -> NlsResult<()> {
        let st = self.status.lock();
        if !st.state.can_send() {
            return Err(NlsError::state(operation, st.state));
        }
        match st.commands.as_ref() {
            Some(tx) if tx.send(command).is_ok() => Ok(()),
            _ => Err(NlsError::state(operation, st.state)),
        }
    }

    fn encode(&self, data: &[u8], codec: EncoderType) -> NlsResult<Vec<u8>> {
        let mut slot = self.encoder.lock();
        let encoder = match slot.take() {
            Some(encoder) if encoder.codec() == codec => encoder,
            _ => {
                let context = self.context()?;
                let factory = context.encoders.read().clone();
                let sample_rate = self.directives.lock().sample_rate();
                build_encoder(factory.as_ref(), codec, sample_rate)?
            }
        };
        let encoder = slot.insert(encoder);
        Ok(encoder.encode(data)?)
    }

    // ===== Release support =====

    pub(crate) fn set_releasing(&self) {
        self.releasing.store(true, Ordering::Release);
    }

    /// Stop delivering events and wait for a running callback to return.
    pub(crate) fn detach_events(&self) {
        self.dispatcher.mute();
        self.dispatcher.wait_idle(CALLBACK_DRAIN_TIMEOUT);
        self.dispatcher.clear();
    }

    /// Final teardown once the node has left the registry.
    pub(crate) fn destroy(&self) {
        self.set_releasing();
        self.dispatcher.mute();
        let token = {
            let mut st = self.status.lock();
            st.state = NodeState::Destroyed;
            st.finished = true;
            st.commands = None;
            st.cancel.take()
        };
        self.changed.notify_all();
        if let Some(token) = token {
            token.cancel();
        }
        self.dispatcher.clear();
        *self.encoder.lock() = None;

        let parked = self.parked.lock().take();
        if let Some(mut channel) = parked {
            match self.context().and_then(|c| c.handle()) {
                Ok(handle) => {
                    handle.spawn(async move { channel.close().await });
                }
                Err(_) => drop(channel),
            }
        }
        self.diagnostics.lock().record_state(NodeState::Destroyed);
        debug!("{} node destroyed", self.label);
    }
}

impl std::fmt::Debug for ConnectionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.status.lock();
        f.debug_struct("ConnectionNode")
            .field("label", &self.label)
            .field("state", &st.state)
            .field("task_id", &st.task_id)
            .finish()
    }
}
