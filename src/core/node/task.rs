//! The connection task spawned by `start()`.
//!
//! One task per start attempt. It connects (parked channel, then pool, then
//! fresh connect with retries), sends the start directive, and multiplexes
//! queued commands with inbound frames until a terminal event, a failure or
//! cancellation.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{CONNECT_RETRY_INTERVAL, ConnectionNode, NodeState};
use crate::core::event::{Event, EventKind};
use crate::core::protocol::{DecodeMode, Dialect, Translator};
use crate::core::transport::{
    ChannelConnector, ChannelMessage, ConnectTarget, PreconnectedPool, TransportChannel,
};
use crate::errors::{NlsError, NlsResult};

/// Work queued by the caller, delivered in order once the task is started.
#[derive(Debug)]
pub(crate) enum Command {
    Audio(Bytes),
    Text(String),
    Stop(String),
}

/// What a request hands the node for one start attempt.
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    pub target: ConnectTarget,
    pub start_command: String,
    /// Wire name used when a `Started` has to be synthesised.
    pub started_name: &'static str,
    pub task_id: String,
    /// Text frames queued right after the start directive.
    pub follow_up: Vec<String>,
    /// Whether `follow_up` already ends the input.
    pub follow_up_ends_input: bool,
    /// Event that completes the task; `TaskFailed` always ends it too.
    pub terminal: EventKind,
}

#[derive(Debug, Clone)]
pub(crate) struct StartPlan {
    pub target: ConnectTarget,
    pub start_command: String,
    pub started_name: &'static str,
    pub task_id: String,
    pub terminal: EventKind,
    pub dialect: Dialect,
    pub decode_mode: DecodeMode,
    pub long_connection: bool,
    pub connect_timeout: Duration,
    pub connect_retry_count: u32,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
}

/// Shared client resources the task needs; the task never holds the client.
pub(crate) struct TaskEnv {
    pub connector: Arc<dyn ChannelConnector>,
    pub pool: Arc<PreconnectedPool>,
    pub handle: Handle,
}

enum Conclusion {
    Completed(Event),
    Failed { error: NlsError, event: Event },
    /// Cancelled or released; nothing is delivered.
    Abandoned,
}

impl Conclusion {
    fn local_failure(task_id: &str, error: NlsError) -> Self {
        let event = Event::task_failed(task_id, error.code(), error.to_string());
        Conclusion::Failed { error, event }
    }
}

impl ConnectionNode {
    pub(crate) async fn run(
        self: Arc<Self>,
        attempt: u64,
        plan: StartPlan,
        mut commands: mpsc::UnboundedReceiver<Command>,
        token: CancellationToken,
        env: TaskEnv,
    ) {
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(task_id = %plan.task_id, "Cancelled while connecting");
                return;
            }
            result = self.connect(&plan, &env) => result,
        };
        let mut channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                error!(task_id = %plan.task_id, "{}", e);
                self.conclude(attempt, &plan, Conclusion::local_failure(&plan.task_id, e));
                return;
            }
        };

        if !self.advance(attempt, NodeState::Connecting, NodeState::Handshaking) {
            channel.close().await;
            return;
        }

        let conclusion = match self.send_start(channel.as_mut(), &plan).await {
            Ok(()) => {
                self.pump(attempt, &plan, channel.as_mut(), &mut commands, &token)
                    .await
            }
            Err(e) => Conclusion::local_failure(&plan.task_id, e),
        };

        self.dispose(&plan, channel, &conclusion).await;
        self.conclude(attempt, &plan, conclusion);
    }

    async fn connect(
        &self,
        plan: &StartPlan,
        env: &TaskEnv,
    ) -> NlsResult<Box<dyn TransportChannel>> {
        if plan.long_connection {
            let parked = self.parked.lock().take();
            match parked {
                Some(channel) if channel.is_open() => {
                    debug!(task_id = %plan.task_id, "Reusing long connection");
                    return Ok(channel);
                }
                Some(_) => debug!(task_id = %plan.task_id, "Parked channel went away"),
                None => {}
            }
        }

        if let Some(channel) = env.pool.take(&plan.target.pool_key()) {
            debug!(task_id = %plan.task_id, "Using pre-connected channel");
            env.pool
                .replenish(&env.handle, Arc::clone(&env.connector), plan.target.clone());
            return Ok(channel);
        }

        let deadline = Instant::now() + plan.connect_timeout;
        let mut last_error = None;
        for n in 1..=plan.connect_retry_count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.diagnostics.lock().data.connect_attempts += 1;
            match env.connector.connect(&plan.target, remaining).await {
                Ok(channel) => {
                    info!(task_id = %plan.task_id, "Connected to {} (attempt {})", plan.target.url, n);
                    env.pool
                        .replenish(&env.handle, Arc::clone(&env.connector), plan.target.clone());
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(
                        task_id = %plan.task_id,
                        "Connect attempt {}/{} to {} failed: {}",
                        n, plan.connect_retry_count, plan.target.url, e
                    );
                    last_error = Some(e);
                    if n < plan.connect_retry_count {
                        sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        Err(NlsError::Connect(match last_error {
            Some(e) => format!("{}: {}", plan.target.url, e),
            None => format!(
                "{}: no attempt fit in {}ms",
                plan.target.url,
                plan.connect_timeout.as_millis()
            ),
        }))
    }

    async fn send_start(
        &self,
        channel: &mut dyn TransportChannel,
        plan: &StartPlan,
    ) -> NlsResult<()> {
        trace!(task_id = %plan.task_id, "Start directive: {}", plan.start_command);
        send_with_timeout(
            channel.send_text(plan.start_command.clone()),
            plan.send_timeout,
            "start directive",
        )
        .await?;
        Ok(())
    }

    async fn pump(
        &self,
        attempt: u64,
        plan: &StartPlan,
        channel: &mut dyn TransportChannel,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        token: &CancellationToken,
    ) -> Conclusion {
        let mut translator = Translator::new(plan.dialect, plan.decode_mode);
        let mut started = false;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Conclusion::Abandoned,

                command = commands.recv(), if started => match command {
                    Some(command) => {
                        if let Err(e) = self.forward(channel, command, plan).await {
                            return Conclusion::local_failure(&plan.task_id, e);
                        }
                    }
                    None => return Conclusion::Abandoned,
                },

                received = timeout(plan.recv_timeout, channel.recv()) => {
                    let message = match received {
                        Ok(Ok(message)) => message,
                        Ok(Err(e)) => {
                            return Conclusion::local_failure(
                                &plan.task_id,
                                NlsError::Transport(e.to_string()),
                            );
                        }
                        Err(_) => {
                            return Conclusion::local_failure(
                                &plan.task_id,
                                NlsError::Timeout(format!(
                                    "no message from server within {}ms",
                                    plan.recv_timeout.as_millis()
                                )),
                            );
                        }
                    };

                    match message {
                        ChannelMessage::Binary(data) => {
                            if !started {
                                started = self.synthesize_started(attempt, plan);
                            }
                            self.diagnostics.lock().record_binary(data.len());
                            self.deliver(attempt, &Event::binary(&plan.task_id, data));
                        }
                        ChannelMessage::Closed { code, reason } => {
                            return Conclusion::local_failure(
                                &plan.task_id,
                                NlsError::Transport(format!(
                                    "server closed the connection (code {code:?}) {reason}"
                                )),
                            );
                        }
                        ChannelMessage::Text(raw) => match translator.decode(&raw) {
                            Ok(event) => match event.kind {
                                EventKind::Started => {
                                    if started {
                                        debug!(task_id = %plan.task_id, "Duplicate started event dropped");
                                        continue;
                                    }
                                    started = true;
                                    self.mark_started(attempt);
                                    self.deliver(attempt, &event);
                                }
                                EventKind::TaskFailed => {
                                    let error = NlsError::TaskFailed {
                                        status_code: event.status_code,
                                        message: event.status_text.clone(),
                                    };
                                    return Conclusion::Failed { error, event };
                                }
                                kind if kind == plan.terminal => {
                                    if !started {
                                        self.synthesize_started(attempt, plan);
                                    }
                                    return Conclusion::Completed(event);
                                }
                                _ => {
                                    if !started {
                                        started = self.synthesize_started(attempt, plan);
                                    }
                                    self.deliver(attempt, &event);
                                }
                            },
                            Err(outcome) if outcome.is_ignorable() => {
                                trace!(task_id = %plan.task_id, "Ignorable message: {}", raw);
                            }
                            Err(outcome) if plan.decode_mode.is_lenient() => {
                                warn!(task_id = %plan.task_id, "Dropping undecodable message ({}): {}", outcome, raw);
                            }
                            Err(outcome) => {
                                error!(task_id = %plan.task_id, "Undecodable message ({}): {}", outcome, raw);
                                return Conclusion::local_failure(&plan.task_id, NlsError::Protocol(outcome));
                            }
                        },
                    }
                }
            }
        }
    }

    async fn forward(
        &self,
        channel: &mut dyn TransportChannel,
        command: Command,
        plan: &StartPlan,
    ) -> NlsResult<()> {
        match command {
            Command::Audio(frame) => {
                let len = frame.len();
                let sent =
                    send_with_timeout(channel.send_binary(frame), plan.send_timeout, "audio").await;
                self.queued_audio
                    .fetch_sub(len, std::sync::atomic::Ordering::AcqRel);
                sent?;
            }
            Command::Text(text) => {
                send_with_timeout(channel.send_text(text), plan.send_timeout, "text").await?;
            }
            Command::Stop(stop) if stop.is_empty() => {
                debug!(task_id = %plan.task_id, "Nothing to send on stop");
            }
            Command::Stop(stop) => {
                debug!(task_id = %plan.task_id, "Sending stop directive");
                send_with_timeout(channel.send_text(stop), plan.send_timeout, "stop directive")
                    .await?;
            }
        }
        Ok(())
    }

    async fn dispose(
        &self,
        plan: &StartPlan,
        mut channel: Box<dyn TransportChannel>,
        conclusion: &Conclusion,
    ) {
        let keep = plan.long_connection
            && channel.is_open()
            && matches!(conclusion, Conclusion::Completed(_));
        if keep && !self.is_releasing() {
            debug!(task_id = %plan.task_id, "Parking channel for reuse");
            *self.parked.lock() = Some(channel);
        } else {
            channel.close().await;
        }
    }

    // ===== Status transitions =====

    fn is_current(&self, attempt: u64) -> bool {
        let st = self.status.lock();
        st.attempt == attempt && !st.finished
    }

    /// Move `from` → `to` for the current attempt. Returns whether the
    /// attempt is still live; a different current state is left untouched.
    fn advance(&self, attempt: u64, from: NodeState, to: NodeState) -> bool {
        let mut st = self.status.lock();
        if st.attempt != attempt || st.finished {
            return false;
        }
        if st.state == from {
            st.state = to;
            drop(st);
            self.diagnostics.lock().record_state(to);
        }
        true
    }

    fn mark_started(&self, attempt: u64) {
        {
            let mut st = self.status.lock();
            if st.attempt != attempt || st.finished {
                return;
            }
            if matches!(st.state, NodeState::Connecting | NodeState::Handshaking) {
                st.state = NodeState::Started;
            }
            info!(task_id = %st.task_id, "Request started");
        }
        self.diagnostics.lock().record_state(NodeState::Started);

        let next = {
            let mut st = self.status.lock();
            if st.attempt != attempt || st.finished {
                return;
            }
            st.started = true;
            if st.state != NodeState::Started {
                None
            } else {
                st.state = if st.input_ended {
                    st.exit = super::ExitStatus::Stopping;
                    NodeState::Stopping
                } else {
                    NodeState::Running
                };
                Some(st.state)
            }
        };
        if let Some(next) = next {
            self.diagnostics.lock().record_state(next);
        }
        self.changed.notify_all();
    }

    fn synthesize_started(&self, attempt: u64, plan: &StartPlan) -> bool {
        if !self.is_current(attempt) {
            return false;
        }
        debug!(task_id = %plan.task_id, "Data before started event; synthesising {}", plan.started_name);
        self.mark_started(attempt);
        self.deliver(
            attempt,
            &Event::synthesized_started(&plan.task_id, plan.started_name),
        );
        true
    }

    fn deliver(&self, attempt: u64, event: &Event) {
        self.dispatcher.deliver(attempt, event, &self.diagnostics);
    }

    fn conclude(&self, attempt: u64, plan: &StartPlan, conclusion: Conclusion) {
        let (state, primary, failure) = match conclusion {
            Conclusion::Abandoned => return,
            Conclusion::Completed(event) => (NodeState::Closed, event, None),
            Conclusion::Failed { error, event } => (NodeState::Failed, event, Some(error)),
        };

        {
            let mut st = self.status.lock();
            if st.attempt != attempt || st.finished {
                return;
            }
            st.state = state;
            st.exit = super::ExitStatus::Closed;
            st.commands = None;
            st.cancel = None;
        }
        {
            let mut diag = self.diagnostics.lock();
            if state == NodeState::Closed {
                diag.record_completed();
            }
            diag.record_state(state);
        }
        match state {
            NodeState::Closed => info!(task_id = %plan.task_id, "Request completed"),
            _ => warn!(task_id = %plan.task_id, "Request failed: {}", primary.status_text),
        }

        self.deliver(attempt, &primary);
        self.deliver(attempt, &Event::close(&plan.task_id));

        {
            let mut st = self.status.lock();
            // waiters resolve only once both terminal events are out
            if st.attempt == attempt {
                st.finished = true;
                st.failure = failure;
            }
        }
        self.changed.notify_all();
    }
}

async fn send_with_timeout<F>(send: F, budget: Duration, what: &str) -> NlsResult<usize>
where
    F: std::future::Future<Output = Result<usize, crate::core::transport::TransportError>>,
{
    match timeout(budget, send).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(NlsError::Transport(format!("sending {what}: {e}"))),
        Err(_) => Err(NlsError::Timeout(format!(
            "sending {what} exceeded {}ms",
            budget.as_millis()
        ))),
    }
}
