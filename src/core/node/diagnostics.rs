//! Per-node diagnostic snapshot.
//!
//! Tracks which blocking API call is outstanding, which callback is running
//! on the worker (a slow callback stalls sibling requests), data counters and
//! lifecycle timestamps. Rendered as JSON by `dump_all_info`.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use super::NodeState;
use crate::core::event::EventKind;

/// Callbacks running longer than this are logged.
const SLOW_CALLBACK: Duration = Duration::from_millis(500);

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// API entry points tracked while in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiCall {
    Start,
    Stop,
    Cancel,
    SendAudio,
    SendText,
    Control,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BlockInfo {
    /// Call currently in progress, if any.
    pub api_in_progress: Option<ApiCall>,
    pub api_since_ms: u64,
    pub last_api: Option<ApiCall>,
    pub last_api_ms: u64,
    pub last_status: Option<NodeState>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CallbackInfo {
    pub running: Option<EventKind>,
    pub last: Option<EventKind>,
    pub start_ms: u64,
    pub end_ms: u64,
    pub longest_ms: u64,
    pub delivered: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DataInfo {
    pub recording_bytes: u64,
    pub send_count: u64,
    pub text_count: u64,
    pub play_bytes: u64,
    pub play_count: u64,
    pub connect_attempts: u32,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Timestamps {
    pub create: u64,
    pub start: u64,
    pub connected: u64,
    pub started: u64,
    pub stop: u64,
    pub cancel: u64,
    pub first_binary: u64,
    pub last_send: u64,
    pub last_ctrl: u64,
    pub failed: u64,
    pub completed: u64,
    pub closed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub block: BlockInfo,
    pub callback: CallbackInfo,
    pub data: DataInfo,
    pub timestamp: Timestamps,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            block: BlockInfo::default(),
            callback: CallbackInfo::default(),
            data: DataInfo::default(),
            timestamp: Timestamps {
                create: now_ms(),
                ..Default::default()
            },
        }
    }

    /// Clear everything but the creation time for a new attempt.
    pub fn reset_attempt(&mut self) {
        let create = self.timestamp.create;
        *self = Self::new();
        self.timestamp.create = create;
        self.timestamp.start = now_ms();
    }

    pub fn begin_api(&mut self, api: ApiCall) {
        let now = now_ms();
        self.block.api_in_progress = Some(api);
        self.block.api_since_ms = now;
        self.block.last_api = Some(api);
        self.block.last_api_ms = now;
        match api {
            ApiCall::Stop => self.timestamp.stop = now,
            ApiCall::Cancel => self.timestamp.cancel = now,
            ApiCall::Control => self.timestamp.last_ctrl = now,
            _ => {}
        }
    }

    pub fn end_api(&mut self) {
        self.block.api_in_progress = None;
    }

    pub fn record_state(&mut self, state: NodeState) {
        self.block.last_status = Some(state);
        let now = now_ms();
        match state {
            NodeState::Handshaking => self.timestamp.connected = now,
            NodeState::Started => self.timestamp.started = now,
            NodeState::Failed => self.timestamp.failed = now,
            NodeState::Closed => self.timestamp.closed = now,
            _ => {}
        }
    }

    pub fn record_audio(&mut self, bytes: usize) {
        self.data.recording_bytes += bytes as u64;
        self.data.send_count += 1;
        self.timestamp.last_send = now_ms();
    }

    pub fn record_text(&mut self) {
        self.data.text_count += 1;
        self.timestamp.last_send = now_ms();
    }

    pub fn record_binary(&mut self, bytes: usize) {
        if self.data.play_count == 0 {
            self.timestamp.first_binary = now_ms();
        }
        self.data.play_bytes += bytes as u64;
        self.data.play_count += 1;
    }

    pub fn record_completed(&mut self) {
        self.timestamp.completed = now_ms();
    }

    pub fn callback_started(&mut self, kind: EventKind) {
        self.callback.running = Some(kind);
        self.callback.start_ms = now_ms();
    }

    pub fn callback_finished(&mut self, kind: EventKind, task_id: &str) {
        let end = now_ms();
        let took = end.saturating_sub(self.callback.start_ms);
        if took > SLOW_CALLBACK.as_millis() as u64 {
            warn!(
                task_id = %task_id,
                "Callback for {} took {}ms and blocked the worker",
                kind, took
            );
        }
        self.callback.running = None;
        self.callback.last = Some(kind);
        self.callback.end_ms = end;
        self.callback.longest_ms = self.callback.longest_ms.max(took);
        self.callback.delivered += 1;
    }

    pub fn dump(&self, state: NodeState, task_id: &str) -> serde_json::Value {
        serde_json::json!({
            "status": state,
            "task_id": task_id,
            "block": self.block,
            "callback": self.callback,
            "data": self.data,
            "timestamp": self.timestamp,
        })
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
