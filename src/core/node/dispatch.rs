//! Event dispatch to user callbacks.
//!
//! A request either registers typed callbacks per event kind, or switches to
//! raw mode where every message is delivered verbatim through one handler
//! (binary frames keep their own handler). The two modes are variants of
//! [`CallbackMode`] and cannot be combined.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{error, warn};

use super::diagnostics::Diagnostics;
use crate::core::event::{Event, EventKind};

/// Callback invoked on a worker thread. Captured state plays the role of
/// user data.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Typed callbacks keyed by event kind.
#[derive(Clone, Default)]
pub struct CallbackTable {
    handlers: HashMap<EventKind, EventCallback>,
}

impl CallbackTable {
    pub fn set(&mut self, kind: EventKind, callback: EventCallback) {
        self.handlers.insert(kind, callback);
    }

    pub fn remove(&mut self, kind: EventKind) {
        self.handlers.remove(&kind);
    }

    pub fn get(&self, kind: EventKind) -> Option<&EventCallback> {
        self.handlers.get(&kind)
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// How decoded events reach the caller.
#[derive(Clone)]
pub enum CallbackMode {
    Typed(CallbackTable),
    Raw {
        on_message: EventCallback,
        on_binary: Option<EventCallback>,
    },
}

impl Default for CallbackMode {
    fn default() -> Self {
        CallbackMode::Typed(CallbackTable::default())
    }
}

impl CallbackMode {
    pub fn is_raw(&self) -> bool {
        matches!(self, CallbackMode::Raw { .. })
    }

    fn resolve(&self, event: &Event) -> Option<EventCallback> {
        match self {
            CallbackMode::Typed(table) => table.get(event.kind).cloned(),
            CallbackMode::Raw {
                on_message,
                on_binary,
            } => {
                if event.kind == EventKind::Binary {
                    on_binary.clone()
                } else {
                    Some(Arc::clone(on_message))
                }
            }
        }
    }
}

struct Gate {
    /// Delivery is closed (cancelled, released or destroyed).
    muted: bool,
    /// Only events of this start attempt are delivered.
    attempt: u64,
    running: Option<ThreadId>,
}

pub(crate) struct Dispatcher {
    mode: RwLock<CallbackMode>,
    gate: Mutex<Gate>,
    idle: Condvar,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            mode: RwLock::new(CallbackMode::default()),
            gate: Mutex::new(Gate {
                muted: true,
                attempt: 0,
                running: None,
            }),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn with_mode<R>(&self, f: impl FnOnce(&mut CallbackMode) -> R) -> R {
        f(&mut self.mode.write())
    }

    pub(crate) fn is_raw(&self) -> bool {
        self.mode.read().is_raw()
    }

    /// Accept events of `attempt` from now on.
    pub(crate) fn open(&self, attempt: u64) {
        let mut gate = self.gate.lock();
        gate.muted = false;
        gate.attempt = attempt;
    }

    /// Stop delivering. Callbacks already running finish normally.
    pub(crate) fn mute(&self) {
        self.gate.lock().muted = true;
    }

    pub(crate) fn clear(&self) {
        *self.mode.write() = CallbackMode::default();
    }

    /// Run the callback matching `event`. Returns whether one ran.
    pub(crate) fn deliver(&self, attempt: u64, event: &Event, diag: &Mutex<Diagnostics>) -> bool {
        let Some(callback) = self.mode.read().resolve(event) else {
            return false;
        };

        {
            let mut gate = self.gate.lock();
            if gate.muted || gate.attempt != attempt {
                return false;
            }
            gate.running = Some(thread::current().id());
        }

        diag.lock().callback_started(event.kind);
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!(task_id = %event.task_id, "Callback for {} panicked", event.kind);
        }
        diag.lock().callback_finished(event.kind, &event.task_id);

        self.gate.lock().running = None;
        self.idle.notify_all();
        true
    }

    /// Wait until no callback is running. Returns `false` on timeout, or
    /// immediately when called from inside the running callback.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let mut gate = self.gate.lock();
        if gate.running == Some(thread::current().id()) {
            warn!("Release requested from inside its own callback; not waiting");
            return false;
        }
        let deadline = std::time::Instant::now() + timeout;
        while gate.running.is_some() {
            if self.idle.wait_until(&mut gate, deadline).timed_out() {
                warn!("Callback still running after {}ms", timeout.as_millis());
                return false;
            }
        }
        true
    }

    pub(crate) fn in_callback(&self) -> bool {
        self.gate.lock().running == Some(thread::current().id())
    }
}
