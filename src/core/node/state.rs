//! Connection node states.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a connection node.
///
/// ```text
/// Invalid → Connecting → Handshaking → Started → Running → Stopping
///                                                    ↓
///                                  Closed | Failed | Cancelled → Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    Invalid,
    Connecting,
    Handshaking,
    /// The server acknowledged the start. Left for `Running` (or `Stopping`
    /// when the start frames already closed the input) before waiters and
    /// the `Started` callback see it.
    Started,
    Running,
    Stopping,
    Closed,
    Failed,
    Cancelled,
    Destroyed,
}

impl NodeState {
    /// Closed, Failed, Cancelled or Destroyed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Closed | NodeState::Failed | NodeState::Cancelled | NodeState::Destroyed
        )
    }

    /// A connection task is (or should be) running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            NodeState::Connecting
                | NodeState::Handshaking
                | NodeState::Started
                | NodeState::Running
                | NodeState::Stopping
        )
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            NodeState::Invalid | NodeState::Closed | NodeState::Failed | NodeState::Cancelled
        )
    }

    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            NodeState::Connecting | NodeState::Handshaking | NodeState::Started | NodeState::Running
        )
    }

    pub fn can_send(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the last attempt ended, independent of the transport outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExitStatus {
    #[default]
    Invalid,
    Stopping,
    Cancelled,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_only_when_idle() {
        assert!(NodeState::Invalid.can_start());
        assert!(NodeState::Closed.can_start());
        assert!(NodeState::Failed.can_start());
        assert!(!NodeState::Running.can_start());
        assert!(!NodeState::Destroyed.can_start());
    }

    #[test]
    fn test_send_only_while_running() {
        for state in [
            NodeState::Invalid,
            NodeState::Connecting,
            NodeState::Handshaking,
            NodeState::Started,
            NodeState::Stopping,
            NodeState::Closed,
            NodeState::Failed,
        ] {
            assert!(!state.can_send(), "{state} must not accept data");
        }
        assert!(NodeState::Running.can_send());
    }

    #[test]
    fn test_terminal_and_active_are_disjoint() {
        for state in [
            NodeState::Invalid,
            NodeState::Connecting,
            NodeState::Running,
            NodeState::Stopping,
            NodeState::Closed,
            NodeState::Cancelled,
            NodeState::Destroyed,
        ] {
            assert!(!(state.is_terminal() && state.is_active()));
        }
    }
}
