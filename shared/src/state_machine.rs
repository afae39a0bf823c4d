//! Connection Status State Machine
//!
//! Defines the observable status transitions of one connection cycle:
//! `Disconnected -> Connecting -> Connected -> Disconnected`.

use std::fmt;

/// Observable status of the real-time channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Caller asked for a new connection
    ConnectRequested,
    /// Transport acknowledged the connection
    Acknowledged,
    /// Transport reported the link gone (refused, dropped, closed by server)
    LinkLost,
    /// Caller asked to tear the connection down
    DisconnectRequested,
}

/// Result of a transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Status changed to the contained value
    Changed {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    /// Event accepted, status already where it needs to be
    Unchanged(ConnectionStatus),
    /// Event is not valid in the current status
    Invalid {
        from: ConnectionStatus,
        event: LifecycleEvent,
    },
}

/// Status state machine for one connection manager
#[derive(Debug, Default)]
pub struct StatusMachine {
    current: ConnectionStatus,
}

impl StatusMachine {
    /// Create a new state machine in `Disconnected`
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current status
    pub fn status(&self) -> ConnectionStatus {
        self.current
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        use ConnectionStatus::*;
        use LifecycleEvent::*;

        let next = match (self.current, event) {
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, Acknowledged) => Some(Connected),

            // A failed handshake reverts, a live link drops
            (Connecting | Connected, LinkLost) => Some(Disconnected),
            (Connecting | Connected, DisconnectRequested) => Some(Disconnected),

            // Nothing to tear down
            (Disconnected, LinkLost | DisconnectRequested) => {
                return TransitionResult::Unchanged(Disconnected)
            }

            // A new cycle must tear the current one down first
            _ => None,
        };

        match next {
            Some(to) => {
                let from = self.current;
                self.current = to;
                TransitionResult::Changed { from, to }
            }
            None => TransitionResult::Invalid {
                from: self.current,
                event,
            },
        }
    }
}

/// Check if a transition from one status to another may be observed
pub fn is_valid_transition(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    use ConnectionStatus::*;

    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Disconnected)
    )
}
