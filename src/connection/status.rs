//! Status change notifications

use seller_socket_shared::state_machine::ConnectionStatus;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// One observed status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// Connect cycle the transition belongs to
    pub generation: u64,
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

/// Ordered stream of status transitions.
///
/// Dropping the subscription unsubscribes.
pub struct StatusSubscription {
    rx: broadcast::Receiver<StatusChange>,
}

impl StatusSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<StatusChange>) -> Self {
        Self { rx }
    }

    /// Wait for the next transition. `None` once the manager is gone.
    pub async fn next(&mut self) -> Option<StatusChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status subscriber lagged, transitions dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take a transition that has already happened, without waiting
    pub fn try_next(&mut self) -> Option<StatusChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status subscriber lagged, transitions dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
