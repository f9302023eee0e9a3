//! Call notifications for the embedding application
//!
//! ```text
//! application
//!      ↑ CallEvent
//! call agent (dispatcher / composer / reactor)
//!      ↑ StackEvent
//! transport stack
//! ```
//!
//! Notifications are best effort: a full or closed channel never blocks or
//! fails signaling, it is only logged.

use tokio::sync::mpsc;
use tracing::warn;

use crate::message::CallId;

/// Call lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// We answered an inbound INVITE with 200 OK and registered the dialog
    IncomingCallAnswered { call_id: CallId },

    /// Our INVITE was answered with 200 OK and ACKed
    CallEstablished { call_id: CallId },

    /// The dialog was torn down by a BYE in either direction
    CallTerminated { call_id: CallId, reason: String },

    /// A pending inbound INVITE was cancelled by the caller
    CallCancelled { call_id: CallId },

    /// An INVITE or BYE attempt ended without reaching its goal
    AttemptFailed { call_id: CallId, reason: String },

    /// The transport reported an I/O failure on the listening point
    TransportFailed { reason: String },
}

impl CallEvent {
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            CallEvent::IncomingCallAnswered { call_id }
            | CallEvent::CallEstablished { call_id }
            | CallEvent::CallTerminated { call_id, .. }
            | CallEvent::CallCancelled { call_id }
            | CallEvent::AttemptFailed { call_id, .. } => Some(call_id),
            CallEvent::TransportFailed { .. } => None,
        }
    }
}

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct CallEventSender {
    tx: mpsc::Sender<CallEvent>,
}

impl CallEventSender {
    pub fn new(tx: mpsc::Sender<CallEvent>) -> Self {
        Self { tx }
    }

    /// Create a sender together with its receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CallEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: CallEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping call notification: {}", e);
        }
    }
}
