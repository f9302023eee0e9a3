//! Error types for the call-control core
//!
//! [`StackError`] is what the transport stack reports when one of its
//! primitives fails. [`CallError`] is what the core hands back to local
//! callers; stack failures are wrapped unchanged.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::CallId;

/// Result type for transport stack primitives
pub type StackResult<T> = Result<T, StackError>;

/// Result type for call-control operations
pub type CallResult<T> = Result<T, CallError>;

/// Failure of a transport stack primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// A request or response could not be constructed
    #[error("Failed to build message: {0}")]
    Build(String),

    /// A client or server transaction could not be created
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A dialog could not be created or looked up
    #[error("Dialog error: {0}")]
    Dialog(String),

    /// The message could not be handed to the network
    #[error("Failed to send message: {0}")]
    Send(String),

    /// The transaction has already been terminated
    #[error("Transaction terminated: {0}")]
    Terminated(String),

    /// The stack is shut down
    #[error("Transport stack closed")]
    Closed,
}

/// Errors returned by the call-control core
#[derive(Error, Debug)]
pub enum CallError {
    /// A stack primitive failed; the attempt is abandoned
    #[error("Transport stack error: {0}")]
    Stack(#[from] StackError),

    /// No established dialog for this Call-ID
    #[error("No dialog for call {0}")]
    DialogNotFound(CallId),

    /// Another transaction is still registered for this Call-ID
    #[error("Transaction already pending for call {0}")]
    TransactionPending(CallId),

    /// The single-call policy refuses a second call
    #[error("A call is already in progress")]
    CallInProgress,

    /// The dial target could not be turned into a SIP URI
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Rejected configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event or notification channel closed
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallError {
    /// True when the transport stack failed to build, open or send something
    pub fn is_construction_failure(&self) -> bool {
        matches!(self, CallError::Stack(_))
    }
}

impl<T> From<mpsc::error::SendError<T>> for CallError {
    fn from(_err: mpsc::error::SendError<T>) -> Self {
        CallError::ChannelClosed
    }
}
