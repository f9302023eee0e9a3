//! Events delivered by the transport stack

use std::fmt;

use crate::dialog::Dialog;
use crate::message::{CallId, Request, Response, TransportProtocol};
use crate::transaction::Transaction;

/// Inbound request
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request: Request,
    /// Server transaction, when the stack already created one
    pub server_transaction: Option<Transaction>,
    /// Dialog the request belongs to, when the stack matched one
    pub dialog: Option<Dialog>,
}

impl RequestEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            server_transaction: None,
            dialog: None,
        }
    }

    pub fn with_server_transaction(mut self, transaction: Transaction) -> Self {
        self.server_transaction = Some(transaction);
        self
    }

    pub fn with_dialog(mut self, dialog: Dialog) -> Self {
        self.dialog = Some(dialog);
        self
    }
}

/// Inbound response matched to one of our client transactions
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub response: Response,
    pub client_transaction: Transaction,
    pub dialog: Option<Dialog>,
}

/// Which timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Retransmission timer (A, E, G)
    Retransmit,
    /// Transaction timer (B, F, H)
    Transaction,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Retransmit => write!(f, "retransmit"),
            Timeout::Transaction => write!(f, "transaction"),
        }
    }
}

/// A transaction timed out; either side
#[derive(Debug, Clone)]
pub struct TimeoutEvent {
    pub transaction: Transaction,
    pub timeout: Timeout,
}

impl TimeoutEvent {
    pub fn is_server(&self) -> bool {
        self.transaction.is_server()
    }
}

/// I/O failure on the listening point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportErrorEvent {
    pub host: String,
    pub port: u16,
    pub transport: TransportProtocol,
    pub message: String,
}

impl fmt::Display for TransportErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}: {}",
            self.transport, self.host, self.port, self.message
        )
    }
}

/// Everything the stack reports to the call core
#[derive(Debug, Clone)]
pub enum StackEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Timeout(TimeoutEvent),
    TransactionTerminated(Transaction),
    DialogTerminated(Dialog),
    TransportError(TransportErrorEvent),
}

impl StackEvent {
    /// Call-ID the event concerns, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            StackEvent::Request(event) => Some(&event.request.call_id),
            StackEvent::Response(event) => Some(&event.response.call_id),
            StackEvent::Timeout(event) => Some(event.transaction.call_id()),
            StackEvent::TransactionTerminated(transaction) => Some(transaction.call_id()),
            StackEvent::DialogTerminated(dialog) => Some(&dialog.call_id),
            StackEvent::TransportError(_) => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            StackEvent::Request(_) => "request",
            StackEvent::Response(_) => "response",
            StackEvent::Timeout(_) => "timeout",
            StackEvent::TransactionTerminated(_) => "transaction-terminated",
            StackEvent::DialogTerminated(_) => "dialog-terminated",
            StackEvent::TransportError(_) => "transport-error",
        }
    }
}
