//! # Transaction handles
//!
//! A [`Transaction`] is the core's snapshot of one request/response exchange
//! owned by the transport stack. The stack runs the actual state machines and
//! timers; the core keeps the handle in the registry to find the original
//! request again (for CANCEL, 4xx rejections and timeouts) and to decide
//! whether a timed-out client transaction still needs cancelling.
//!
//! ## RFC 3261 Context
//!
//! RFC 3261 defines four transaction state machines:
//! - INVITE client transactions (Section 17.1.1)
//! - Non-INVITE client transactions (Section 17.1.2)
//! - INVITE server transactions (Section 17.2.1)
//! - Non-INVITE server transactions (Section 17.2.2)
//!
//! Transactions are identified by the branch of the top Via, the method and
//! the side of the exchange (Section 17.1.3 / 17.2.3), which is what
//! [`TransactionKey`] carries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{CallId, Method, Request};

/// Identity of a transaction inside the transport stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    /// Branch parameter of the top Via
    pub branch: String,
    /// Method of the request that created the transaction
    pub method: Method,
    /// UAS side of the exchange
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "{}:{}:{}", self.branch, self.method, side)
    }
}

/// Which of the four RFC 3261 state machines drives the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn for_request(method: &Method, is_server: bool) -> Self {
        match (method.is_invite(), is_server) {
            (true, false) => TransactionKind::InviteClient,
            (false, false) => TransactionKind::NonInviteClient,
            (true, true) => TransactionKind::InviteServer,
            (false, true) => TransactionKind::NonInviteServer,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, TransactionKind::InviteServer | TransactionKind::NonInviteServer)
    }
}

/// Transaction state, shared by all four machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created, nothing sent or received yet
    Initial,
    /// INVITE client: request sent, waiting for any response
    Calling,
    /// Non-INVITE: request sent or received, no final response yet
    Trying,
    /// Provisional response sent or received
    Proceeding,
    /// Final response sent or received
    Completed,
    /// INVITE server: ACK received for a non-2xx final
    Confirmed,
    /// Finished, no further messages accepted
    Terminated,
}

impl TransactionState {
    /// No final response has been seen yet
    pub fn is_pre_completion(&self) -> bool {
        matches!(
            self,
            TransactionState::Calling | TransactionState::Trying | TransactionState::Proceeding
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Initial => "Initial",
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Snapshot of a transaction owned by the transport stack
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TransactionKey,
    pub kind: TransactionKind,
    /// The request that created the transaction
    pub request: Request,
    /// Last known state
    pub state: TransactionState,
}

impl Transaction {
    pub fn new(id: TransactionKey, request: Request, state: TransactionState) -> Self {
        let kind = TransactionKind::for_request(&id.method, id.is_server);
        Self {
            id,
            kind,
            request,
            state,
        }
    }

    pub fn id(&self) -> &TransactionKey {
        &self.id
    }

    pub fn method(&self) -> &Method {
        &self.id.method
    }

    pub fn is_server(&self) -> bool {
        self.id.is_server
    }

    pub fn call_id(&self) -> &CallId {
        &self.request.call_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }
}
