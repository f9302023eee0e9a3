//! Dialog handles
//!
//! A dialog is the peer-to-peer relationship established by a successful
//! INVITE (RFC 3261 Section 12). It is identified by the Call-ID and the two
//! tags; this core only ever keeps one.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{CallId, Tag, Uri};

/// Locally unique dialog handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(pub Uuid);

impl DialogId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dialog state (RFC 3261 Section 12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// Created with the INVITE, no response yet
    Initial,
    /// Provisional response with a to-tag seen
    Early,
    /// 2xx sent or received
    Confirmed,
    /// BYE completed
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Initial => write!(f, "Initial"),
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Snapshot of a dialog owned by the transport stack
#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    pub id: DialogId,
    pub call_id: CallId,
    pub state: DialogState,
    pub local_tag: Option<Tag>,
    pub remote_tag: Option<Tag>,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    /// Where in-dialog requests go, taken from the peer's Contact
    pub remote_target: Uri,
    pub local_cseq: u32,
    /// We sent the INVITE
    pub is_initiator: bool,
}

impl Dialog {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == DialogState::Confirmed
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }
}
