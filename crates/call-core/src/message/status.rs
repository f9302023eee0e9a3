use std::fmt;

use serde::{Deserialize, Serialize};

/// SIP response status codes used by the call-control core.
///
/// Only the codes the state machine emits or reacts to get their own
/// variant; everything else is carried as [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// 100 Trying
    Trying,
    /// 180 Ringing
    Ringing,
    /// 200 OK
    Ok,
    /// 202 Accepted
    Accepted,
    /// 408 Request Timeout
    RequestTimeout,
    /// 481 Call/Transaction Does Not Exist
    CallOrTransactionDoesNotExist,
    /// 486 Busy Here
    BusyHere,
    /// 487 Request Terminated
    RequestTerminated,
    /// 491 Request Pending
    RequestPending,
    /// Any other code
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            200 => StatusCode::Ok,
            202 => StatusCode::Accepted,
            408 => StatusCode::RequestTimeout,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            491 => StatusCode::RequestPending,
            other => StatusCode::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::Ok => 200,
            StatusCode::Accepted => 202,
            StatusCode::RequestTimeout => 408,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::RequestPending => 491,
            StatusCode::Other(code) => *code,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::Ok => "OK",
            StatusCode::Accepted => "Accepted",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::BusyHere => "Busy Here",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::RequestPending => "Request Pending",
            StatusCode::Other(code) => match code {
                101..=199 => "Session Progress",
                201..=299 => "Success",
                300..=399 => "Redirection",
                400..=499 => "Client Error",
                500..=599 => "Server Error",
                600..=699 => "Global Failure",
                _ => "Unknown",
            },
        }
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// 200-699, ends the transaction
    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_u16(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}
