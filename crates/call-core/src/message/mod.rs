//! SIP message value objects
//!
//! Requests and responses are immutable values handed to and received from
//! the transport stack. The core never parses or serializes wire text itself.

pub mod headers;
pub mod method;
pub mod request;
pub mod status;

pub use headers::{CSeq, CallId, NameAddr, Tag, TransportProtocol, Uri, Via};
pub use method::Method;
pub use request::{Body, Request, RequestParams, Response};
pub use status::StatusCode;
