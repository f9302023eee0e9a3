//! Transport Stack Interface
//!
//! The call core never touches sockets, wire syntax, timers or branch
//! bookkeeping. It drives an external SIP stack through [`TransportStack`]
//! and consumes what the stack observes as [`StackEvent`]s on one channel.
//!
//! ```text
//! call core ── TransportStack primitives ──► stack ──► network
//! call core ◄──────── mpsc<StackEvent> ────── stack ◄── network
//! ```
//!
//! Every primitive either succeeds synchronously or returns a
//! [`StackError`](crate::error::StackError); nothing is retried.

pub mod events;
pub mod loopback;

use async_trait::async_trait;

use crate::dialog::Dialog;
use crate::error::StackResult;
use crate::message::{CallId, Method, Request, RequestParams, Response, StatusCode};
use crate::transaction::Transaction;

pub use events::{
    RequestEvent, ResponseEvent, StackEvent, Timeout, TimeoutEvent, TransportErrorEvent,
};
pub use loopback::{LoopbackStack, Primitive, SentMessage};

/// Primitives offered by a SIP transaction/dialog stack
#[async_trait]
pub trait TransportStack: Send + Sync {
    /// Fresh, globally unique Call-ID
    fn new_call_id(&self) -> CallId;

    /// Build an out-of-dialog request
    ///
    /// # Arguments
    /// * `params` - Request-URI, headers and body of the new request
    ///
    /// # Returns
    /// The request, ready to open a client transaction with
    async fn build_request(&self, params: RequestParams) -> StackResult<Request>;

    /// Build a response to `request`, adding the local to-tag when needed
    async fn build_response(&self, status: StatusCode, request: &Request) -> StackResult<Response>;

    /// Create a client transaction; assigns the Via branch
    async fn open_client_transaction(&self, request: Request) -> StackResult<Transaction>;

    /// Create, or return the existing, server transaction for an inbound request
    async fn open_server_transaction(&self, request: &Request) -> StackResult<Transaction>;

    /// Create, or return the existing, dialog for an INVITE transaction
    async fn open_dialog(&self, transaction: &Transaction) -> StackResult<Dialog>;

    /// Build an in-dialog request, consuming the next local CSeq
    async fn create_request(&self, dialog: &Dialog, method: Method) -> StackResult<Request>;

    /// Build a CANCEL client transaction for a pending INVITE client transaction
    async fn create_cancel(&self, transaction: &Transaction) -> StackResult<Transaction>;

    /// Send the request of a client transaction
    async fn send_request(&self, transaction: &Transaction) -> StackResult<()>;

    /// Send a response on a server transaction
    async fn send_response(&self, transaction: &Transaction, response: Response) -> StackResult<()>;

    /// Send the request of a client transaction through a dialog
    async fn send_in_dialog(&self, dialog: &Dialog, transaction: &Transaction) -> StackResult<()>;

    /// Send the ACK for a 2xx, with the CSeq number of that 2xx
    async fn send_ack(&self, dialog: &Dialog, cseq: u32) -> StackResult<()>;

    /// Terminate a transaction
    async fn terminate(&self, transaction: &Transaction) -> StackResult<()>;
}
