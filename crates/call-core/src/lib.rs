//! Single-call SIP call-control core for the rvoip stack
//!
//! This crate establishes, answers and tears down one SIP dialog at a time
//! using the INVITE / ACK / BYE / CANCEL exchange. It decides which
//! responses to send, which transaction or dialog a message belongs to, how
//! to arbitrate races between requests for the same call, and how to recover
//! from timeouts. Sockets, wire syntax, retransmissions and timers belong to
//! the transport stack behind [`TransportStack`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  Application                  │
//! └───────────────┬───────────────────▲───────────┘
//!        invite / hangup          CallEvent
//! ┌───────────────▼───────────────────┴───────────┐
//! │                   CallAgent                   │
//! │  OutboundInitiator   RequestDispatcher        │
//! │  EventReactor        ResponseComposer         │
//! │                 CallRegistry                  │
//! └───────────────┬───────────────────▲───────────┘
//!          primitives             StackEvent
//! ┌───────────────▼───────────────────┴───────────┐
//! │        TransportStack (e.g. LoopbackStack)    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_call_core::{CallAgent, CallConfig, LoopbackStack};
//!
//! # async fn example() -> rvoip_call_core::CallResult<()> {
//! let config = CallConfig::default();
//! let (stack, stack_events) = LoopbackStack::new(config.local_addr());
//! let (agent, mut calls) = CallAgent::new(config, stack)?;
//! let _loop = agent.start(stack_events);
//!
//! let call_id = agent.invite("bob@127.0.0.1:5080").await?;
//! while let Some(event) = calls.recv().await {
//!     println!("{:?}", event);
//! }
//! agent.hangup(&call_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod dialog;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod initiator;
pub mod message;
pub mod reactor;
pub mod registry;
pub mod responder;
pub mod sdp;
pub mod transaction;
pub mod transport;

pub use agent::CallAgent;
pub use config::CallConfig;
pub use dialog::{Dialog, DialogId, DialogState};
pub use error::{CallError, CallResult, StackError, StackResult};
pub use events::{CallEvent, CallEventSender};
pub use message::{CallId, Method, Request, Response, StatusCode};
pub use registry::{Admission, CallGuard, CallRegistry};
pub use transaction::{Transaction, TransactionKey, TransactionKind, TransactionState};
pub use transport::{LoopbackStack, StackEvent, TransportStack};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Admission, CallAgent, CallConfig, CallError, CallEvent, CallId, CallRegistry,
        CallResult, Dialog, DialogState, LoopbackStack, Method, Request, Response,
        StackError, StackEvent, StatusCode, Transaction, TransactionKey, TransactionState,
        TransportStack,
    };
}
