//! # Request Dispatcher
//!
//! Routes every inbound request by method and by what the registry knows
//! about its Call-ID.
//!
//! | Method  | Registry state                    | Outcome                              |
//! |---------|-----------------------------------|--------------------------------------|
//! | INVITE  | INVITE pending for this Call-ID   | 491 Request Pending                  |
//! | INVITE  | dialog established / call pending | 486 Busy Here                        |
//! | INVITE  | idle                              | register, 100 / 180 / 200, dialog    |
//! | ACK     | any                               | nothing                              |
//! | BYE     | any                               | register, then 200 or 481            |
//! | CANCEL  | any                               | 487 + 200, or 481                    |
//! | MESSAGE | dialog established                | 202 Accepted                         |
//! | MESSAGE | no dialog                         | nothing                              |
//! | other   | any                               | logged                               |

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::dialog::Dialog;
use crate::error::CallResult;
use crate::message::{CallId, Method, Request, StatusCode};
use crate::registry::{Admission, CallRegistry};
use crate::responder::ResponseComposer;
use crate::transaction::Transaction;
use crate::transport::{RequestEvent, TransportStack};

/// Entry point for inbound requests
pub struct RequestDispatcher {
    stack: Arc<dyn TransportStack>,
    registry: Arc<CallRegistry>,
    responder: Arc<ResponseComposer>,
}

impl RequestDispatcher {
    pub fn new(
        stack: Arc<dyn TransportStack>,
        registry: Arc<CallRegistry>,
        responder: Arc<ResponseComposer>,
    ) -> Self {
        Self {
            stack,
            registry,
            responder,
        }
    }

    /// Handle one inbound request while holding its Call-ID guard
    pub async fn dispatch(&self, event: RequestEvent) -> CallResult<()> {
        let RequestEvent {
            request,
            server_transaction,
            dialog,
        } = event;
        let call_id = request.call_id.clone();
        let _guard = self.registry.lock(&call_id).await;

        debug!("Dispatching {} for call {}", request.method, call_id);

        if request.method == Method::Ack {
            debug!(
                "ACK {} for call {} (dialog known: {})",
                request.cseq.seq,
                call_id,
                dialog.is_some()
            );
            return Ok(());
        }

        let transaction = match server_transaction {
            Some(transaction) => transaction,
            None => match self.stack.open_server_transaction(&request).await {
                Ok(transaction) => transaction,
                Err(e) => {
                    error!(
                        "Could not open server transaction for {} on call {}: {}",
                        request.method, call_id, e
                    );
                    return Err(e.into());
                }
            },
        };

        let result = match &request.method {
            Method::Invite => self.dispatch_invite(&request, &transaction, dialog).await,
            Method::Bye => self.dispatch_bye(&request, &transaction, &call_id).await,
            Method::Cancel => {
                self.responder
                    .respond_to_cancel(&request, &transaction, &call_id)
                    .await
            }
            Method::Message => self.dispatch_message(&request, &transaction, &call_id).await,
            other => {
                warn!("Ignoring unrecognized request {} for call {}", other, call_id);
                Ok(())
            }
        };

        // BYE entries are cleaned up by the BYE flow itself
        if request.method != Method::Bye {
            self.registry.remove_transaction_if(&call_id, &transaction.id);
        }

        if let Err(e) = &result {
            error!("Handling {} for call {} failed: {}", request.method, call_id, e);
        }
        result
    }

    async fn dispatch_invite(
        &self,
        request: &Request,
        transaction: &Transaction,
        dialog: Option<Dialog>,
    ) -> CallResult<()> {
        match self.registry.admit_invite(&request.call_id, transaction.clone()) {
            Admission::Admitted => {
                self.responder
                    .respond_to_invite(request, transaction, dialog)
                    .await
            }
            Admission::Pending => {
                self.responder
                    .respond_with_4xx(transaction, StatusCode::RequestPending)
                    .await
            }
            Admission::Busy => {
                self.responder
                    .respond_with_4xx(transaction, StatusCode::BusyHere)
                    .await
            }
        }
    }

    async fn dispatch_bye(
        &self,
        request: &Request,
        transaction: &Transaction,
        call_id: &CallId,
    ) -> CallResult<()> {
        if !self.registry.register_transaction(call_id, transaction.clone()) {
            debug!("Call {} already has a transaction registered, answering BYE anyway", call_id);
        }
        self.responder.respond_to_bye(request, transaction, call_id).await
    }

    async fn dispatch_message(
        &self,
        request: &Request,
        transaction: &Transaction,
        call_id: &CallId,
    ) -> CallResult<()> {
        if !self.registry.has_dialog() {
            debug!("MESSAGE for call {} outside a call, not answering", call_id);
            return Ok(());
        }
        self.responder
            .respond_non_invite(request, transaction, StatusCode::Accepted)
            .await
    }
}
