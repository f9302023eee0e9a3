//! # Event Reactor
//!
//! Handles what the stack reports asynchronously about our own requests:
//! responses to INVITE and BYE, transaction timeouts on either side, and
//! termination and transport failure notices.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dialog::{Dialog, DialogState};
use crate::error::{CallError, CallResult, StackError};
use crate::events::{CallEvent, CallEventSender};
use crate::message::{CallId, Method, Response};
use crate::registry::CallRegistry;
use crate::responder::ResponseComposer;
use crate::transaction::Transaction;
use crate::transport::{ResponseEvent, TimeoutEvent, TransportErrorEvent, TransportStack};

/// Reacts to responses, timeouts and notices from the transport stack
pub struct EventReactor {
    stack: Arc<dyn TransportStack>,
    registry: Arc<CallRegistry>,
    responder: Arc<ResponseComposer>,
    events: CallEventSender,
}

impl EventReactor {
    pub fn new(
        stack: Arc<dyn TransportStack>,
        registry: Arc<CallRegistry>,
        responder: Arc<ResponseComposer>,
        events: CallEventSender,
    ) -> Self {
        Self {
            stack,
            registry,
            responder,
            events,
        }
    }

    /// Response to one of our client transactions.
    ///
    /// Only the first final response of a registered transaction has any
    /// effect; retransmissions find nothing registered and are ignored.
    pub async fn on_response(&self, event: ResponseEvent) -> CallResult<()> {
        let ResponseEvent {
            response,
            client_transaction,
            dialog,
        } = event;
        let status = response.status;
        let method = client_transaction.method().clone();
        let call_id = response.call_id.clone();

        if status.is_provisional() {
            debug!("{} for {} on call {}", status, method, call_id);
            return Ok(());
        }

        let _guard = self.registry.lock(&call_id).await;

        if !self
            .registry
            .remove_transaction_if(&call_id, &client_transaction.id)
        {
            debug!(
                "Ignoring {} for {} on call {}: transaction no longer registered",
                status, method, call_id
            );
            return Ok(());
        }

        if !status.is_success() {
            warn!("{} for {} on call {}", status, method, call_id);
            self.events.emit(CallEvent::AttemptFailed {
                call_id,
                reason: status.to_string(),
            });
            return Ok(());
        }

        match method {
            Method::Invite => self.on_invite_answered(&call_id, &response, dialog).await,
            Method::Bye => {
                self.registry.remove(&call_id);
                info!("Call {} terminated", call_id);
                self.events.emit(CallEvent::CallTerminated {
                    call_id,
                    reason: "local hangup".to_string(),
                });
                Ok(())
            }
            other => {
                debug!("{} for {} on call {}", status, other, call_id);
                Ok(())
            }
        }
    }

    async fn on_invite_answered(
        &self,
        call_id: &CallId,
        response: &Response,
        dialog: Option<Dialog>,
    ) -> CallResult<()> {
        let Some(mut dialog) = dialog else {
            let err = StackError::Dialog(format!("no dialog for answered call {}", call_id));
            return self.fail_attempt(call_id, err.into());
        };

        if let Err(e) = self.stack.send_ack(&dialog, response.cseq.seq).await {
            return self.fail_attempt(call_id, e.into());
        }

        dialog.state = DialogState::Confirmed;
        self.registry.establish(call_id, dialog);
        info!("Call {} established", call_id);
        self.events.emit(CallEvent::CallEstablished {
            call_id: call_id.clone(),
        });
        Ok(())
    }

    fn fail_attempt(&self, call_id: &CallId, err: CallError) -> CallResult<()> {
        error!("Call {} failed: {}", call_id, err);
        self.events.emit(CallEvent::AttemptFailed {
            call_id: call_id.clone(),
            reason: err.to_string(),
        });
        Err(err)
    }

    /// A transaction timed out. Server side answers 408; client side cancels
    /// a transaction that has not completed yet. Either way the entry goes.
    pub async fn on_timeout(&self, event: TimeoutEvent) -> CallResult<()> {
        let transaction = &event.transaction;
        let call_id = transaction.call_id().clone();
        let _guard = self.registry.lock(&call_id).await;

        if transaction.is_server() {
            let result = self.responder.respond_to_timeout(&event).await;
            self.registry.remove_transaction_if(&call_id, &transaction.id);
            return match result {
                Ok(method) => {
                    info!("Answered timed out {} on call {} with 408", method, call_id);
                    Ok(())
                }
                Err(e) => {
                    error!("Could not answer timeout on call {}: {}", call_id, e);
                    Err(e)
                }
            };
        }

        warn!(
            "{} timeout on {} for call {} in state {}",
            event.timeout,
            transaction.method(),
            call_id,
            transaction.state
        );
        let result = if transaction.state.is_pre_completion() {
            self.cancel(transaction).await
        } else {
            Ok(())
        };
        self.registry.remove_transaction_if(&call_id, &transaction.id);
        self.events.emit(CallEvent::AttemptFailed {
            call_id: call_id.clone(),
            reason: format!("{} timed out", transaction.method()),
        });

        if let Err(e) = &result {
            error!("Could not cancel timed out transaction on call {}: {}", call_id, e);
        }
        result
    }

    async fn cancel(&self, transaction: &Transaction) -> CallResult<()> {
        let cancel = self.stack.create_cancel(transaction).await?;
        self.stack.send_request(&cancel).await?;
        debug!("Sent CANCEL for {}", transaction.id);
        Ok(())
    }

    pub fn on_transaction_terminated(&self, transaction: &Transaction) {
        debug!(
            "Transaction terminated: {} {} in state {}",
            transaction.method(),
            transaction.id.branch,
            transaction.state
        );
    }

    pub fn on_dialog_terminated(&self, dialog: &Dialog) {
        debug!(
            "Dialog terminated: call {} in state {} (local tag {:?}, remote tag {:?})",
            dialog.call_id,
            dialog.state,
            dialog.local_tag.as_ref().map(|tag| tag.as_str()),
            dialog.remote_tag.as_ref().map(|tag| tag.as_str())
        );
    }

    pub fn on_transport_error(&self, event: &TransportErrorEvent) {
        error!(
            "Transport failure on {}:{} ({}): {}",
            event.host, event.port, event.transport, event.message
        );
        self.events.emit(CallEvent::TransportFailed {
            reason: event.to_string(),
        });
    }
}
