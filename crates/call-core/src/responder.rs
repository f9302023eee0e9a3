//! # Response Composer
//!
//! Builds and sends every response the core produces on the UAS side and
//! keeps the registry in step with what was sent.
//!
//! ## INVITE server flow
//!
//! ```text
//!            100            180             200           promote
//!   Idle ─────────► Trying ──────► Ringing ──────► Answered ───────► Established
//!    │                 │              │
//!    │ 491 / 486       └──────┬───────┘
//!    ▼                        │ CANCEL: 487
//!  Rejected                   ▼
//!                         Terminated
//! ```
//!
//! The whole flow runs under the Call-ID guard, so a CANCEL for the same call
//! is only looked at once the flow has finished.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dialog::{Dialog, DialogState};
use crate::error::{CallError, CallResult};
use crate::events::{CallEvent, CallEventSender};
use crate::message::{CallId, Method, Request, StatusCode};
use crate::registry::{Admission, CallRegistry};
use crate::sdp;
use crate::transaction::Transaction;
use crate::transport::{TimeoutEvent, TransportStack};

/// Progress of an inbound INVITE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteServerState {
    Idle,
    Trying,
    Ringing,
    Answered,
    Established,
    Rejected,
    Terminated,
}

impl fmt::Display for InviteServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InviteServerState::Idle => "Idle",
            InviteServerState::Trying => "Trying",
            InviteServerState::Ringing => "Ringing",
            InviteServerState::Answered => "Answered",
            InviteServerState::Established => "Established",
            InviteServerState::Rejected => "Rejected",
            InviteServerState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

fn advance(call_id: &CallId, from: InviteServerState, to: InviteServerState) -> InviteServerState {
    debug!("INVITE server {}: {} -> {}", call_id, from, to);
    to
}

/// Sends responses on server transactions
pub struct ResponseComposer {
    stack: Arc<dyn TransportStack>,
    registry: Arc<CallRegistry>,
    events: CallEventSender,
}

impl ResponseComposer {
    pub fn new(
        stack: Arc<dyn TransportStack>,
        registry: Arc<CallRegistry>,
        events: CallEventSender,
    ) -> Self {
        Self {
            stack,
            registry,
            events,
        }
    }

    /// Send a 1xx without body. Only INVITEs get provisional responses.
    pub async fn respond_provisional(
        &self,
        request: &Request,
        transaction: &Transaction,
        status: StatusCode,
    ) -> CallResult<()> {
        if !request.method.is_invite() {
            debug!("Not sending {} for {}", status, request.method);
            return Ok(());
        }
        let response = self.stack.build_response(status, request).await?;
        self.stack.send_response(transaction, response).await?;
        Ok(())
    }

    /// Send the 200 OK answering an INVITE, with our session description and
    /// the Request-URI echoed as Contact
    pub async fn respond_final_invite_ok(
        &self,
        request: &Request,
        transaction: &Transaction,
    ) -> CallResult<()> {
        if !request.method.is_invite() {
            debug!("Not sending an INVITE answer for {}", request.method);
            return Ok(());
        }
        let response = self
            .stack
            .build_response(StatusCode::Ok, request)
            .await?
            .with_body(sdp::session_body())
            .with_contact(request.uri.clone());
        self.stack.send_response(transaction, response).await?;
        Ok(())
    }

    /// Answer an admitted INVITE: 100, 180, 200, then promote the
    /// transaction entry to an established dialog.
    ///
    /// Any failure abandons the attempt and leaves no entry for the call.
    pub async fn respond_to_invite(
        &self,
        request: &Request,
        transaction: &Transaction,
        dialog: Option<Dialog>,
    ) -> CallResult<()> {
        let call_id = &request.call_id;

        let dialog = match dialog {
            Some(dialog) => dialog,
            None => match self.stack.open_dialog(transaction).await {
                Ok(dialog) => dialog,
                Err(e) => return self.abandon_invite(call_id, transaction, e.into()),
            },
        };

        let registered = self
            .registry
            .transaction(call_id)
            .is_some_and(|entry| entry.id == transaction.id);
        if !registered {
            match self.registry.admit_invite(call_id, transaction.clone()) {
                Admission::Admitted => {}
                Admission::Pending => {
                    advance(call_id, InviteServerState::Idle, InviteServerState::Rejected);
                    return self
                        .respond_with_4xx(transaction, StatusCode::RequestPending)
                        .await;
                }
                Admission::Busy => {
                    advance(call_id, InviteServerState::Idle, InviteServerState::Rejected);
                    return self.respond_with_4xx(transaction, StatusCode::BusyHere).await;
                }
            }
        }

        match self.answer_invite(request, transaction, dialog).await {
            Ok(()) => {
                info!("Answered call {}", call_id);
                self.events.emit(CallEvent::IncomingCallAnswered {
                    call_id: call_id.clone(),
                });
                Ok(())
            }
            Err(e) => self.abandon_invite(call_id, transaction, e),
        }
    }

    async fn answer_invite(
        &self,
        request: &Request,
        transaction: &Transaction,
        mut dialog: Dialog,
    ) -> CallResult<()> {
        let call_id = &request.call_id;
        let state = InviteServerState::Idle;

        self.respond_provisional(request, transaction, StatusCode::Trying).await?;
        let state = advance(call_id, state, InviteServerState::Trying);

        self.respond_provisional(request, transaction, StatusCode::Ringing).await?;
        let state = advance(call_id, state, InviteServerState::Ringing);

        self.respond_final_invite_ok(request, transaction).await?;
        let state = advance(call_id, state, InviteServerState::Answered);

        dialog.state = DialogState::Confirmed;
        self.registry.promote(call_id, dialog);
        advance(call_id, state, InviteServerState::Established);
        Ok(())
    }

    fn abandon_invite(
        &self,
        call_id: &CallId,
        transaction: &Transaction,
        err: CallError,
    ) -> CallResult<()> {
        error!("Abandoning INVITE for call {}: {}", call_id, err);
        self.registry.remove_transaction_if(call_id, &transaction.id);
        self.events.emit(CallEvent::AttemptFailed {
            call_id: call_id.clone(),
            reason: err.to_string(),
        });
        Err(err)
    }

    /// Answer a BYE: 481 without a dialog, 200 OK and teardown otherwise
    pub async fn respond_to_bye(
        &self,
        request: &Request,
        transaction: &Transaction,
        call_id: &CallId,
    ) -> CallResult<()> {
        if !self.registry.find_dialog(call_id) {
            let result = self
                .respond_with_4xx(transaction, StatusCode::CallOrTransactionDoesNotExist)
                .await;
            self.registry.remove_transaction_if(call_id, &transaction.id);
            return result;
        }

        let result = self.respond_non_invite(request, transaction, StatusCode::Ok).await;
        self.registry.remove(call_id);
        if let Err(e) = &result {
            error!("Failed to confirm BYE for call {}: {}", call_id, e);
        }
        info!("Call {} terminated by remote BYE", call_id);
        self.events.emit(CallEvent::CallTerminated {
            call_id: call_id.clone(),
            reason: "remote hangup".to_string(),
        });
        result
    }

    /// Answer a CANCEL. A pending INVITE for the Call-ID, in either role, is
    /// terminated with 487 and the CANCEL confirmed with 200 OK; otherwise the
    /// CANCEL gets 481.
    pub async fn respond_to_cancel(
        &self,
        request: &Request,
        transaction: &Transaction,
        call_id: &CallId,
    ) -> CallResult<()> {
        let Some(invite) = self.registry.pending_invite(call_id) else {
            debug!("No pending INVITE to cancel for call {}", call_id);
            return self
                .respond_with_4xx(transaction, StatusCode::CallOrTransactionDoesNotExist)
                .await;
        };

        let terminated = self.terminate_invite(&invite).await;
        self.registry.remove(call_id);
        if let Err(e) = terminated {
            error!("Failed to terminate INVITE for call {}: {}", call_id, e);
            self.events.emit(CallEvent::AttemptFailed {
                call_id: call_id.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        info!("Call {} cancelled by caller", call_id);
        self.events.emit(CallEvent::CallCancelled {
            call_id: call_id.clone(),
        });
        self.respond_non_invite(request, transaction, StatusCode::Ok).await
    }

    async fn terminate_invite(&self, invite: &Transaction) -> CallResult<()> {
        let response = self
            .stack
            .build_response(StatusCode::RequestTerminated, &invite.request)
            .await?;
        self.stack.send_response(invite, response).await?;
        if invite.is_server() {
            advance(
                invite.call_id(),
                InviteServerState::Ringing,
                InviteServerState::Terminated,
            );
        }
        self.stack.terminate(invite).await?;
        Ok(())
    }

    /// Reject the request of `transaction` and terminate the transaction
    pub async fn respond_with_4xx(
        &self,
        transaction: &Transaction,
        status: StatusCode,
    ) -> CallResult<()> {
        warn!(
            "Rejecting {} for call {} with {}",
            transaction.method(),
            transaction.call_id(),
            status
        );
        let response = self.stack.build_response(status, &transaction.request).await?;
        self.stack.send_response(transaction, response).await?;
        self.stack.terminate(transaction).await?;
        Ok(())
    }

    /// Final response without body for a non-INVITE request
    pub async fn respond_non_invite(
        &self,
        request: &Request,
        transaction: &Transaction,
        status: StatusCode,
    ) -> CallResult<()> {
        let response = self.stack.build_response(status, request).await?;
        self.stack.send_response(transaction, response).await?;
        Ok(())
    }

    /// Send 408 on a timed-out server transaction; returns the method of the
    /// request that timed out
    pub async fn respond_to_timeout(&self, event: &TimeoutEvent) -> CallResult<Method> {
        let transaction = &event.transaction;
        if !transaction.is_server() {
            return Err(CallError::Internal(format!(
                "client transaction {} has no request to answer",
                transaction.id
            )));
        }

        warn!(
            "{} timeout on {} for call {}",
            event.timeout,
            transaction.method(),
            transaction.call_id()
        );
        let response = self
            .stack
            .build_response(StatusCode::RequestTimeout, &transaction.request)
            .await?;
        self.stack.send_response(transaction, response).await?;
        Ok(transaction.method().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_server_state_display() {
        assert_eq!(InviteServerState::Idle.to_string(), "Idle");
        assert_eq!(InviteServerState::Established.to_string(), "Established");
        assert_eq!(InviteServerState::Rejected.to_string(), "Rejected");
    }
}
