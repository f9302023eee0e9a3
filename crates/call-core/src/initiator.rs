//! # Outbound Initiator
//!
//! Originates the two requests the local user can trigger: the INVITE that
//! places a call and the BYE that ends it. Neither leaves a registry entry
//! behind when the stack fails to build, open or send.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::message::{CSeq, CallId, Method, NameAddr, RequestParams, Tag, Uri, Via};
use crate::registry::CallRegistry;
use crate::sdp;
use crate::transport::TransportStack;

/// Sends locally originated INVITE and BYE requests
pub struct OutboundInitiator {
    stack: Arc<dyn TransportStack>,
    registry: Arc<CallRegistry>,
    config: Arc<CallConfig>,
}

impl OutboundInitiator {
    pub fn new(
        stack: Arc<dyn TransportStack>,
        registry: Arc<CallRegistry>,
        config: Arc<CallConfig>,
    ) -> Self {
        Self {
            stack,
            registry,
            config,
        }
    }

    /// Place a call to `target` (`user@host` or `user@host:port`)
    ///
    /// # Returns
    /// The Call-ID of the new call
    pub async fn request_invite(&self, target: &str) -> CallResult<CallId> {
        let remote = Uri::parse_target(target, self.config.default_remote_port)?;
        if self.registry.has_dialog() || self.registry.has_pending_invite() {
            warn!("Not calling {}: a call is already in progress", remote);
            return Err(CallError::CallInProgress);
        }

        let call_id = self.stack.new_call_id();
        let _guard = self.registry.lock(&call_id).await;

        match self.send_invite(&call_id, remote.clone()).await {
            Ok(()) => {
                info!("Calling {} (call {})", remote, call_id);
                Ok(call_id)
            }
            Err(e) => {
                error!("Could not call {}: {}", remote, e);
                Err(e)
            }
        }
    }

    async fn send_invite(&self, call_id: &CallId, remote: Uri) -> CallResult<()> {
        let config = &self.config;
        let params = RequestParams {
            method: Method::Invite,
            request_uri: remote.clone(),
            call_id: call_id.clone(),
            cseq: CSeq::new(1, Method::Invite),
            from: NameAddr::new(config.contact_uri()).with_tag(Tag::random()),
            to: NameAddr::new(remote),
            via: vec![Via::new(
                config.transport,
                config.bind_ip.to_string(),
                config.bind_port,
            )],
            max_forwards: config.max_forwards,
            contact: Some(config.contact_uri()),
            body: Some(sdp::session_body()),
        };

        let request = self.stack.build_request(params).await?;
        let transaction = self.stack.open_client_transaction(request).await?;
        self.stack.open_dialog(&transaction).await?;

        if !self
            .registry
            .admit_outbound_invite(call_id, transaction.clone())
        {
            return Err(CallError::CallInProgress);
        }

        if let Err(e) = self.stack.send_request(&transaction).await {
            self.registry.remove_transaction_if(call_id, &transaction.id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Hang up the established call `call_id`
    pub async fn request_bye(&self, call_id: &CallId) -> CallResult<()> {
        let _guard = self.registry.lock(call_id).await;

        let Some(dialog) = self.registry.dialog(call_id) else {
            warn!("No dialog for call {}, not sending BYE", call_id);
            return Err(CallError::DialogNotFound(call_id.clone()));
        };

        let request = self.stack.create_request(&dialog, Method::Bye).await?;
        let transaction = self.stack.open_client_transaction(request).await?;

        if !self
            .registry
            .register_transaction(call_id, transaction.clone())
        {
            warn!("Call {} has a transaction in progress, not sending BYE", call_id);
            return Err(CallError::TransactionPending(call_id.clone()));
        }

        if let Err(e) = self.stack.send_in_dialog(&dialog, &transaction).await {
            error!("Could not send BYE for call {}: {}", call_id, e);
            self.registry.remove_transaction_if(call_id, &transaction.id);
            return Err(e.into());
        }

        debug!("Sent BYE for call {}", call_id);
        Ok(())
    }
}
