//! # Call Agent
//!
//! Owns the registry and the four services and runs the single consumer loop
//! over the transport stack's events.
//!
//! ```text
//!                 ┌──────────────── CallAgent ─────────────────┐
//!  invite() ────► │ OutboundInitiator ──────────┐              │
//!  hangup() ────► │                             ▼              │
//!                 │                        CallRegistry        │
//!  StackEvent ──► │ run() ─┬─► RequestDispatcher ─► Composer   │ ──► CallEvent
//!                 │        └─► EventReactor ─────► Composer    │
//!                 └────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, info, warn};

use crate::config::CallConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::CallResult;
use crate::events::{CallEvent, CallEventSender};
use crate::initiator::OutboundInitiator;
use crate::message::CallId;
use crate::reactor::EventReactor;
use crate::registry::CallRegistry;
use crate::responder::ResponseComposer;
use crate::transport::{StackEvent, TransportStack};

/// A single-call SIP user agent on top of a [`TransportStack`]
pub struct CallAgent {
    config: Arc<CallConfig>,
    registry: Arc<CallRegistry>,
    dispatcher: RequestDispatcher,
    reactor: EventReactor,
    initiator: OutboundInitiator,
    shutdown: Notify,
}

impl CallAgent {
    /// Create an agent and the receiver of its call notifications
    pub fn new(
        config: CallConfig,
        stack: Arc<dyn TransportStack>,
    ) -> CallResult<(Arc<Self>, mpsc::Receiver<CallEvent>)> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(CallRegistry::new());
        let (events, rx) = CallEventSender::channel(config.event_capacity);

        let responder = Arc::new(ResponseComposer::new(
            Arc::clone(&stack),
            Arc::clone(&registry),
            events.clone(),
        ));
        let dispatcher = RequestDispatcher::new(
            Arc::clone(&stack),
            Arc::clone(&registry),
            Arc::clone(&responder),
        );
        let reactor = EventReactor::new(
            Arc::clone(&stack),
            Arc::clone(&registry),
            responder,
            events,
        );
        let initiator = OutboundInitiator::new(stack, Arc::clone(&registry), Arc::clone(&config));

        let agent = Arc::new(Self {
            config,
            registry,
            dispatcher,
            reactor,
            initiator,
            shutdown: Notify::new(),
        });
        Ok((agent, rx))
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Place a call; see [`OutboundInitiator::request_invite`]
    pub async fn invite(&self, target: &str) -> CallResult<CallId> {
        self.initiator.request_invite(target).await
    }

    /// End an established call with BYE
    pub async fn hangup(&self, call_id: &CallId) -> CallResult<()> {
        self.initiator.request_bye(call_id).await
    }

    /// Route one stack event to the dispatcher or the reactor
    pub async fn handle_event(&self, event: StackEvent) -> CallResult<()> {
        let span = debug_span!(
            "stack_event",
            kind = event.kind(),
            call_id = event.call_id().map(|id| id.as_str()).unwrap_or("-")
        );

        async move {
            match event {
                StackEvent::Request(request) => self.dispatcher.dispatch(request).await,
                StackEvent::Response(response) => self.reactor.on_response(response).await,
                StackEvent::Timeout(timeout) => self.reactor.on_timeout(timeout).await,
                StackEvent::TransactionTerminated(transaction) => {
                    self.reactor.on_transaction_terminated(&transaction);
                    Ok(())
                }
                StackEvent::DialogTerminated(dialog) => {
                    self.reactor.on_dialog_terminated(&dialog);
                    Ok(())
                }
                StackEvent::TransportError(error) => {
                    self.reactor.on_transport_error(&error);
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Consume stack events until shutdown, a transport failure or the
    /// channel closing. Errors of single events are logged and skipped.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<StackEvent>) {
        info!("Call agent for {} started", self.config.contact_uri());

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Stack event channel closed");
                        break;
                    };
                    let fatal = matches!(event, StackEvent::TransportError(_));
                    if let Err(e) = self.handle_event(event).await {
                        warn!("Stack event failed: {}", e);
                    }
                    if fatal {
                        warn!("Stopping call agent after transport failure");
                        break;
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!("Shutdown requested");
                    break;
                }
            }
        }

        info!("Call agent for {} stopped", self.config.contact_uri());
    }

    /// Spawn [`CallAgent::run`] on the current runtime
    pub fn start(self: &Arc<Self>, events: mpsc::Receiver<StackEvent>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(events))
    }

    /// Stop the event loop
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
