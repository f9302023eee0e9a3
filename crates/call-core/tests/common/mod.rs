//! Shared helpers for the call-core integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use rvoip_call_core::message::{CSeq, NameAddr, Tag, TransportProtocol, Uri, Via};
use rvoip_call_core::sdp;
use rvoip_call_core::transport::RequestEvent;
use rvoip_call_core::{
    CallAgent, CallConfig, CallEvent, CallId, CallResult, LoopbackStack, Method, Request,
    Response, StackEvent, StatusCode,
};

pub const CALLER_PORT: u16 = 5070;
pub const CALLEE_PORT: u16 = 5080;
pub const CALLER_TAG: &str = "alice-tag";
pub const PEER_TAG: &str = "peer-tag";

/// One agent on an unlinked loopback stack
pub struct Harness {
    pub agent: Arc<CallAgent>,
    pub stack: Arc<LoopbackStack>,
    pub stack_events: mpsc::Receiver<StackEvent>,
    pub calls: mpsc::Receiver<CallEvent>,
}

impl Harness {
    /// Agent for `bob` listening on 127.0.0.1:5080
    pub fn callee() -> Self {
        Self::with_config(CallConfig::new("bob", loopback_ip(), CALLEE_PORT))
    }

    /// Agent for `alice` listening on 127.0.0.1:5070
    pub fn caller() -> Self {
        Self::with_config(CallConfig::new("alice", loopback_ip(), CALLER_PORT))
    }

    pub fn with_config(config: CallConfig) -> Self {
        init_tracing();
        let (stack, stack_events) = LoopbackStack::new(config.local_addr());
        let (agent, calls) = CallAgent::new(config, stack.clone()).expect("valid config");
        Self {
            agent,
            stack,
            stack_events,
            calls,
        }
    }

    /// Wrap an inbound request the way the stack reports it
    pub async fn inbound(&self, request: Request) -> StackEvent {
        use rvoip_call_core::TransportStack;

        let transaction = self
            .stack
            .open_server_transaction(&request)
            .await
            .expect("server transaction");
        let dialog = self.stack.dialog(&request.call_id);
        StackEvent::Request(RequestEvent {
            request,
            server_transaction: Some(transaction),
            dialog,
        })
    }

    /// Dispatch an inbound request through the agent
    pub async fn deliver(&self, request: Request) -> CallResult<()> {
        let event = self.inbound(request).await;
        self.agent.handle_event(event).await
    }

    /// Hand every queued stack event to the agent
    pub async fn pump(&mut self) -> Vec<CallResult<()>> {
        let mut results = Vec::new();
        while let Ok(event) = self.stack_events.try_recv() {
            results.push(self.agent.handle_event(event).await);
        }
        results
    }

    /// Feed a response from the peer into the stack and let the agent react
    pub async fn respond(&mut self, response: Response) -> Vec<CallResult<()>> {
        self.stack
            .receive_response(response)
            .expect("stack accepts response");
        self.pump().await
    }

    /// Call notifications emitted so far
    pub fn call_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.calls.try_recv() {
            events.push(event);
        }
        events
    }

    /// The last INVITE this agent sent
    pub fn sent_invite(&self) -> Request {
        self.stack
            .sent_requests()
            .into_iter()
            .rev()
            .find(|request| request.method == Method::Invite)
            .expect("an INVITE was sent")
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn loopback_ip() -> std::net::IpAddr {
    std::net::IpAddr::from([127, 0, 0, 1])
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(loopback_ip(), port)
}

pub fn caller_uri() -> Uri {
    Uri::new(Some("alice".into()), "127.0.0.1", Some(CALLER_PORT))
}

pub fn callee_uri() -> Uri {
    Uri::new(Some("bob".into()), "127.0.0.1", Some(CALLEE_PORT))
}

/// A request from alice to bob as it would arrive off the wire
pub fn inbound_request(method: Method, call_id: &str, branch: &str, seq: u32) -> Request {
    let is_invite = method.is_invite();
    Request {
        method: method.clone(),
        uri: callee_uri(),
        call_id: CallId::new(call_id),
        cseq: CSeq::new(seq, method),
        from: NameAddr::new(caller_uri()).with_tag(Tag::new(CALLER_TAG)),
        to: NameAddr::new(callee_uri()),
        via: vec![Via::new(TransportProtocol::Udp, "127.0.0.1", CALLER_PORT).with_branch(branch)],
        max_forwards: 70,
        contact: is_invite.then(caller_uri),
        body: is_invite.then(sdp::session_body),
    }
}

pub fn invite(call_id: &str, branch: &str) -> Request {
    inbound_request(Method::Invite, call_id, branch, 1)
}

/// CANCEL matching `invite`: same branch, Call-ID and CSeq number
pub fn cancel_for(invite: &Request) -> Request {
    let branch = invite.top_branch().expect("branch");
    inbound_request(Method::Cancel, invite.call_id.as_str(), branch, invite.cseq.seq)
}

pub fn bye(call_id: &str, branch: &str, seq: u32) -> Request {
    let mut request = inbound_request(Method::Bye, call_id, branch, seq);
    request.to = request.to.with_tag(Tag::new(PEER_TAG));
    request
}

/// A response from the peer to one of our requests
pub fn peer_response(status: StatusCode, request: &Request) -> Response {
    let mut response = Response::from_request(status, request);
    if status != StatusCode::Trying {
        response.to.tag = Some(Tag::new(PEER_TAG));
    }
    if status == StatusCode::Ok && request.method.is_invite() {
        response = response
            .with_body(sdp::session_body())
            .with_contact(request.uri.clone());
    }
    response
}

/// Wait for a call notification matching `predicate`, skipping others
pub async fn expect_call_event<F>(
    calls: &mut mpsc::Receiver<CallEvent>,
    predicate: F,
) -> CallEvent
where
    F: Fn(&CallEvent) -> bool,
{
    let wait = async {
        loop {
            let event = calls.recv().await.expect("call event channel open");
            if predicate(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("call event in time")
}
