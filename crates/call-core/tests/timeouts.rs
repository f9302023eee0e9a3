mod common;

use common::*;
use rvoip_call_core::message::Method;
use rvoip_call_core::transport::{Timeout, TimeoutEvent};
use rvoip_call_core::{CallEvent, StackEvent, StatusCode, TransactionState};

fn timeout(transaction: rvoip_call_core::Transaction) -> StackEvent {
    StackEvent::Timeout(TimeoutEvent {
        transaction,
        timeout: Timeout::Transaction,
    })
}

#[tokio::test]
async fn test_server_timeout_answers_408_and_forgets_transaction() {
    let h = Harness::callee();
    let request = invite("slow", "z9hG4bK-slow");
    let transaction = match h.inbound(request).await {
        StackEvent::Request(event) => event.server_transaction.unwrap(),
        _ => unreachable!(),
    };
    h.agent
        .registry()
        .admit_invite(&transaction.call_id().clone(), transaction.clone());

    h.agent.handle_event(timeout(transaction)).await.unwrap();

    let responses = h.stack.sent_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, StatusCode::RequestTimeout);
    assert_eq!(responses[0].cseq.method, Method::Invite);
    assert!(h.agent.registry().is_empty());
}

#[tokio::test]
async fn test_server_timeout_of_unregistered_request() {
    let h = Harness::callee();
    let request = inbound_request(Method::Message, "msg", "z9hG4bK-msg", 1);
    let transaction = match h.inbound(request).await {
        StackEvent::Request(event) => event.server_transaction.unwrap(),
        _ => unreachable!(),
    };

    h.agent.handle_event(timeout(transaction)).await.unwrap();

    assert_eq!(h.stack.sent_statuses(), vec![408]);
    assert!(h.agent.registry().is_empty());
}

#[tokio::test]
async fn test_client_timeout_before_answer_sends_cancel() {
    let mut h = Harness::caller();
    let call_id = h.agent.invite("bob@10.0.0.2").await.unwrap();
    let registered = h.agent.registry().transaction(&call_id).unwrap();
    let transaction = h.stack.client_transaction(&registered.id).unwrap();
    assert_eq!(transaction.state, TransactionState::Calling);

    h.agent.handle_event(timeout(transaction.clone())).await.unwrap();

    let cancel = h.stack.sent_requests().pop().unwrap();
    assert_eq!(cancel.method, Method::Cancel);
    assert_eq!(cancel.call_id, call_id);
    assert_eq!(cancel.top_branch(), Some(transaction.id.branch.as_str()));
    assert_eq!(cancel.cseq.seq, 1);

    assert!(h.agent.registry().is_empty());
    assert!(matches!(
        h.call_events().as_slice(),
        [CallEvent::AttemptFailed { call_id: id, .. }] if *id == call_id
    ));
}

#[tokio::test]
async fn test_client_timeout_after_completion_sends_nothing() {
    let mut h = Harness::caller();
    let call_id = h.agent.invite("bob@10.0.0.2").await.unwrap();
    let mut transaction = h.agent.registry().transaction(&call_id).unwrap();
    transaction.state = TransactionState::Completed;
    let sent_before = h.stack.sent_messages().len();

    h.agent.handle_event(timeout(transaction)).await.unwrap();

    assert_eq!(h.stack.sent_messages().len(), sent_before);
    assert!(h.agent.registry().is_empty());
    assert_eq!(h.call_events().len(), 1);
}

#[tokio::test]
async fn test_proceeding_client_transaction_is_cancelled() {
    let mut h = Harness::caller();
    let call_id = h.agent.invite("bob@10.0.0.2").await.unwrap();
    let invite = h.sent_invite();
    h.respond(peer_response(StatusCode::Ringing, &invite)).await;

    let registered = h.agent.registry().transaction(&call_id).unwrap();
    let transaction = h.stack.client_transaction(&registered.id).unwrap();
    assert_eq!(transaction.state, TransactionState::Proceeding);

    h.agent.handle_event(timeout(transaction)).await.unwrap();

    assert_eq!(
        h.stack.sent_requests().last().map(|request| request.method.clone()),
        Some(Method::Cancel)
    );
    assert!(h.agent.registry().is_empty());
}
