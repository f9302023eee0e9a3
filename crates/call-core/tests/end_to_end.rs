mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use rvoip_call_core::transport::TransportErrorEvent;
use rvoip_call_core::{CallAgent, CallConfig, CallEvent, LoopbackStack, StackEvent};

struct Pair {
    alice: Arc<CallAgent>,
    bob: Arc<CallAgent>,
    alice_calls: tokio::sync::mpsc::Receiver<CallEvent>,
    bob_calls: tokio::sync::mpsc::Receiver<CallEvent>,
    alice_stack: Arc<LoopbackStack>,
    bob_stack: Arc<LoopbackStack>,
    loops: Vec<tokio::task::JoinHandle<()>>,
}

fn pair() -> Pair {
    init_tracing();
    let alice_config = CallConfig::new("alice", loopback_ip(), CALLER_PORT);
    let bob_config = CallConfig::new("bob", loopback_ip(), CALLEE_PORT);

    let (alice_stack, alice_events) = LoopbackStack::new(alice_config.local_addr());
    let (bob_stack, bob_events) = LoopbackStack::new(bob_config.local_addr());
    LoopbackStack::link(&alice_stack, &bob_stack);

    let (alice, alice_calls) = CallAgent::new(alice_config, alice_stack.clone()).unwrap();
    let (bob, bob_calls) = CallAgent::new(bob_config, bob_stack.clone()).unwrap();
    let loops = vec![alice.start(alice_events), bob.start(bob_events)];

    Pair {
        alice,
        bob,
        alice_calls,
        bob_calls,
        alice_stack,
        bob_stack,
        loops,
    }
}

#[tokio::test]
async fn test_call_setup_and_teardown_between_two_agents() {
    let mut p = pair();

    let call_id = p.alice.invite("bob@127.0.0.1:5080").await.unwrap();

    // bob's loop answers on its own task
    assert!(p.bob_stack.wait_for_sent(3, Duration::from_secs(2)).await);
    assert_eq!(p.bob_stack.sent_statuses(), vec![100, 180, 200]);

    expect_call_event(&mut p.bob_calls, |event| {
        matches!(event, CallEvent::IncomingCallAnswered { call_id: id } if *id == call_id)
    })
    .await;
    expect_call_event(&mut p.alice_calls, |event| {
        matches!(event, CallEvent::CallEstablished { call_id: id } if *id == call_id)
    })
    .await;

    assert!(p.alice.registry().find_dialog(&call_id));
    assert!(p.bob.registry().find_dialog(&call_id));
    assert_eq!(p.alice_stack.acks(), vec![1]);

    p.alice.hangup(&call_id).await.unwrap();

    expect_call_event(&mut p.bob_calls, |event| {
        matches!(event, CallEvent::CallTerminated { .. })
    })
    .await;
    expect_call_event(&mut p.alice_calls, |event| {
        matches!(event, CallEvent::CallTerminated { .. })
    })
    .await;

    assert!(p.alice.registry().is_empty());
    assert!(p.bob.registry().is_empty());

    p.alice.shutdown();
    p.bob.shutdown();
    for handle in p.loops {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_callee_can_hang_up() {
    let mut p = pair();
    let call_id = p.alice.invite("bob@127.0.0.1:5080").await.unwrap();
    expect_call_event(&mut p.alice_calls, |event| {
        matches!(event, CallEvent::CallEstablished { .. })
    })
    .await;

    p.bob.hangup(&call_id).await.unwrap();

    expect_call_event(&mut p.alice_calls, |event| {
        matches!(event, CallEvent::CallTerminated { .. })
    })
    .await;
    expect_call_event(&mut p.bob_calls, |event| {
        matches!(event, CallEvent::CallTerminated { .. })
    })
    .await;
    assert!(p.alice.registry().is_empty());
    assert!(p.bob.registry().is_empty());
}

#[tokio::test]
async fn test_calling_a_busy_agent() {
    let mut p = pair();
    let first = p.alice.invite("bob@127.0.0.1:5080").await.unwrap();
    expect_call_event(&mut p.alice_calls, |event| {
        matches!(event, CallEvent::CallEstablished { .. })
    })
    .await;

    // bob is in a call and refuses to place another one
    let err = p.bob.invite("alice@127.0.0.1:5070").await.unwrap_err();
    assert!(matches!(err, rvoip_call_core::CallError::CallInProgress));
    assert!(p.bob.registry().find_dialog(&first));
}

#[tokio::test]
async fn test_transport_failure_stops_the_loop() {
    init_tracing();
    let config = CallConfig::new("alice", loopback_ip(), CALLER_PORT);
    let (stack, events) = LoopbackStack::new(config.local_addr());
    let (agent, mut calls) = CallAgent::new(config, stack.clone()).unwrap();
    let handle = agent.start(events);

    stack
        .inject(StackEvent::TransportError(TransportErrorEvent {
            host: "127.0.0.1".to_string(),
            port: CALLER_PORT,
            transport: rvoip_call_core::message::TransportProtocol::Udp,
            message: "connection reset".to_string(),
        }))
        .await
        .unwrap();

    let event = expect_call_event(&mut calls, |event| {
        matches!(event, CallEvent::TransportFailed { .. })
    })
    .await;
    assert!(matches!(event, CallEvent::TransportFailed { reason } if reason.contains("connection reset")));

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_before_any_event() {
    let config = CallConfig::default();
    let (stack, events) = LoopbackStack::new(config.local_addr());
    let (agent, _calls) = CallAgent::new(config, stack).unwrap();

    agent.shutdown();
    tokio::time::timeout(Duration::from_secs(1), agent.start(events))
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = CallConfig::default().with_max_forwards(0);
    let (stack, _events) = LoopbackStack::new(config.local_addr());
    assert!(CallAgent::new(config, stack).is_err());
}
