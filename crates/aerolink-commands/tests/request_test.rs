//! Message-request correlation tests.
//!
//! Ack and message legs arrive in random order over a lossy link; these
//! tests pin the completion rules for every interleaving.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use aerolink_commands::{
    CommandClient, CommandDispatcher, DispatcherConfig, RequestMessageFailure,
    RequestMessageOutcome,
};
use aerolink_core::{AckResult, CommandAck, CommandCode, ComponentId, MessageId};
use aerolink_testing::{MockDownlink, SendScript};

fn spawn_engine() -> (Arc<MockDownlink>, CommandClient) {
    let (link, inbound) = MockDownlink::new();
    let client = CommandDispatcher::spawn(link.clone(), inbound, DispatcherConfig::default());
    (link, client)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_ack_then_message_completes_with_payload() {
    let (link, client) = spawn_engine();
    let payload = serde_json::json!({"severity": 2, "text": "battery low"});
    link.script(
        CommandCode::REQUEST_MESSAGE,
        SendScript::AckThenMessage {
            message_id: MessageId(253),
            payload: payload.clone(),
        },
    )
    .await;

    let received = client
        .request_message_async(ComponentId::AUTOPILOT, MessageId(253), [0.0; 5])
        .await
        .unwrap();
    assert_eq!(received, payload);

    // The request command carried the message id in param1.
    let frames = link.sent_frames().await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].code, CommandCode::REQUEST_MESSAGE);
    assert_eq!(frames[0].payload.param1(), 253.0);
}

#[tokio::test(start_paused = true)]
async fn test_acked_but_no_message_times_out() {
    let (link, client) = spawn_engine();
    link.script(
        CommandCode::REQUEST_MESSAGE,
        SendScript::AckAfter {
            sends: 1,
            result: AckResult::Accepted,
        },
    )
    .await;

    let result = client
        .request_message_async(ComponentId::AUTOPILOT, MessageId(253), [0.0; 5])
        .await;
    match result {
        Err(err) => assert!(
            err.to_string().contains("never arrived"),
            "unexpected error: {err}"
        ),
        Ok(payload) => panic!("expected MessageNotReceived, got {payload:?}"),
    }

    // The ack landed on the first try, so the command was never resent.
    assert_eq!(link.sent_count(CommandCode::REQUEST_MESSAGE).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_message_before_ack_waits_for_ack() {
    let (link, client) = spawn_engine();
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .request_message(
            move |_, outcome| {
                let _ = tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    // Message first: the request holds for the ack.
    link.inject_data(
        ComponentId::AUTOPILOT,
        MessageId(253),
        serde_json::json!({"text": "ok"}),
    );
    settle().await;
    assert!(rx.try_recv().is_err());

    // Ack closes it.
    link.inject_ack(
        ComponentId::AUTOPILOT,
        CommandAck::new(CommandCode::REQUEST_MESSAGE, AckResult::Accepted),
    );
    settle().await;
    match rx.try_recv().unwrap() {
        RequestMessageOutcome::Received(payload) => {
            assert_eq!(payload, serde_json::json!({"text": "ok"}));
        }
        other => panic!("expected Received, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_request_same_pair_fails_fast() {
    let (_link, client) = spawn_engine();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    client
        .request_message(
            move |_, outcome| {
                let _ = first_tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    client
        .request_message(
            move |_, outcome| {
                let _ = second_tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        second_rx.try_recv().unwrap(),
        RequestMessageOutcome::Failed(RequestMessageFailure::DuplicateCommand)
    );
    // The first request is untouched and eventually exhausts unacked.
    assert!(first_rx.try_recv().is_err());
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(
        first_rx.try_recv().unwrap(),
        RequestMessageOutcome::Failed(RequestMessageFailure::CommandNotAcked)
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_request_other_message_hits_command_dedup() {
    let (link, client) = spawn_engine();
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .request_message(
            |_, _| {},
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    // Different message id, but the same (component, REQUEST_MESSAGE) slot.
    client
        .request_message(
            move |_, outcome| {
                let _ = tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(244),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        rx.try_recv().unwrap(),
        RequestMessageOutcome::Failed(RequestMessageFailure::DuplicateCommand)
    );
    assert_eq!(link.sent_count(CommandCode::REQUEST_MESSAGE).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ack_failure_completes_without_message_wait() {
    let (link, client) = spawn_engine();
    link.script(
        CommandCode::REQUEST_MESSAGE,
        SendScript::AckAfter {
            sends: 1,
            result: AckResult::Denied,
        },
    )
    .await;

    let result = client
        .request_message_async(ComponentId::AUTOPILOT, MessageId(253), [0.0; 5])
        .await;
    match result {
        Err(aerolink_commands::RequestMessageError::Failed(
            RequestMessageFailure::CommandError(AckResult::Denied),
        )) => {}
        other => panic!("expected CommandError(Denied), got {other:?}"),
    }
    assert_eq!(link.sent_count(CommandCode::REQUEST_MESSAGE).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unacked_request_fails_as_not_acked() {
    let (link, client) = spawn_engine();

    let result = client
        .request_message_async(ComponentId::AUTOPILOT, MessageId(253), [0.0; 5])
        .await;
    match result {
        Err(aerolink_commands::RequestMessageError::Failed(
            RequestMessageFailure::CommandNotAcked,
        )) => {}
        other => panic!("expected CommandNotAcked, got {other:?}"),
    }
    // The request command itself was retried to exhaustion.
    assert_eq!(link.sent_count(CommandCode::REQUEST_MESSAGE).await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_fails_request_waiting_for_message() {
    let (link, client) = spawn_engine();
    link.script(
        CommandCode::REQUEST_MESSAGE,
        SendScript::AckAfter {
            sends: 1,
            result: AckResult::Accepted,
        },
    )
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .request_message(
            move |_, outcome| {
                let _ = tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    client.disconnect().await.unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        RequestMessageOutcome::Failed(RequestMessageFailure::MessageNotReceived)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_message_does_not_close_request() {
    let (link, client) = spawn_engine();
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .request_message(
            move |_, outcome| {
                let _ = tx.send(outcome);
            },
            ComponentId::AUTOPILOT,
            MessageId(253),
            [0.0; 5],
        )
        .await
        .unwrap();
    settle().await;

    link.inject_ack(
        ComponentId::AUTOPILOT,
        CommandAck::new(CommandCode::REQUEST_MESSAGE, AckResult::Accepted),
    );
    // Wrong message id, then wrong source component.
    link.inject_data(
        ComponentId::AUTOPILOT,
        MessageId(147),
        serde_json::json!({"voltage": 11.7}),
    );
    link.inject_data(
        ComponentId(42),
        MessageId(253),
        serde_json::json!({"text": "wrong source"}),
    );
    settle().await;
    assert!(rx.try_recv().is_err());

    link.inject_data(
        ComponentId::AUTOPILOT,
        MessageId(253),
        serde_json::json!({"text": "right one"}),
    );
    settle().await;
    match rx.try_recv().unwrap() {
        RequestMessageOutcome::Received(payload) => {
            assert_eq!(payload["text"], "right one");
        }
        other => panic!("expected Received, got {other:?}"),
    }
}
