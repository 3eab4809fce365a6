mod utils;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use queue_broker::{Broker, Operation, ReceiveRequest};
use sync_worker::consumer::{CycleReport, PollConfig, PollError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use utils::{RecordingHandler, TestContext};

#[tokio::test(start_paused = true)]
async fn test_published_message_is_handled_and_deleted() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new().cancelling_after(1, token.clone()));

    ctx.publish("hello");
    let consumer = ctx.consumer(&pipeline, handler.clone(), token);
    let status = consumer.status();
    consumer.run().await;

    let attempts = handler.attempts();
    assert_eq!(handler.bodies(), vec!["hello".to_string()]);
    assert_eq!(attempts[0].source.as_ref(), Some(&ctx.topic));
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 0);
    assert_eq!(ctx.broker.calls(Operation::ReceiveMessages), 1);
    assert_eq!(ctx.broker.calls(Operation::DeleteMessage), 1);
    assert_eq!(status.messages_deleted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_message_is_redelivered_after_visibility_timeout() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(
        RecordingHandler::new()
            .failing_first(1)
            .cancelling_after(1, token.clone()),
    );

    ctx.publish("hello");
    let start = Instant::now();
    let consumer = ctx.consumer(&pipeline, handler.clone(), token);
    let status = consumer.status();
    consumer.run().await;

    let attempts = handler.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].message_id, attempts[1].message_id);
    assert_ne!(attempts[0].receipt, attempts[1].receipt);
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 0);
    assert_eq!(status.handler_failures(), 1);
    assert_eq!(status.messages_deleted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_leads_to_redelivery() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new().cancelling_after(2, token.clone()));
    ctx.broker.fail_next(Operation::DeleteMessage, 1);

    ctx.publish("hello");
    ctx.consumer(&pipeline, handler.clone(), token).run().await;

    let attempts = handler.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].message_id, attempts[1].message_id);
    assert_eq!(ctx.broker.calls(Operation::DeleteMessage), 2);
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_does_not_abandon_rest_of_batch() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let handler = Arc::new(RecordingHandler::new());
    ctx.broker.fail_next(Operation::DeleteMessage, 1);

    for body in ["first", "second", "third"] {
        ctx.publish(body);
    }
    let consumer = ctx.consumer(&pipeline, handler.clone(), CancellationToken::new());
    let status = consumer.status();

    let result = consumer.poll_once().await;

    assert!(matches!(result, Err(PollError::Delete { .. })));
    assert_eq!(
        handler.bodies(),
        vec![
            "first".to_string(),
            "second".to_string(),
            "third".to_string()
        ]
    );
    assert_eq!(ctx.broker.calls(Operation::DeleteMessage), 3);
    assert_eq!(status.messages_deleted(), 2);
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_delay_stops_polling() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new());

    ctx.publish("hello");
    let start = Instant::now();
    let consumer = ctx.consumer(&pipeline, handler.clone(), token.clone());
    let task = tokio::spawn(consumer.run());

    // First cycle completes at once, the consumer then waits one interval
    tokio::time::sleep(Duration::from_millis(500)).await;
    token.cancel();
    task.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(handler.bodies(), vec!["hello".to_string()]);
    assert_eq!(ctx.broker.calls(Operation::ReceiveMessages), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_long_poll() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new());

    let start = Instant::now();
    let consumer = ctx.consumer(&pipeline, handler.clone(), token.clone());
    let task = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(5)).await;
    token.cancel();
    task.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(handler.attempts().is_empty());
    assert_eq!(ctx.broker.calls(Operation::ReceiveMessages), 1);
}

#[tokio::test(start_paused = true)]
async fn test_receive_failures_back_off_exponentially() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new().cancelling_after(1, token.clone()));
    ctx.broker.fail_next(Operation::ReceiveMessages, 4);

    ctx.publish("hello");
    let mut config = PollConfig::default();
    config.backoff.max = Duration::from_millis(400);
    let consumer = sync_worker::consumer::PollingConsumer::new(
        ctx.broker(),
        handler.clone(),
        pipeline.queue.locator().clone(),
        config,
        token,
    );
    let status = consumer.status();

    let start = Instant::now();
    consumer.run().await;
    let elapsed = start.elapsed();

    // 100 + 200 + 400 + 400 (capped)
    assert!(elapsed >= Duration::from_millis(1_100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_200), "{elapsed:?}");
    assert_eq!(ctx.broker.calls(Operation::ReceiveMessages), 5);
    assert_eq!(handler.bodies(), vec!["hello".to_string()]);
    assert_eq!(status.consecutive_failures(), 0);
    assert!(status.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_batch_finishes_current_message_only() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::new().cancelling_after(1, token.clone()));

    for body in ["first", "second", "third"] {
        ctx.publish(body);
    }
    let consumer = ctx.consumer(&pipeline, handler.clone(), token);

    let report = consumer.poll_once().await.unwrap();

    assert_eq!(
        report,
        Some(CycleReport {
            received: 3,
            deleted: 1,
            handler_failures: 0,
            released: 2,
        })
    );
    assert_eq!(handler.bodies(), vec!["first".to_string()]);
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 2);

    // Released messages come back once their visibility timeout lapses
    tokio::time::advance(Duration::from_secs(30)).await;
    let redelivered = ctx
        .broker
        .receive_messages(
            pipeline.queue.locator(),
            &ReceiveRequest {
                wait_time: Duration::ZERO,
                ..ReceiveRequest::default()
            },
        )
        .await
        .unwrap();
    let bodies: Vec<&str> = redelivered.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn test_handler_failure_is_reported_not_deleted() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let handler = Arc::new(RecordingHandler::new().failing_first(1));

    ctx.publish("hello");
    let consumer = ctx.consumer(&pipeline, handler, CancellationToken::new());

    let report = consumer.poll_once().await.unwrap();

    assert_eq!(
        report,
        Some(CycleReport {
            received: 1,
            deleted: 0,
            handler_failures: 1,
            released: 0,
        })
    );
    assert_eq!(ctx.broker.calls(Operation::DeleteMessage), 0);
    assert_eq!(ctx.broker.stored_messages(pipeline.queue.locator()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_once_returns_none_when_cancelled() {
    let ctx = TestContext::new();
    let pipeline = ctx.provision().await;
    let token = CancellationToken::new();
    let consumer = ctx.consumer(&pipeline, Arc::new(RecordingHandler::new()), token.clone());

    token.cancel();
    let report = consumer.poll_once().await.unwrap();

    assert_eq!(report, None);
}
