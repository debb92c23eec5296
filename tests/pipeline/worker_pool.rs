use std::sync::Arc;

use crate::support::{
    helpers::{init_tracing, recipient_rows, renderer},
    mocks::{shared, ScriptedTransport, ShuffledTransport},
};
use anyhow::Result;
use mailblast::{
    DispatchStatus, Recipient, RecipientId, RetryPolicy, RetryingSender, Telemetry, WorkerPool,
};
use serde_json::json;

fn batch(count: usize) -> Vec<Recipient> {
    recipient_rows(count)
        .into_iter()
        .enumerate()
        .map(|(idx, fields)| Recipient::new(RecipientId::new(idx as u64 + 1), fields))
        .collect()
}

fn pool(width: usize, transport: Arc<dyn mailblast::DeliveryTransport>) -> WorkerPool {
    let sender = RetryingSender::new(
        renderer(),
        transport,
        RetryPolicy::default(),
        Arc::new(Telemetry::default()),
    );
    WorkerPool::new(width, sender)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_match_input_order_under_shuffled_completion() -> Result<()> {
    init_tracing();
    let (transport, erased) = shared(ShuffledTransport::new(8));
    let pool = pool(10, erased);

    let results = pool.run_batch(batch(60)).await?;

    assert_eq!(results.len(), 60);
    for (idx, result) in results.iter().enumerate() {
        let recipient = idx + 1;
        if recipient % 2 == 1 {
            assert_eq!(
                result.status,
                DispatchStatus::Failed(format!("HTTP 400: recipient {recipient} bounced")),
                "slot {idx} holds the wrong outcome"
            );
            assert!(result.sent_at.is_none());
        } else {
            assert!(result.is_sent(), "slot {idx} should be sent");
            assert!(result.sent_at.is_some());
        }
    }
    // 30 odd recipients, each tried three times.
    assert_eq!(transport.calls(), 30 + 30 * 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_smaller_than_width_completes() -> Result<()> {
    init_tracing();
    let (transport, erased) = shared(ShuffledTransport::new(5));
    let pool = pool(10, erased);

    let results = pool.run_batch(batch(3)).await?;

    assert_eq!(results.len(), 3);
    assert!(transport.peak_concurrency() <= 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn large_batch_never_exceeds_pool_width() -> Result<()> {
    init_tracing();
    let (transport, erased) = shared(ShuffledTransport::new(3));
    let pool = pool(10, erased);

    let results = pool.run_batch(batch(1_000)).await?;

    assert_eq!(results.len(), 1_000);
    let peak = transport.peak_concurrency();
    assert!(peak <= 10, "observed {peak} concurrent sends");
    assert!(peak > 1, "sends should overlap, observed {peak}");
    Ok(())
}

#[tokio::test]
async fn incomplete_render_is_failed_without_transport_calls() -> Result<()> {
    init_tracing();
    let (transport, erased) = shared(ScriptedTransport::new());
    let pool = pool(4, erased);

    let mut recipients = batch(2);
    recipients[1].fields.insert("email".into(), json!(""));

    let results = pool.run_batch(recipients).await?;

    assert!(results[0].is_sent());
    let reason = results[1]
        .status
        .failure_reason()
        .expect("second recipient should fail");
    assert!(reason.contains("render error"), "{reason}");
    assert!(reason.contains("recipient_email"), "{reason}");
    assert_eq!(transport.total_attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn retries_stop_at_third_attempt() -> Result<()> {
    init_tracing();
    let (transport, erased) = shared(
        ScriptedTransport::new()
            .fail_first(1, 2)
            .fail_first(2, 3)
            .fail_first(3, 10),
    );
    let pool = pool(3, erased);

    let results = pool.run_batch(batch(3)).await?;

    assert_eq!(results[0].status, DispatchStatus::Sent);
    assert_eq!(transport.attempts_for(1), 3);

    assert_eq!(
        results[1].status.to_string(),
        "failed: HTTP 503: attempt 3 for recipient 2 rejected"
    );
    assert!(results[1].sent_at.is_none());
    assert_eq!(transport.attempts_for(2), 3);

    assert!(!results[2].is_sent());
    assert_eq!(transport.attempts_for(3), 3);
    Ok(())
}
