use std::sync::Arc;

use crate::support::{
    helpers::{
        collect_until_terminal, config_with_batch, engine, init_tracing, next_matching,
        seeded_store, EVENT_TIMEOUT,
    },
    mocks::{shared, GatedTransport, ScriptedTransport, ShuffledTransport},
};
use anyhow::Result;
use mailblast::{
    ControlError, DispatchConfig, DispatchEvent, DispatchStatus, RecipientId, RunCounters,
    RunOutcome, RunState,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_pages_through_store_and_writes_back_outcomes() -> Result<()> {
    init_tracing();
    let store = seeded_store(250).await;
    let (_, transport) = shared(ShuffledTransport::new(2));
    let engine = engine(DispatchConfig::default(), store.clone(), transport);
    let mut events = engine.subscribe();

    engine.start().await?;
    let seen = collect_until_terminal(&mut events).await?;

    let started = seen.first().expect("start event");
    assert!(matches!(
        started,
        DispatchEvent::Started {
            total: 250,
            batch_size: 25,
            ..
        }
    ));

    let progress: Vec<usize> = seen
        .iter()
        .filter_map(|event| match event {
            DispatchEvent::Progress(update) => Some(update.sent_count),
            _ => None,
        })
        .collect();
    let expected: Vec<usize> = (1..=10).map(|page| page * 25).collect();
    assert_eq!(progress, expected);

    match seen.last() {
        Some(DispatchEvent::Completed {
            delivered, failed, ..
        }) => {
            assert_eq!(*delivered, 125);
            assert_eq!(*failed, 125);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let outcome = engine.wait().await?.expect("run outcome");
    assert!(outcome.is_completed());
    assert_eq!(outcome.summary().attempted, 250);

    assert_eq!(engine.state(), RunState::Idle);
    assert_eq!(engine.counters(), RunCounters::default());
    assert_eq!(store.fetched_pages(), (1..=10).collect::<Vec<_>>());
    assert!(store.fetched_limits().iter().all(|limit| *limit == 25));

    let records = store.inner().snapshot().await;
    assert_eq!(records.len(), 250);
    for record in records {
        let status = record.status.expect("every record has an outcome");
        if record.id.get() % 2 == 0 {
            assert_eq!(status, DispatchStatus::Sent);
            assert!(record.sent_at.is_some());
        } else {
            assert!(status.to_string().starts_with("failed: HTTP 400"));
            assert!(record.sent_at.is_none());
        }
    }
    Ok(())
}

#[tokio::test]
async fn progress_reports_eta_and_status_line() -> Result<()> {
    init_tracing();
    let store = seeded_store(30).await;
    let (_, transport) = shared(ScriptedTransport::new().fail_first(4, 3));
    let engine = engine(config_with_batch(10), store, transport);
    let mut events = engine.subscribe();

    engine.start().await?;
    let first = next_matching(&mut events, |event| {
        matches!(event, DispatchEvent::Progress(_))
    })
    .await?;

    let DispatchEvent::Progress(update) = first else {
        unreachable!("filtered on progress");
    };
    assert_eq!(update.sent_count, 10);
    assert_eq!(update.total_count, 30);
    assert_eq!(update.delivered, 9);
    assert_eq!(update.failed, 1);
    assert!(update.eta_seconds.is_some());
    assert!(update
        .status_line()
        .starts_with("Sent 10/30 (9 delivered, 1 failed), ETA "));

    engine.wait().await?;
    Ok(())
}

#[tokio::test]
async fn empty_store_completes_immediately() -> Result<()> {
    init_tracing();
    let store = seeded_store(0).await;
    let (transport, erased) = shared(ScriptedTransport::new());
    let engine = engine(DispatchConfig::default(), store.clone(), erased);
    let mut events = engine.subscribe();

    engine.start().await?;
    let seen = collect_until_terminal(&mut events).await?;

    assert!(matches!(
        seen.last(),
        Some(DispatchEvent::Completed {
            delivered: 0,
            failed: 0,
            ..
        })
    ));
    assert!(store.fetched_pages().is_empty());
    assert_eq!(transport.total_attempts(), 0);
    assert_eq!(engine.state(), RunState::Idle);
    Ok(())
}

#[tokio::test]
async fn start_is_rejected_while_a_run_is_active() -> Result<()> {
    init_tracing();
    let store = seeded_store(5).await;
    let (gate, transport) = shared(GatedTransport::hold_from(1));
    let engine = engine(DispatchConfig::default(), store, transport);

    engine.pause().expect_err("pause requires an active run");
    assert_eq!(engine.resume(), Err(ControlError::NotActive));

    engine.start().await?;
    gate.wait_until_held(EVENT_TIMEOUT).await?;
    engine.pause()?;
    let err = engine.start().await.expect_err("second start must fail");
    assert!(matches!(
        err.downcast_ref::<ControlError>(),
        Some(ControlError::AlreadyActive(RunState::Paused))
    ));

    engine.resume()?;
    gate.release();
    assert!(engine.wait().await?.expect("run outcome").is_completed());
    assert_eq!(gate.sent(), vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[tokio::test]
async fn store_write_failure_halts_the_run() -> Result<()> {
    init_tracing();
    let store = seeded_store(40).await;
    store.fail_updates_after(12);
    let (_, transport) = shared(ScriptedTransport::new());
    let engine = engine(config_with_batch(10), store.clone(), transport);
    let mut events = engine.subscribe();

    engine.start().await?;
    let seen = collect_until_terminal(&mut events).await?;

    match seen.last() {
        Some(DispatchEvent::Failed { error, .. }) => {
            assert!(error.contains("writing back recipient:13"), "{error}");
            assert!(error.contains("rejected"), "{error}");
        }
        other => panic!("expected failure event, got {other:?}"),
    }

    let err = engine.wait().await.expect_err("run should fail");
    assert!(format!("{err:#}").contains("recipient store unavailable"));
    assert_eq!(engine.state(), RunState::Idle);
    assert_eq!(engine.counters(), RunCounters::default());
    assert_eq!(store.fetched_pages(), vec![1, 2]);

    let untouched = store.inner().get(RecipientId::new(13)).await.unwrap();
    assert!(untouched.status.is_none());
    Ok(())
}

#[tokio::test]
async fn unreadable_total_leaves_engine_idle() -> Result<()> {
    init_tracing();
    let store = seeded_store(5).await;
    store.fail_count();
    let (_, transport) = shared(ScriptedTransport::new());
    let engine = engine(DispatchConfig::default(), store, transport);
    let mut events = engine.subscribe();

    let err = engine.start().await.expect_err("start should fail");
    assert!(format!("{err:#}").contains("count offline"));
    assert_eq!(engine.state(), RunState::Idle);
    assert!(engine.wait().await?.is_none());

    let event = next_matching(&mut events, |event| event.is_terminal()).await?;
    assert!(matches!(event, DispatchEvent::Failed { .. }));
    Ok(())
}

#[tokio::test]
async fn engine_can_run_again_after_completion() -> Result<()> {
    init_tracing();
    let store = seeded_store(12).await;
    let (transport, erased) = shared(ScriptedTransport::new());
    let engine = Arc::new(engine(config_with_batch(5), store, erased));

    let first = engine.start().await?;
    assert!(matches!(engine.wait().await?, Some(RunOutcome::Completed(_))));
    let second = engine.start().await?;
    assert!(second > first);
    assert!(matches!(engine.wait().await?, Some(RunOutcome::Completed(_))));

    assert_eq!(transport.total_attempts(), 24);
    Ok(())
}
