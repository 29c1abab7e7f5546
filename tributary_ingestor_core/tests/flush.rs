use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tributary_ingestor_core::{
    Alert, BatchState, DeadLetterCategory, FlushError, FlushOutcome,
    converter::{METADATA_OFFSET_RANGE, read_block},
};
use tributary_resources::{ErrorKind, OffsetRange, PartitionId, RetryOptions};

mod common;

use common::{
    BrokenQuarantineStore, DeniedSink, HangOnceSink, Harness, batch_of, invalid_measurement, measurement,
    stored, test_options,
};

#[tokio::test]
async fn test_flush_commits_after_transient_failures() {
    let harness = Harness::new(test_options());
    let sink = harness.flaky_sink(2);
    let controller = harness.flush_controller(sink.clone());

    let records = (0..10)
        .map(|i| stored(i, measurement(i as usize)))
        .collect::<Vec<_>>();
    let batch = batch_of(&records);

    let outcome = controller
        .flush(batch.clone(), &CancellationToken::new())
        .await
        .expect("flush");

    assert_eq!(outcome.state(), BatchState::Committed);
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(sink.num_puts(), 3);

    let expected_path = "data/2023/11/14/22/partition-00000-00000000000000000000.parquet";
    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            path: Some(expected_path.into()),
            num_rows: 10,
            num_dead_letters: 0,
            attempts: 3,
        }
    );
    assert_eq!(controller.block_path(&batch).as_ref(), expected_path);

    assert_eq!(harness.block_paths().await, vec![expected_path.to_string()]);
    assert!(harness.alerts.alerts().is_empty());

    let rows = harness.block_rows().await;
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[3]["measure_name"], "measure_3");
    assert_eq!(rows[3]["measure_value"], 3.0);
    assert_eq!(rows[3]["metadata.customer_id"], "3");
}

#[tokio::test]
async fn test_invalid_records_are_dead_lettered() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(harness.flaky_sink(0));

    let invalid = [17, 250, 500, 501, 999];
    let records = (0..1000u64)
        .map(|i| {
            if invalid.contains(&i) {
                stored(i, invalid_measurement())
            } else {
                stored(i, measurement(i as usize))
            }
        })
        .collect::<Vec<_>>();

    let outcome = controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("flush");

    let FlushOutcome::Committed {
        num_rows,
        num_dead_letters,
        ..
    } = outcome
    else {
        panic!("expected committed batch, got {outcome:?}");
    };
    assert_eq!(num_rows, 995);
    assert_eq!(num_dead_letters, 5);

    assert_eq!(harness.block_rows().await.len(), 995);

    let dead_letters = harness.dead_letters.records();
    assert_eq!(dead_letters.len(), 5);
    for (record, offset) in dead_letters.iter().zip(invalid) {
        assert_eq!(record.category, DeadLetterCategory::ProcessingFailed);
        assert_eq!(record.offset, offset);
        assert_eq!(record.reason, "invalid_value");
        assert_eq!(record.data["measure_value"], "not a number");
    }
}

#[tokio::test]
async fn test_batch_without_rows_commits_without_block() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(harness.flaky_sink(0));

    let records = vec![stored(0, invalid_measurement()), stored(1, "[1, 2]".into())];
    let outcome = controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("flush");

    assert_eq!(
        outcome,
        FlushOutcome::Committed {
            path: None,
            num_rows: 0,
            num_dead_letters: 2,
            attempts: 1,
        }
    );
    assert!(harness.block_paths().await.is_empty());
    assert_eq!(harness.dead_letters.records().len(), 2);
}

#[tokio::test]
async fn test_flushing_twice_writes_one_object() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(harness.flaky_sink(0));

    let records = (0..50)
        .map(|i| stored(i, measurement(i as usize)))
        .collect::<Vec<_>>();

    controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("first flush");
    let paths = harness.block_paths().await;
    let first = harness.read(&paths[0]).await;

    // A replay after a crash rebuilds the batch from the same records.
    controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("second flush");

    assert_eq!(harness.block_paths().await, paths);
    assert_eq!(harness.read(&paths[0]).await, first);

    let contents = read_block(first).expect("read block");
    assert!(
        contents
            .metadata
            .contains(&(METADATA_OFFSET_RANGE.to_string(), Some("0-49".to_string())))
    );
}

#[tokio::test]
async fn test_replay_with_longer_range_overwrites_block() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(harness.flaky_sink(0));

    let records = (0..15)
        .map(|i| stored(i, measurement(i as usize)))
        .collect::<Vec<_>>();

    controller
        .flush(batch_of(&records[..10]), &CancellationToken::new())
        .await
        .expect("first flush");

    // Redelivered from the committed offset, the batch is sealed later.
    controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("second flush");

    let paths = harness.block_paths().await;
    assert_eq!(
        paths,
        vec!["data/2023/11/14/22/partition-00000-00000000000000000000.parquet".to_string()]
    );
    assert_eq!(harness.block_rows().await.len(), 15);

    let contents = read_block(harness.read(&paths[0]).await).expect("read block");
    assert!(
        contents
            .metadata
            .contains(&(METADATA_OFFSET_RANGE.to_string(), Some("0-14".to_string())))
    );
}

#[tokio::test]
async fn test_attempt_timeout_is_retried() {
    let options = test_options().with_retry(
        RetryOptions::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_attempt_timeout(Duration::from_millis(200)),
    );
    let harness = Harness::new(options);
    let controller =
        harness.flush_controller(Arc::new(HangOnceSink::new(harness.object_store.clone())));

    let records = (0..3)
        .map(|i| stored(i, measurement(i as usize)))
        .collect::<Vec<_>>();
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        controller.flush(batch_of(&records), &CancellationToken::new()),
    )
    .await
    .expect("flush finishes")
    .expect("flush");

    assert_eq!(outcome.state(), BatchState::Committed);
    assert_eq!(outcome.attempts(), 2);
    assert_eq!(harness.block_rows().await.len(), 3);
    assert!(harness.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_batch_is_quarantined_after_retries() {
    let harness = Harness::new(test_options());
    let sink = harness.flaky_sink(u32::MAX);
    let controller = harness.flush_controller(sink.clone());

    let records = (0..5)
        .map(|i| stored(i, measurement(i as usize)))
        .collect::<Vec<_>>();

    let outcome = controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect("flush");

    let quarantine_path =
        "quarantine/partition-00000/00000000000000000000-00000000000000000004".to_string();
    assert_eq!(
        outcome,
        FlushOutcome::Failed {
            quarantine_path: quarantine_path.clone(),
            error_kind: ErrorKind::Temporary,
            attempts: 4,
        }
    );
    assert_eq!(sink.num_puts(), 4);
    assert!(harness.block_paths().await.is_empty());

    let manifest: serde_json::Value =
        serde_json::from_slice(&harness.read(&format!("{quarantine_path}/manifest.json")).await)
            .expect("manifest json");
    assert_eq!(manifest["attempts"], 4);
    assert_eq!(manifest["num_rows"], 5);

    let rows = harness.read(&format!("{quarantine_path}/rows.jsonl")).await;
    assert_eq!(rows.iter().filter(|b| **b == b'\n').count(), 5);

    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    let Alert::BatchFailed {
        partition,
        range,
        attempts,
        quarantine_path: alerted_path,
        ..
    } = &alerts[0]
    else {
        panic!("expected batch failed alert, got {:?}", alerts[0]);
    };
    assert_eq!(*partition, PartitionId::new(0));
    assert_eq!(*range, OffsetRange { start: 0, end: 4 });
    assert_eq!(*attempts, 4);
    assert_eq!(alerted_path, &quarantine_path);
}

#[tokio::test]
async fn test_permanent_error_halts_without_retry() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(Arc::new(DeniedSink));

    let records = vec![stored(0, measurement(0))];
    let error = controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect_err("permanent error");

    let FlushError::Halted {
        attempts,
        error_kind,
        ..
    } = &error
    else {
        panic!("expected halted, got {error:?}");
    };
    assert_eq!(*attempts, 1);
    assert_eq!(*error_kind, ErrorKind::Permission);

    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(alerts[0], Alert::PartitionHalted { .. }));
    assert!(harness.paths().await.iter().all(|p| !p.starts_with("quarantine")));
}

#[tokio::test]
async fn test_failed_quarantine_halts() {
    let harness = Harness::new(test_options());
    let controller = harness
        .flush_controller_with_quarantine(harness.flaky_sink(u32::MAX), Arc::new(BrokenQuarantineStore));

    let records = vec![stored(0, measurement(0))];
    let error = controller
        .flush(batch_of(&records), &CancellationToken::new())
        .await
        .expect_err("halted");

    assert!(matches!(error, FlushError::Halted { attempts: 4, .. }));
    assert!(matches!(
        harness.alerts.alerts().as_slice(),
        [Alert::PartitionHalted { .. }]
    ));
}

#[tokio::test]
async fn test_cancelled_flush_does_not_commit() {
    let harness = Harness::new(test_options());
    let controller = harness.flush_controller(harness.flaky_sink(u32::MAX));

    let ct = CancellationToken::new();
    ct.cancel();

    let records = vec![stored(0, measurement(0))];
    let error = controller
        .flush(batch_of(&records), &ct)
        .await
        .expect_err("cancelled");

    assert!(matches!(error, FlushError::Cancelled { .. }));
    assert!(harness.paths().await.is_empty());
    assert!(harness.alerts.alerts().is_empty());
}
