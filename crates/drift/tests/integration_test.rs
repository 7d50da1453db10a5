//! Integration tests for drift

use drift::config::Backoff;
use drift::store::JobConfiguration;
use drift::{
    BatchLoads, InMemoryTableStore, JobIdToken, KeyedRow, LoadConfig, PipelineError,
    StorageProvider, StorageProviderRef, WriteDisposition,
};
use futures::stream;
use serde_json::json;
use std::sync::Arc;

fn fast_poll() -> Backoff {
    Backoff {
        initial_ms: 10,
        max_ms: 10,
        multiplier: 1.0,
        jitter_ms: 0,
        max_attempts: None,
    }
}

fn config() -> LoadConfig {
    let mut config = LoadConfig::new("memory://");
    config.poll = fast_poll();
    config
}

/// Temp storage and a table store reading from it.
async fn setup() -> (StorageProviderRef, Arc<InMemoryTableStore>) {
    let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
    let store = Arc::new(InMemoryTableStore::new(storage.clone()));
    (storage, store)
}

fn rows(destination: &str, count: usize) -> Vec<KeyedRow> {
    (0..count)
        .map(|i| KeyedRow::new(destination, json!({"id": i, "dest": destination})))
        .collect()
}

async fn staged_files_left(storage: &StorageProviderRef) -> usize {
    storage.list_with_prefix("DriftWriteTemp").await.unwrap().len()
}

mod untriggered_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_small_destinations_load_directly() {
        let (storage, store) = setup().await;
        let mut input = Vec::new();
        for dest in ["d.a", "d.b", "d.c"] {
            input.extend(rows(dest, 5));
        }

        let result = BatchLoads::with_storage(config(), store.clone(), storage.clone())
            .unwrap()
            .run(stream::iter(input))
            .await
            .unwrap();

        assert_eq!(result.stats.direct_loads, 3);
        assert_eq!(result.stats.temp_tables, 0);
        assert_eq!(result.stats.commits, 0);
        assert!(result.failed_inserts().is_empty());
        assert_eq!(store.load_jobs().await.len(), 3);
        assert!(store.copy_jobs().await.is_empty());
        for dest in ["d.a", "d.b", "d.c"] {
            assert_eq!(store.table_rows(dest).await.unwrap().len(), 5);
        }
        assert_eq!(staged_files_left(&storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_destination_goes_through_temp_tables() {
        let (storage, store) = setup().await;
        let mut config = config();
        // One row per file, so 10050 files for a single destination.
        config.max_file_size = 1;
        config.num_file_shards = 1;

        let result = BatchLoads::with_storage(config, store.clone(), storage.clone())
            .unwrap()
            .run(stream::iter(rows("d.big", 10_050)))
            .await
            .unwrap();

        assert_eq!(result.stats.files_written, 10_050);
        assert_eq!(result.stats.partitions, 2);
        assert_eq!(result.stats.temp_tables, 2);
        assert_eq!(result.stats.commits, 1);
        assert_eq!(result.stats.direct_loads, 0);

        let copies = store.copy_jobs().await;
        assert_eq!(copies.len(), 1);
        let JobConfiguration::Copy { source_tables, .. } = &copies[0].configuration else {
            panic!("expected a copy job");
        };
        assert_eq!(source_tables.len(), 2);

        assert_eq!(store.table_rows("d.big").await.unwrap().len(), 10_050);
        assert_eq!(store.deleted_tables().await.len(), 2);
        assert_eq!(store.table_names().await, vec!["d.big".to_string()]);
        assert_eq!(staged_files_left(&storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destinations_beyond_writer_budget_spill() {
        let (storage, store) = setup().await;
        let destinations: Vec<String> = (0..25).map(|i| format!("d.t{i:02}")).collect();
        let input: Vec<KeyedRow> = (0..250)
            .map(|i| KeyedRow::new(destinations[i % 25].as_str(), json!({"id": i})))
            .collect();

        let result = BatchLoads::with_storage(config(), store.clone(), storage.clone())
            .unwrap()
            .run(stream::iter(input))
            .await
            .unwrap();

        assert_eq!(result.stats.inline_destinations, 20);
        assert_eq!(result.stats.spilled_destinations, 5);
        assert_eq!(result.stats.direct_loads, 25);

        let mut ids = Vec::new();
        for dest in &destinations {
            let table = store.table_rows(dest).await.unwrap();
            assert_eq!(table.len(), 10, "rows of {dest}");
            ids.extend(table.into_iter().map(|row| row["id"].as_u64().unwrap()));
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..250).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_singleton_creates_empty_default_table() {
        let (storage, store) = setup().await;
        let mut config = config();
        config.singleton_table = true;
        config.default_destination = Some("d.default".to_string());

        let result = BatchLoads::with_storage(config, store.clone(), storage)
            .unwrap()
            .run(stream::iter(Vec::<KeyedRow>::new()))
            .await
            .unwrap();

        assert_eq!(store.table_rows("d.default").await, Some(Vec::new()));
        assert_eq!(result.stats.temp_tables, 1);
        assert_eq!(result.stats.commits, 1);
        assert_eq!(store.table_names().await, vec!["d.default".to_string()]);
    }

    #[tokio::test]
    async fn test_local_temp_location() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let url = temp_dir.path().to_str().unwrap();
        let storage = Arc::new(StorageProvider::for_url(url).await.unwrap());
        let store = Arc::new(InMemoryTableStore::new(storage));

        let mut config = LoadConfig::new(url);
        config.poll = fast_poll();
        let loads = BatchLoads::new(config, store.clone()).await.unwrap();
        let token = loads.token().clone();
        loads.run(stream::iter(rows("d.a", 10))).await.unwrap();

        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 10);
        let staged = temp_dir.path().join("DriftWriteTemp").join(token.as_str());
        let left = std::fs::read_dir(&staged).map(|dir| dir.count()).unwrap_or(0);
        assert_eq!(left, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_ids_derive_from_token() {
        let (storage, store) = setup().await;
        let token = JobIdToken::new("run1");
        let dest = drift::DestinationKey::new("d.a");

        BatchLoads::with_storage(config(), store.clone(), storage)
            .unwrap()
            .with_token(token.clone())
            .run(stream::iter(rows("d.a", 3)))
            .await
            .unwrap();

        let expected = drift::job::load_job_id(&drift::job::job_id_prefix(&token, &dest, 0, 0), 0);
        let ids: Vec<String> = store.load_jobs().await.into_iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![expected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_bundles_write_every_row() {
        let (storage, store) = setup().await;
        let mut config = config();
        config.bundle_size = 10;
        config.max_concurrent_bundles = 1;
        let mut input = rows("d.a", 95);
        input.extend(rows("d.b", 95));

        let result = BatchLoads::with_storage(config, store.clone(), storage.clone())
            .unwrap()
            .run(stream::iter(input))
            .await
            .unwrap();

        // 19 bundles, one of them holding rows of both destinations.
        assert_eq!(result.stats.files_written, 20);
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 95);
        assert_eq!(store.table_rows("d.b").await.unwrap().len(), 95);
        assert_eq!(staged_files_left(&storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncate_replaces_existing_rows() {
        let (storage, store) = setup().await;
        store.create_table("d.a", vec![json!({"old": true})]).await;
        let mut config = config();
        config.write_disposition = WriteDisposition::WriteTruncate;

        BatchLoads::with_storage(config, store.clone(), storage)
            .unwrap()
            .run(stream::iter(rows("d.a", 4)))
            .await
            .unwrap();

        let table = store.table_rows("d.a").await.unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.iter().all(|row| row.get("old").is_none()));
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let (storage, store) = setup().await;
        store.fail_next_jobs(2).await;

        BatchLoads::with_storage(config(), store.clone(), storage)
            .unwrap()
            .run(stream::iter(rows("d.a", 3)))
            .await
            .unwrap();

        let ids: Vec<String> = store.load_jobs().await.into_iter().map(|j| j.job_id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].ends_with("-0"));
        assert!(ids[2].ends_with("-2"));
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_reports_job() {
        let (storage, store) = setup().await;
        store.reject_table("d.bad").await;
        let mut input = rows("d.ok", 2);
        input.extend(rows("d.bad", 2));

        let loads = BatchLoads::with_storage(config(), store.clone(), storage).unwrap();
        let token = loads.token().clone();
        let err = loads.run(stream::iter(input)).await.unwrap_err();

        let load_error = err.load_error().expect("load error");
        assert!(load_error.job_id().unwrap().starts_with(token.as_str()));
        assert!(matches!(
            load_error.last_status(),
            Some(drift::JobStatus::Failed {
                retryable: false,
                ..
            })
        ));
        assert!(err.to_string().contains("d.bad"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (storage, store) = setup().await;
        let mut config = config();
        config.triggering_frequency_secs = Some(30);

        let result = BatchLoads::with_storage(config, store, storage);
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_run() {
        let (storage, store) = setup().await;
        let shutdown = tokio_util::sync::CancellationToken::new();
        shutdown.cancel();

        let err = BatchLoads::with_storage(config(), store.clone(), storage)
            .unwrap()
            .with_shutdown(shutdown)
            .run(stream::iter(rows("d.a", 3)))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Shutdown));
        assert!(store.load_jobs().await.is_empty());
    }
}

mod triggered_tests {
    use super::*;
    use futures::channel::mpsc;
    use std::time::Duration;

    fn triggered() -> LoadConfig {
        let mut config = config();
        config.triggering_frequency_secs = Some(60);
        config.num_file_shards = 2;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_trigger_writes_every_row() {
        let (storage, store) = setup().await;
        let mut config = triggered();
        config.file_triggering_record_count = 100;

        let result = BatchLoads::with_storage(config, store.clone(), storage.clone())
            .unwrap()
            .run(stream::iter(rows("d.a", 250)))
            .await
            .unwrap();

        // 125 rows per shard: one count pane of 100 and a drained rest each.
        assert_eq!(result.stats.files_written, 4);
        assert_eq!(result.stats.panes, 1);
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 250);
        assert_eq!(staged_files_left(&storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_count_is_per_destination() {
        let (storage, store) = setup().await;
        let mut config = triggered();
        config.triggering_frequency_secs = Some(30);
        config.num_file_shards = 1;
        config.file_triggering_record_count = 100;

        let (tx, rx) = mpsc::unbounded();
        let loads = BatchLoads::with_storage(config, store.clone(), storage.clone()).unwrap();
        let run = tokio::spawn(loads.run(rx));

        for row in rows("d.a", 150).into_iter().chain(rows("d.b", 60)) {
            tx.unbounded_send(row).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Only d.a reached the count; 50 d.a rows and all of d.b stay buffered.
        assert_eq!(staged_files_left(&storage).await, 1);
        assert!(store.load_jobs().await.is_empty());

        drop(tx);
        let result = run.await.unwrap().unwrap();
        assert_eq!(result.stats.files_written, 3);
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 150);
        assert_eq!(store.table_rows("d.b").await.unwrap().len(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frequency_timer_is_per_destination() {
        let (storage, store) = setup().await;
        let mut config = triggered();
        config.triggering_frequency_secs = Some(30);
        config.num_file_shards = 1;

        let (tx, rx) = mpsc::unbounded();
        let loads = BatchLoads::with_storage(config, store.clone(), storage.clone()).unwrap();
        let run = tokio::spawn(loads.run(rx));

        for row in rows("d.a", 4) {
            tx.unbounded_send(row).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(20)).await;
        for row in rows("d.b", 4) {
            tx.unbounded_send(row).unwrap();
        }

        // d.a fired at 30s; d.b first buffered at 20s, so not before 50s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(staged_files_left(&storage).await, 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(staged_files_left(&storage).await, 2);

        drop(tx);
        let result = run.await.unwrap().unwrap();
        assert_eq!(result.stats.files_written, 2);
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 4);
        assert_eq!(store.table_rows("d.b").await.unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staged_panes_commit_per_pane() {
        let (storage, store) = setup().await;
        store.create_table("d.a", vec![json!({"old": true})]).await;
        let mut config = triggered();
        config.write_disposition = WriteDisposition::WriteTruncate;
        config.partition_limits.max_files = 1;
        let token = JobIdToken::new("tick");
        let dest = drift::DestinationKey::new("d.a");

        let (tx, rx) = mpsc::unbounded();
        let loads = BatchLoads::with_storage(config, store.clone(), storage)
            .unwrap()
            .with_token(token.clone());
        let run = tokio::spawn(loads.run(rx));

        for row in rows("d.a", 10) {
            tx.unbounded_send(row).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(store.copy_jobs().await.len(), 1);

        for row in rows("d.a", 10) {
            tx.unbounded_send(row).unwrap();
        }
        drop(tx);

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.stats.panes, 2);
        assert_eq!(result.stats.commits, 2);
        assert_eq!(result.stats.temp_tables, 4);

        let copies = store.copy_jobs().await;
        let ids: Vec<String> = copies.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                drift::job::copy_job_id(&token, &dest, 0, 0),
                drift::job::copy_job_id(&token, &dest, 1, 0),
            ]
        );
        let writes: Vec<WriteDisposition> = copies.iter().map(|j| j.dispositions.write).collect();
        assert_eq!(
            writes,
            vec![WriteDisposition::WriteTruncate, WriteDisposition::WriteAppend]
        );

        let table = store.table_rows("d.a").await.unwrap();
        assert_eq!(table.len(), 20);
        assert!(table.iter().all(|row| row.get("old").is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_panes_append() {
        let (storage, store) = setup().await;
        store.create_table("d.a", vec![json!({"old": true})]).await;
        let mut config = triggered();
        config.write_disposition = WriteDisposition::WriteTruncate;

        let (tx, rx) = mpsc::unbounded();
        let loads = BatchLoads::with_storage(config, store.clone(), storage).unwrap();
        let run = tokio::spawn(loads.run(rx));

        for row in rows("d.a", 3) {
            tx.unbounded_send(row).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(store.table_rows("d.a").await.unwrap().len(), 3);

        for row in rows("d.a", 2) {
            tx.unbounded_send(row).unwrap();
        }
        drop(tx);

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.stats.panes, 2);

        let table = store.table_rows("d.a").await.unwrap();
        assert_eq!(table.len(), 5);
        assert!(table.iter().all(|row| row.get("old").is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_singleton_without_rows_creates_table() {
        let (storage, store) = setup().await;
        let mut config = triggered();
        config.singleton_table = true;
        config.default_destination = Some("d.default".to_string());

        let result = BatchLoads::with_storage(config, store.clone(), storage)
            .unwrap()
            .run(stream::iter(Vec::<KeyedRow>::new()))
            .await
            .unwrap();

        assert_eq!(result.stats.panes, 1);
        assert_eq!(store.table_rows("d.default").await, Some(Vec::new()));
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
temp_location: gs://bucket/tmp
write_disposition: WRITE_APPEND
create_disposition: CREATE_NEVER
num_file_shards: 4
triggering_frequency_secs: 300
partition_limits:
  max_files: 100
poll:
  initial_ms: 500
global:
  total_concurrency: 8
"#;
        let config = LoadConfig::parse(yaml).unwrap();

        assert_eq!(config.write_disposition, WriteDisposition::WriteAppend);
        assert_eq!(config.num_file_shards, 4);
        assert_eq!(config.partition_limits.max_files, 100);
        assert_eq!(config.partition_limits.max_bytes, drift::config::MAX_SIZE_BYTES);
        assert_eq!(config.poll.initial_ms, 500);
        assert_eq!(config.global.total_concurrency, Some(8));
        assert!(matches!(
            config.trigger_mode(),
            drift::config::TriggerMode::Triggered { .. }
        ));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(LoadConfig::parse("temp_location: memory://\nbogus: 1").is_err());
    }
}
