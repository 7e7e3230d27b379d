use super::*;
use crate::checkpoint::InMemoryCheckpointStorage;
use crate::connector::{MemorySink, MemorySource};
use crate::window::{AggregatorSnapshot, CollectingEmitter, TimeWindow, WindowAggregate};

const MIN: i64 = 60_000;

/// `host,event_time_ms` lines.
struct CsvDecoder;

impl Decoder for CsvDecoder {
    fn decode(&self, record: &SourceRecord) -> Result<HitEvent> {
        let text = std::str::from_utf8(&record.payload)?;
        let (host, ts) = text
            .split_once(',')
            .ok_or_else(|| EngineError::Decode(format!("no comma in {text:?}")))?;
        Ok(HitEvent::new(host, ts.parse()?, record.partition_id))
    }
}

fn line(host: &str, ts: i64) -> String {
    format!("{host},{ts}")
}

fn single_worker_config() -> EngineConfig {
    EngineConfig::default()
        .with_parallelism(1)
        .with_checkpoint_interval(Duration::from_secs(3600))
}

/// Collects emitted aggregates into a shared vector.
struct SharedEmitter(Arc<std::sync::Mutex<CollectingEmitter>>);

impl Emitter for SharedEmitter {
    fn emit(&mut self, aggregate: &crate::window::WindowAggregate) -> Result<()> {
        self.0
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .emit(aggregate)
    }
}

// ── Partitioner ───────────────────────────────────────────────────────────

#[test]
fn test_key_partitioner_same_host_same_worker() {
    let partitioner = KeyPartitioner::new();
    let a1 = HitEvent::new("example.com", 1, 0);
    let a2 = HitEvent::new("example.com", 999, 2);
    assert_eq!(partitioner.partition(&a1, 4), partitioner.partition(&a2, 4));
    assert_eq!(
        partitioner.partition(&a1, 4),
        partitioner.worker_for_host("example.com", 4)
    );
}

#[test]
fn test_key_partitioner_is_stable_across_instances() {
    // Fixed seeds: the mapping must survive a restart.
    let first = KeyPartitioner::new();
    let second = KeyPartitioner::default();
    for i in 0..100 {
        let host = format!("host-{i}.example");
        assert_eq!(
            first.worker_for_host(&host, 3),
            second.worker_for_host(&host, 3)
        );
    }
    assert_eq!(stable_hash("a"), stable_hash("a"));
    assert_ne!(stable_hash("a"), stable_hash("b"));
}

#[test]
fn test_key_partitioner_distribution() {
    let partitioner = KeyPartitioner::new();
    let mut counts = vec![0; 4];
    for i in 0..1000 {
        counts[partitioner.worker_for_host(&format!("user_{i}"), 4)] += 1;
    }
    for count in counts {
        assert!(
            count > 200 && count < 300,
            "Unbalanced distribution: {}",
            count
        );
    }
}

#[test]
fn test_key_partitioner_within_bounds() {
    let partitioner = KeyPartitioner::new();
    for i in 0..100 {
        let host = format!("h{i}");
        assert!(Partitioner::<str>::partition(&partitioner, &host, 3) < 3);
    }
}

// ── Worker ────────────────────────────────────────────────────────────────

#[test]
fn test_worker_emits_acks_and_stops() {
    let config = single_worker_config();
    let emitted = Arc::new(std::sync::Mutex::new(CollectingEmitter::new()));
    let (tx, rx) = crossbeam_channel::bounded(16);
    let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
    let worker = Worker::new(
        WindowAggregator::new(0, &config).unwrap(),
        Box::new(SharedEmitter(emitted.clone())),
        rx,
        ack_tx,
    );
    let handle = worker.spawn(tx).unwrap();

    handle.send(StreamElement::Record(HitEvent::new("a", MIN, 0))).unwrap();
    handle.send(StreamElement::Record(HitEvent::new("a", 2 * MIN, 0))).unwrap();
    handle.send(StreamElement::barrier(7)).unwrap();
    handle.send(StreamElement::Record(HitEvent::new("a", 6 * MIN, 0))).unwrap();
    handle.send(StreamElement::watermark(5 * MIN + 45_000)).unwrap();
    handle.send(StreamElement::Drain).unwrap();
    handle.send(StreamElement::End).unwrap();
    handle.join().unwrap();

    let WorkerCheckpointEvent::Ack(ack) = ack_rx.recv().unwrap() else {
        panic!("expected ack");
    };
    assert_eq!(ack.checkpoint_id, 7);
    assert_eq!(ack.worker_id, 0);
    // The snapshot reflects only the records before the barrier.
    let snapshot: AggregatorSnapshot = bincode::deserialize(&ack.state).unwrap();
    assert_eq!(snapshot.windows.len(), 1);
    assert_eq!(snapshot.windows.windows[0].count, 2);

    let emitted = emitted.lock().unwrap();
    let counts: Vec<(i64, u64)> = emitted
        .emitted
        .iter()
        .map(|agg| (agg.window.start, agg.count))
        .collect();
    assert_eq!(counts, vec![(0, 2), (5 * MIN, 1)]);
}

#[test]
fn test_worker_fires_on_broadcast_watermark_without_own_records() {
    let config = single_worker_config();
    let emitted = Arc::new(std::sync::Mutex::new(CollectingEmitter::new()));
    let (tx, rx) = crossbeam_channel::bounded(16);
    let (ack_tx, _ack_rx) = crossbeam_channel::unbounded();
    let worker = Worker::new(
        WindowAggregator::new(0, &config).unwrap(),
        Box::new(SharedEmitter(emitted.clone())),
        rx,
        ack_tx,
    );
    let handle = worker.spawn(tx).unwrap();

    handle.send(StreamElement::Record(HitEvent::new("a", MIN, 0))).unwrap();
    handle.send(StreamElement::watermark(4 * MIN)).unwrap();
    handle.send(StreamElement::watermark(20 * MIN)).unwrap();
    handle.send(StreamElement::End).unwrap();
    handle.join().unwrap();

    let emitted = emitted.lock().unwrap();
    assert_eq!(
        emitted.emitted,
        vec![WindowAggregate::new("a", TimeWindow::new(0, 5 * MIN), 1)]
    );
}

#[test]
fn test_worker_handle_send_after_exit_is_worker_failure() {
    let config = single_worker_config();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let (ack_tx, _ack_rx) = crossbeam_channel::unbounded();
    let worker = Worker::new(
        WindowAggregator::new(0, &config).unwrap(),
        Box::new(CollectingEmitter::new()),
        rx,
        ack_tx,
    );
    let handle = worker.spawn(tx).unwrap();
    handle.send(StreamElement::End).unwrap();
    while !handle.has_exited() {
        std::thread::sleep(Duration::from_millis(1));
    }

    let err = handle.send(StreamElement::Drain).unwrap_err();
    assert!(err.to_string().contains("worker 0 failed"), "unexpected: {err}");
}

// ── Pipeline ──────────────────────────────────────────────────────────────

#[test]
fn test_pipeline_counts_hosts_per_window() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![vec![
        line("a", 1_000),
        line("a", 2 * MIN),
        line("a", 4 * MIN + 59_000),
        line("b", 30_000),
        line("a", 5 * MIN + 15_000),
        line("b", 5 * MIN + 15_000),
    ]]);

    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink.clone(), &mut source)
            .unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();
    pipeline.shutdown(&mut source).unwrap();

    assert_eq!(sink.get(0, "a"), Some(3));
    assert_eq!(sink.get(0, "b"), Some(1));
    // The second window is still open.
    assert_eq!(sink.get(5 * MIN, "a"), None);
}

#[test]
fn test_pipeline_skips_undecodable_records_and_advances_offset() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![vec![
        line("a", 1_000),
        "garbage".to_string(),
        line("a", 2_000),
    ]]);

    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink, &mut source).unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(pipeline.offsets().get(&0), Some(&3));
    let metrics = pipeline.shutdown(&mut source).unwrap();
    assert_eq!(metrics.decode_errors, 1);
    assert_eq!(metrics.events_ingested, 2);
}

#[test]
fn test_pipeline_shutdown_takes_final_checkpoint_and_commits() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source =
        MemorySource::from_partitions(vec![vec![line("a", 1_000)], vec![line("b", 2_000)]]);
    let config = EngineConfig::default()
        .with_parallelism(2)
        .with_checkpoint_interval(Duration::from_secs(3600));

    let mut pipeline =
        AggregationPipeline::start(config, storage.clone(), sink, &mut source).unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();
    let metrics = pipeline.shutdown(&mut source).unwrap();

    assert_eq!(metrics.checkpoints_completed, 1);
    assert_eq!(storage.list_checkpoints().unwrap().len(), 1);
    assert_eq!(source.committed().get(&0), Some(&1));
    assert_eq!(source.committed().get(&1), Some(&1));
}

#[test]
fn test_pipeline_drain_emits_open_windows() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![vec![
        line("a", 1_000),
        line("a", 7 * MIN),
    ]]);

    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink.clone(), &mut source)
            .unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();
    pipeline.drain().unwrap();
    pipeline.shutdown(&mut source).unwrap();

    assert_eq!(sink.get(0, "a"), Some(1));
    assert_eq!(sink.get(5 * MIN, "a"), Some(1));
}

#[test]
fn test_pipeline_watermark_waits_for_slowest_partition() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![
        vec![line("a", MIN), line("a", 10 * MIN)],
        vec![line("b", MIN)],
    ]);

    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage.clone(), sink.clone(), &mut source)
            .unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();
    assert_eq!(pipeline.watermark(), Some(Watermark::new(MIN - 15_000)));
    pipeline.shutdown(&mut source).unwrap();
    assert!(sink.rows().is_empty());

    // The restarted driver resumes from the checkpointed partition watermarks.
    let mut source = MemorySource::from_partitions(vec![
        vec![line("a", MIN), line("a", 10 * MIN)],
        vec![line("b", MIN), line("b", 10 * MIN)],
    ]);
    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink.clone(), &mut source)
            .unwrap();
    assert_eq!(pipeline.watermark(), Some(Watermark::new(MIN - 15_000)));
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(false))
        .unwrap();
    pipeline.shutdown(&mut source).unwrap();

    assert_eq!(sink.get(0, "a"), Some(1));
    assert_eq!(sink.get(0, "b"), Some(1));
}

#[test]
fn test_pipeline_stops_on_shutdown_flag() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![vec![line("a", 1_000)]]);

    let mut pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink, &mut source).unwrap();
    pipeline
        .run(&mut source, &CsvDecoder, &AtomicBool::new(true))
        .unwrap();
    assert!(pipeline.offsets().is_empty());
    pipeline.shutdown(&mut source).unwrap();
}

#[test]
fn test_pipeline_kill_skips_final_checkpoint() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::new();
    let pipeline =
        AggregationPipeline::start(single_worker_config(), storage, sink, &mut source).unwrap();
    let metrics = pipeline.kill().unwrap();
    assert_eq!(metrics.checkpoints_completed, 0);
}

#[test]
fn test_pipeline_periodic_checkpoint_triggers_on_interval() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::from_partitions(vec![vec![line("a", 1_000)]]);
    let config = EngineConfig::default()
        .with_parallelism(1)
        .with_checkpoint_interval(Duration::from_millis(1));

    let mut pipeline =
        AggregationPipeline::start(config, storage, sink, &mut source).unwrap();
    let record = source.poll(Duration::ZERO).unwrap().unwrap();
    pipeline.ingest(record, &CsvDecoder).unwrap();
    std::thread::sleep(Duration::from_millis(5));

    let triggered = pipeline.maybe_checkpoint(&mut source).unwrap();
    assert_eq!(triggered, Some(1));

    // Waits for checkpoint 1 before taking checkpoint 2.
    let completed = pipeline.checkpoint(&mut source).unwrap().unwrap();
    assert_eq!(completed.checkpoint_id, 2);
    assert_eq!(pipeline.coordinator().completed_checkpoint_ids().unwrap(), vec![1, 2]);
    assert_eq!(completed.input_offsets.get(&0), Some(&1));
    pipeline.shutdown(&mut source).unwrap();
}

#[test]
fn test_pipeline_start_rejects_invalid_config() {
    let storage = Arc::new(InMemoryCheckpointStorage::new());
    let sink = Arc::new(MemorySink::new());
    let mut source = MemorySource::new();
    let err = AggregationPipeline::start(
        EngineConfig::default().with_parallelism(0),
        storage,
        sink,
        &mut source,
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("parallelism"), "unexpected: {err}");
}
