use crossbeam_channel::unbounded;
use siphon_config::SiphonConfig;
use siphon_engine::{
    EngineError, ErrorKind, ExtractError, ExtractionEngine, ExtractionInput, ExtractionStatus,
    FsResolver, PressureLevel, Priority, RawFields, SyntheticResolver, TaskContext, TaskSpec,
    TaskState,
};
use siphon_memory::{FixedSampler, MemoryReading, MIB};
use std::sync::Arc;
use std::time::Duration;

/// Counts bytes and slices and records whether the input was streamed.
fn byte_counter(input: ExtractionInput, _ctx: &TaskContext) -> Result<RawFields, ExtractError> {
    let streaming = input.is_streaming();
    let mut bytes = 0u64;
    let mut slices = 0u64;
    input.for_each_slice(|slice| {
        bytes += slice.len() as u64;
        slices += 1;
        Ok(())
    })?;
    let mut fields = RawFields::new();
    fields.insert("bytes".into(), bytes.into());
    fields.insert("slices".into(), slices.into());
    fields.insert("streaming".into(), streaming.into());
    Ok(fields)
}

fn small_config() -> SiphonConfig {
    SiphonConfig::load_from_str(
        r#"
[stream]
streaming_threshold_bytes = "1MiB"
chunk_size_bytes = "256KiB"

[scheduler]
workers = 2
default_timeout_ms = 30000
backoff_base_ms = 1
backoff_cap_ms = 5
"#,
    )
    .unwrap()
}

fn synthetic_engine(resolver: SyntheticResolver) -> ExtractionEngine {
    ExtractionEngine::builder(small_config())
        .resolver(resolver)
        .default_extractor(byte_counter)
        .build()
        .unwrap()
}

#[test]
fn large_files_stream_and_small_files_are_read_whole() {
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("big.bin", 64 * MIB, 7);
    resolver.insert_generated("small.bin", 4096, 7);
    let engine = synthetic_engine(resolver);

    let big = engine.submit("big.bin", "bin", Priority::Normal).unwrap();
    let small = engine.submit("small.bin", "bin", Priority::High).unwrap();

    let big = engine.result(&big);
    assert_eq!(big.status, ExtractionStatus::Success, "{:?}", big.error);
    let fields = big.metadata.unwrap();
    assert_eq!(fields["streaming"], true);
    assert_eq!(fields["bytes"], 64 * MIB);
    assert_eq!(fields["slices"], 256);

    let small = engine.result(&small);
    let fields = small.metadata.unwrap();
    assert_eq!(fields["streaming"], false);
    assert_eq!(fields["bytes"], 4096);

    let totals = engine.metrics_snapshot().totals;
    assert_eq!(totals.count, 2);
    assert_eq!(totals.success, 2);
}

#[test]
fn repeated_small_reads_hit_the_cache() {
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("small.bin", 2048, 1);
    let engine = synthetic_engine(resolver);

    for _ in 0..2 {
        let result = engine.run_sync(TaskSpec::new("small.bin", "bin")).unwrap();
        assert!(result.is_success());
    }
    let stats = engine.cache_stats();
    assert_eq!(stats.insertions, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.occupied_bytes, 2048);
}

#[test]
fn critical_pressure_sheds_the_cache_and_forces_streaming() {
    let resolver = SyntheticResolver::new();
    for idx in 0..10 {
        resolver.insert_generated(format!("f{idx}"), 1000, idx);
    }
    let engine = synthetic_engine(resolver);
    let handles = engine
        .submit_batch((0..10).map(|idx| TaskSpec::new(format!("f{idx}"), "bin")))
        .unwrap();
    for handle in &handles {
        assert!(engine.result(handle).is_success());
    }
    assert_eq!(engine.cache_stats().occupied_bytes, 10_000);

    engine.monitor().force_level(PressureLevel::Critical);
    assert_eq!(engine.pressure_level(), PressureLevel::Critical);
    let stats = engine.cache_stats();
    assert!(stats.occupied_bytes <= 1_000, "{stats:?}");
    assert!(stats.evictions.pressure >= 9);

    let result = engine.run_sync(TaskSpec::new("f0", "bin")).unwrap();
    assert_eq!(result.metadata.unwrap()["streaming"], true);
    assert_eq!(engine.cache_stats().insertions, 10);
}

#[test]
fn sampled_pressure_drives_the_level() {
    let sampler = Arc::new(FixedSampler::new(MemoryReading::at_percent(1 << 30, 40.0)));
    let engine = ExtractionEngine::builder(small_config())
        .resolver(SyntheticResolver::new())
        .sampler(sampler.clone())
        .build()
        .unwrap();

    engine.monitor().sample_now().unwrap();
    assert_eq!(engine.pressure_level(), PressureLevel::Normal);
    sampler.set_percent(90.0);
    engine.monitor().sample_now().unwrap();
    assert_eq!(engine.pressure_level(), PressureLevel::High);
    assert_eq!(engine.cache_stats().level, PressureLevel::High);
}

#[test]
fn started_engine_samples_in_the_background() {
    let mut config = small_config();
    config.memory.sample_interval_ms = 5;
    let sampler = Arc::new(FixedSampler::new(MemoryReading::at_percent(1 << 30, 97.0)));
    let engine = ExtractionEngine::builder(config)
        .resolver(SyntheticResolver::new())
        .sampler(sampler)
        .start()
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while engine.pressure_level() != PressureLevel::Critical {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }
    engine.shutdown();
    assert!(!engine.monitor().is_running());
}

#[test]
fn unknown_formats_fail_permanently_without_retries() {
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("mystery.xyz", 100, 0);
    let engine = ExtractionEngine::builder(small_config())
        .resolver(resolver)
        .extractor("bin", byte_counter)
        .build()
        .unwrap();

    let result = engine.run_sync(TaskSpec::new("mystery.xyz", "xyz")).unwrap();
    assert_eq!(result.status, ExtractionStatus::Failed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error.unwrap().kind(), ErrorKind::PermanentFormat);
}

#[test]
fn missing_files_are_task_errors() {
    let engine = synthetic_engine(SyntheticResolver::new());
    let result = engine.run_sync(TaskSpec::new("absent", "bin")).unwrap();
    assert_eq!(result.status, ExtractionStatus::Failed);
    assert!(matches!(result.error, Some(ExtractError::NotFound { .. })));
}

#[test]
fn reads_csv_files_from_disk_line_by_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rows.csv");
    let mut contents = String::from("id,name\n");
    for idx in 0..50_000 {
        contents.push_str(&format!("{idx},row-{idx}\n"));
    }
    std::fs::write(&path, &contents).unwrap();

    let engine = ExtractionEngine::builder(small_config())
        .resolver(FsResolver::rooted(dir.path()))
        .extractor(
            "csv",
            |input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
                let mut lines = 0u64;
                input.for_each_slice(|slice| {
                    lines += slice.iter().filter(|byte| **byte == b'\n').count() as u64;
                    Ok(())
                })?;
                let mut fields = RawFields::new();
                fields.insert("lines".into(), lines.into());
                Ok(fields)
            },
        )
        .build()
        .unwrap();

    let result = engine.run_sync(TaskSpec::new("rows.csv", "csv")).unwrap();
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.metadata.unwrap()["lines"], 50_001);
    let csv = engine.metrics_snapshot();
    assert_eq!(csv.format("csv").map(|m| m.success), Some(1));
}

#[test]
fn try_result_reports_unfinished_tasks() {
    let (release_tx, release_rx) = unbounded::<()>();
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("held", 10, 0);
    let engine = ExtractionEngine::builder(small_config())
        .resolver(resolver)
        .default_extractor(
            move |_input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
                Ok(RawFields::new())
            },
        )
        .build()
        .unwrap();

    let handle = engine.submit("held", "bin", Priority::Normal).unwrap();
    assert!(matches!(
        engine.try_result(&handle),
        Err(EngineError::NotFinished(id)) if id == handle.id()
    ));
    assert!(!engine.status(&handle).state.is_terminal());

    release_tx.send(()).unwrap();
    let result = engine.result(&handle);
    assert!(result.is_success());
    assert_eq!(engine.try_result(&handle).unwrap(), result);
    assert_eq!(engine.status(&handle).state, TaskState::Succeeded);
    assert!(!engine.cancel(&handle));
}

#[test]
fn cancelled_streams_stop_between_chunks() {
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("endless", 1 << 40, 3);
    let (started_tx, started_rx) = unbounded::<()>();
    let engine = ExtractionEngine::builder(small_config())
        .resolver(resolver)
        .default_extractor(
            move |input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
                let mut first = true;
                input.for_each_slice(|_slice| {
                    if first {
                        first = false;
                        let _ = started_tx.send(());
                    }
                    Ok(())
                })?;
                Ok(RawFields::new())
            },
        )
        .build()
        .unwrap();

    let handle = engine.submit("endless", "bin", Priority::Normal).unwrap();
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(engine.cancel(&handle));

    let result = engine
        .result_timeout(&handle, Duration::from_secs(30))
        .expect("cancelled stream finishes");
    assert_eq!(result.status, ExtractionStatus::Cancelled);
    assert_eq!(engine.metrics_snapshot().totals.cancelled, 1);
}

#[test]
fn caller_format_hints_cannot_grow_metrics_without_bound() {
    let mut config = small_config();
    config.metrics.max_formats = 4;
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("same", 64, 0);
    let engine = ExtractionEngine::builder(config)
        .resolver(resolver)
        .default_extractor(byte_counter)
        .build()
        .unwrap();

    let handles = engine
        .submit_batch((0..200).map(|idx| TaskSpec::new("same", format!("x{idx}"))))
        .unwrap();
    for handle in &handles {
        assert!(engine.result(handle).is_success());
    }
    let snapshot = engine.metrics_snapshot();
    assert!(snapshot.formats.len() <= 4, "{:?}", snapshot.formats.keys());
    assert_eq!(snapshot.totals.success, 200);
    assert!(snapshot.format(siphon_metrics::OTHER_FORMAT).is_some());
}

#[test]
fn invalid_config_is_rejected_at_build() {
    let mut config = SiphonConfig::default();
    config.scheduler.workers = Some(0);
    config.stream.chunk_size_bytes = siphon_config::ByteSize(0);
    let err = ExtractionEngine::builder(config).build().unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    let message = err.to_string();
    assert!(message.contains("scheduler.workers"), "{message}");
    assert!(message.contains("stream.chunk_size_bytes"), "{message}");
}

#[test]
fn shutdown_rejects_new_work() {
    let resolver = SyntheticResolver::new();
    resolver.insert_generated("a", 10, 0);
    let engine = synthetic_engine(resolver);
    assert!(engine.run_sync(TaskSpec::new("a", "bin")).unwrap().is_success());
    engine.shutdown();
    let err = engine.submit("a", "bin", Priority::Low).unwrap_err();
    assert_eq!(ExtractError::from(err).kind(), ErrorKind::ResourceExhaustion);
}
