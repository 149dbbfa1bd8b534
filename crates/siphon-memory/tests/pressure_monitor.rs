use siphon_memory::{
    FixedSampler, MemoryReading, MonitorConfig, MonitorHealth, PressureEvent, PressureLevel,
    PressureMonitor,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn fixed_monitor(percent: f64, config: MonitorConfig) -> (PressureMonitor, Arc<FixedSampler>) {
    let sampler = Arc::new(FixedSampler::new(MemoryReading::at_percent(1 << 30, percent)));
    let monitor = PressureMonitor::with_sampler(config, sampler.clone());
    (monitor, sampler)
}

fn record_events(monitor: &PressureMonitor) -> Arc<Mutex<Vec<PressureEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    monitor.register_callback(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

#[test]
fn callbacks_fire_only_on_level_change() {
    let (monitor, sampler) = fixed_monitor(10.0, MonitorConfig::default());
    let events = record_events(&monitor);

    for percent in [10.0, 20.0, 72.0, 75.0, 80.0, 86.0, 86.5, 97.0, 97.0, 40.0] {
        sampler.set_percent(percent);
        monitor.sample_now().unwrap();
    }

    let transitions: Vec<(PressureLevel, PressureLevel)> = events
        .lock()
        .unwrap()
        .iter()
        .map(|event| (event.previous, event.level))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (PressureLevel::Normal, PressureLevel::Elevated),
            (PressureLevel::Elevated, PressureLevel::High),
            (PressureLevel::High, PressureLevel::Critical),
            (PressureLevel::Critical, PressureLevel::Normal),
        ]
    );
    assert!(events.lock().unwrap().iter().all(|event| event.sample.is_some()));
}

#[test]
fn unregistered_callbacks_are_not_invoked() {
    let (monitor, _sampler) = fixed_monitor(10.0, MonitorConfig::default());
    let events = Arc::new(Mutex::new(0usize));
    let sink = events.clone();
    let id = monitor.register_callback(move |_| *sink.lock().unwrap() += 1);

    monitor.force_level(PressureLevel::High);
    assert!(monitor.unregister_callback(id));
    assert!(!monitor.unregister_callback(id));
    monitor.force_level(PressureLevel::Critical);

    assert_eq!(*events.lock().unwrap(), 1);
}

#[test]
fn failures_keep_last_level_and_go_stale_after_three() {
    let (monitor, sampler) = fixed_monitor(90.0, MonitorConfig::default());
    monitor.sample_now().unwrap();
    assert_eq!(monitor.current_level(), PressureLevel::High);

    sampler.fail("meminfo unreadable");
    assert!(monitor.sample_now().is_err());
    assert!(monitor.sample_now().is_err());
    assert_eq!(monitor.health(), MonitorHealth::Healthy);
    assert!(monitor.sample_now().is_err());
    assert_eq!(
        monitor.health(),
        MonitorHealth::Stale {
            consecutive_failures: 3
        }
    );
    assert_eq!(monitor.current_level(), PressureLevel::High);
    assert_eq!(monitor.history().len(), 1);

    sampler.set_percent(10.0);
    monitor.sample_now().unwrap();
    assert_eq!(monitor.health(), MonitorHealth::Healthy);
    assert_eq!(monitor.current_level(), PressureLevel::Normal);
}

#[test]
fn forced_level_is_replaced_by_next_sample() {
    let (monitor, _sampler) = fixed_monitor(10.0, MonitorConfig::default());
    let events = record_events(&monitor);

    monitor.force_level(PressureLevel::Critical);
    assert_eq!(monitor.current_level(), PressureLevel::Critical);
    assert_eq!(monitor.eviction_target_bytes(1_000), 900);

    monitor.sample_now().unwrap();
    assert_eq!(monitor.current_level(), PressureLevel::Normal);
    assert_eq!(monitor.eviction_target_bytes(1_000), 0);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[0].sample.is_none());
}

#[test]
fn background_loop_samples_until_stopped() {
    let config = MonitorConfig {
        interval: Duration::from_millis(5),
        ..MonitorConfig::default()
    };
    let (monitor, sampler) = fixed_monitor(10.0, config);
    monitor.start().unwrap();
    monitor.start().unwrap();
    assert!(monitor.is_running());

    sampler.set_percent(96.0);
    let deadline = Instant::now() + Duration::from_secs(5);
    while monitor.current_level() != PressureLevel::Critical && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(monitor.current_level(), PressureLevel::Critical);

    monitor.stop();
    assert!(!monitor.is_running());
    let recorded = monitor.history().len();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(monitor.history().len(), recorded);
}

#[test]
fn dropping_the_last_handle_stops_sampling() {
    let config = MonitorConfig {
        interval: Duration::from_millis(1),
        ..MonitorConfig::default()
    };
    let (monitor, sampler) = fixed_monitor(10.0, config);
    monitor.start().unwrap();
    drop(monitor);
    // The sampler is only referenced by the monitor and this test once the loop exits.
    let deadline = Instant::now() + Duration::from_secs(5);
    while Arc::strong_count(&sampler) > 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(Arc::strong_count(&sampler), 1);
}

#[test]
fn level_reads_are_concurrent_with_sampling() {
    let config = MonitorConfig {
        interval: Duration::from_millis(1),
        ..MonitorConfig::default()
    };
    let (monitor, sampler) = fixed_monitor(50.0, config);
    monitor.start().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let _ = monitor.current_level();
                    let _ = monitor.latest_sample();
                }
            })
        })
        .collect();
    for percent in [60.0, 75.0, 90.0, 99.0] {
        sampler.set_percent(percent);
        std::thread::sleep(Duration::from_millis(2));
    }
    for reader in readers {
        reader.join().unwrap();
    }
    monitor.stop();
}
