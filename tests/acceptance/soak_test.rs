//! Soak (long-duration stability) tests.
//!
//! A producer thread emits frames as fast as it can while a consumer reads
//! with blocking reads. Every sample the consumer sees must decode to the pen
//! position; torn or stale values count as corrupt.
//!
//! # Acceptance Criteria
//!
//! - Zero corrupt samples
//! - The consumer is released by shutdown
//! - Memory usage stable (no leaks > 1MB/hour)

use super::common::{get_memory_usage, LightpenRig, SoakResult};
use lightpen_common::DriverConfig;
use lightpen_core::{EdgeKind, ReadMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Maximum allowed memory growth per hour (bytes).
const MAX_MEMORY_GROWTH_PER_HOUR: u64 = 1024 * 1024;

/// Run a soak session for `duration`.
pub fn run_soak_test(duration: Duration) -> SoakResult {
    let config = DriverConfig::default();
    let rig = LightpenRig::start(&config);
    let LightpenRig {
        device,
        source,
        mut sim,
        ..
    } = rig;
    let handle = device.open(EdgeKind::Pulse).expect("open pulse channel");
    let stop = AtomicBool::new(false);
    let initial_memory = get_memory_usage();
    let start = Instant::now();

    let (frames, samples, corrupt, peak_memory_bytes) = thread::scope(|s| {
        let producer = s.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                sim.step_frame();
            }
            sim.frames()
        });

        let consumer = s.spawn(|| {
            let (mut samples, mut corrupt) = (0u64, 0u64);
            while let Ok(sample) = handle.read(ReadMode::Blocking) {
                samples += 1;
                if (sample.major, sample.minor, sample.aux) != (100, 20, false) {
                    corrupt += 1;
                }
            }
            (samples, corrupt)
        });

        let mut peak = initial_memory;
        while start.elapsed() < duration {
            thread::sleep(Duration::from_millis(100));
            peak = peak.max(get_memory_usage());
        }
        stop.store(true, Ordering::Release);
        let frames = producer.join().expect("producer panicked");
        device.request_shutdown();
        let (samples, corrupt) = consumer.join().expect("consumer panicked");
        (frames, samples, corrupt, peak)
    });

    if let Err(e) = device.shutdown(source.as_ref()) {
        println!("teardown incomplete: {e}");
    }

    let elapsed = start.elapsed();
    let hours = elapsed.as_secs_f64() / 3600.0;
    let growth = get_memory_usage().saturating_sub(initial_memory);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let growth_per_hour = (growth as f64 / hours) as u64;

    let result = SoakResult {
        duration: elapsed,
        frames,
        samples,
        corrupt,
        peak_memory_bytes,
        passed: corrupt == 0 && samples > 0 && growth_per_hour <= MAX_MEMORY_GROWTH_PER_HOUR,
    };

    println!("\nSoak test completed:");
    println!("  Duration: {:?}", result.duration);
    println!("  Frames: {}", result.frames);
    println!("  Samples: {}", result.samples);
    println!("  Corrupt: {}", result.corrupt);
    println!(
        "  Peak memory: {:.1}MB",
        result.peak_memory_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("  Result: {}", if result.passed { "PASSED" } else { "FAILED" });

    result
}

/// Short soak test - quick sanity check.
#[test]
#[ignore = "Soak test - takes 1 minute"]
fn test_soak_short() {
    let result = run_soak_test(Duration::from_secs(60));
    assert!(result.passed, "short soak test failed: {result:?}");
}

/// Long soak test - pre-release validation.
#[test]
#[ignore = "Soak test - takes 1 hour"]
fn test_soak_long() {
    let result = run_soak_test(Duration::from_secs(3600));
    assert!(result.passed, "long soak test failed: {result:?}");
    assert_eq!(result.corrupt, 0, "zero corrupt samples required");
}
