//! Frame ring synchronization protocol tests.
//!
//! These drive the core against the software backend, using its held
//! completion mode to simulate a GPU that accepts work but never finishes.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use render_core::backend::software::SoftwareBackend;
use render_core::{GpuBackend, RenderConfig, RenderDevice};

fn device_with_backend(latency: usize) -> (Arc<SoftwareBackend>, RenderDevice) {
    let software = Arc::new(SoftwareBackend::new());
    let backend: Arc<dyn GpuBackend> = software.clone();
    let config = RenderConfig::default()
        .with_frame_latency(latency)
        .with_size(16, 16)
        .with_upload_arena_size(4096);
    let device = RenderDevice::new(backend, config).unwrap();
    (software, device)
}

#[test]
fn fence_value_increases_monotonically_across_ring_cycles() {
    let (_, mut device) = device_with_backend(3);

    let mut previous = 0;
    for cycle in 1..=5u64 {
        device.begin_frame().unwrap();
        device.end_frame().unwrap();

        let completed = device.fence_completed();
        assert!(
            completed >= previous,
            "fence regressed at cycle {cycle}: {completed} < {previous}"
        );
        previous = completed;
    }

    // With an unheld software GPU every signal completes by submission order.
    assert_eq!(previous, 5);
}

#[test]
fn slot_fence_targets_trail_by_ring_size() {
    let (software, mut device) = device_with_backend(3);
    software.hold_completion();

    for _ in 0..3 {
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
    }

    // Slot k was signaled with value k+1; all three are still in flight.
    assert_eq!(software.pending_signals(), 3);
    let targets: Vec<u64> = device.ring().iter().map(|f| f.fence_target()).collect();
    assert_eq!(targets, vec![1, 2, 3]);
    assert_eq!(device.fence_completed(), 0);

    software.release_completion();
    assert_eq!(device.fence_completed(), 3);
}

/// With N=3 and a GPU that never finishes, the first three `begin_frame`
/// calls must proceed (their slots have fence target 0) and the fourth must
/// block until the oldest submission's signal is applied.
#[test]
fn fourth_begin_frame_blocks_until_oldest_frame_completes() {
    let (software, mut device) = device_with_backend(3);
    software.hold_completion();

    let (progress_tx, progress_rx) = mpsc::channel::<u64>();

    let worker = std::thread::spawn(move || {
        for _ in 0..5 {
            device.begin_frame().unwrap();
            progress_tx.send(device.frame_counter()).unwrap();
            device.end_frame().unwrap();
        }
        // Hand the device back so the main thread controls teardown.
        device
    });

    // Cycles 1..=3 run without waiting.
    for expected in 0..3u64 {
        let counter = progress_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("begin_frame should not block while fence targets are zero");
        assert_eq!(counter, expected);
    }

    // The 4th begin_frame needs fence >= 1 and must be blocked now.
    assert!(
        progress_rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "4th begin_frame proceeded although the GPU never completed frame 1"
    );

    // Completing the oldest submission (fence value 1) unblocks exactly one cycle.
    assert!(software.complete_one());
    let counter = progress_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(counter, 3);

    // The 5th begin_frame needs fence >= 2 and blocks again.
    assert!(progress_rx
        .recv_timeout(Duration::from_millis(300))
        .is_err());

    software.release_completion();
    let counter = progress_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(counter, 4);

    let device = worker.join().unwrap();

    // All five signals applied; teardown's fence wait returns immediately.
    device.wait_idle().unwrap();
    assert_eq!(device.fence_completed(), 5);
}

#[test]
fn latency_two_ring_reuses_slots_alternately() {
    let (_, mut device) = device_with_backend(2);

    for cycle in 0..6u64 {
        let expected_slot = (cycle % 2) as usize;
        assert_eq!(device.ring().slot_for(device.frame_counter()), expected_slot);
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
    }
    assert_eq!(device.frame_counter(), 6);
}

#[test]
fn shutdown_waits_for_all_in_flight_frames() {
    let (software, mut device) = device_with_backend(3);
    software.hold_completion();

    device.begin_frame().unwrap();
    device.end_frame().unwrap();
    device.begin_frame().unwrap();
    device.end_frame().unwrap();

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let waiter = std::thread::spawn(move || {
        device.wait_idle().unwrap();
        done_tx.send(()).unwrap();
        drop(device);
    });

    // wait_idle must block while frame 2's signal is still pending.
    assert!(done_rx.recv_timeout(Duration::from_millis(300)).is_err());

    software.release_completion();
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("wait_idle should return once all signals are applied");
    waiter.join().unwrap();
}
