//! Cross-handle scenario tests exercising the fabric the way two real
//! processes would: independent `SharedCamera`/`SharedArray` attachments
//! within one test process, since the attach/refcount/lock code paths are
//! identical either way.

use std::time::Duration;

use tao_camera::consumer::Consumer;
use tao_camera::descriptor::{DescriptorConfig, SharedCamera};
use tao_camera::ring::ProducerRing;
use tao_clock::Time;
use tao_geometry::{PixelEncoding, Roi};
use tao_shm::Perm;

fn config() -> DescriptorConfig {
    DescriptorConfig {
        depth: 16,
        pixel_encoding: PixelEncoding::Mono16,
        weighted: false,
        sensor_width: 64,
        sensor_height: 64,
        roi: Roi {
            xoff: 0,
            yoff: 0,
            width: 16,
            height: 8,
            xbin: 1,
            ybin: 1,
        },
        bias: 0.0,
        gain: 1.0,
        framerate: 100.0,
        exposure_time: 0.005,
        gamma: 1.0,
    }
}

/// S1: ring size 4, width=16 height=8 uint16. Publish three frames with
/// counters 1, 2, 3 and the given capture timestamps; a consumer on slot 0
/// observes them in order with matching timestamps, and no recycled buffer
/// ever collides with the descriptor's current `lastFrame.ident`.
#[test]
fn scenario_s1_ordered_publish_and_consume() {
    let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
    let ident = cam.ident();
    let mut ring = ProducerRing::new(4, Perm::default()).unwrap();
    let mut consumer = Consumer::attach(ident, 0).unwrap();

    let timestamps = [
        Time { sec: 10, nsec: 0 },
        Time { sec: 10, nsec: 25_000_000 },
        Time { sec: 10, nsec: 50_000_000 },
    ];

    for (i, ts) in timestamps.iter().enumerate() {
        let snapshot = cam.lock().unwrap().snapshot();
        let arr = ring.fetch_next(&cam.lock().unwrap(), &snapshot).unwrap();
        {
            let mut guard = cam.lock().unwrap();
            ring.publish_next(&arr, &mut guard, *ts, &snapshot).unwrap();
        }
        arr.detach().unwrap();

        let frame = consumer.wait_for_frame().unwrap();
        let g = frame.lock().unwrap();
        assert_eq!(g.counter(), i as i64 + 1);
        assert_eq!(g.timestamp(), *ts);
        drop(g);
        frame.detach().unwrap();
    }

    consumer.detach().unwrap();
    cam.detach().unwrap();
}

/// S3: a descriptor in the `acquiring` state, posted and consumed three
/// times within a 500ms window via `timed_wait(slot=1, 0.1s)`. At most
/// three successful returns, zero timeouts.
#[test]
fn scenario_s3_bounded_semaphore_notifications() {
    let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
    {
        let mut guard = cam.lock().unwrap();
        guard.set_state(tao_camera::descriptor::state::ACQUIRING);
    }
    let ident = cam.ident();
    let consumer = Consumer::attach(ident, 1).unwrap();

    for _ in 0..3 {
        cam.semaphore(1).post().unwrap();
    }

    let mut acquired = 0;
    let mut timed_out = 0;
    for _ in 0..3 {
        match consumer.timed_wait(Duration::from_millis(100)).unwrap() {
            tao_sync::WaitOutcome::Acquired => acquired += 1,
            tao_sync::WaitOutcome::TimedOut => timed_out += 1,
            tao_sync::WaitOutcome::WouldBlock => unreachable!("timed_wait never reports WouldBlock"),
        }
    }

    assert_eq!(acquired, 3);
    assert_eq!(timed_out, 0);

    consumer.detach().unwrap();
    cam.detach().unwrap();
}

/// P4: across any run of publishes at a given ring depth, the counters a
/// consumer observes via `wait_for_frame` form a strictly increasing
/// sequence with no gaps, regardless of depth or run length.
#[test]
fn property_p4_publish_counters_increase_with_no_gaps() {
    use proptest::prelude::*;
    let prop_config = ProptestConfig::with_cases(24);
    proptest!(prop_config, |(depth in 2usize..6, n in 1usize..20)| {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let ident = cam.ident();
        let mut ring = ProducerRing::new(depth, Perm::default()).unwrap();
        let mut consumer = Consumer::attach(ident, 0).unwrap();

        for i in 0..n {
            let snapshot = cam.lock().unwrap().snapshot();
            let arr = ring.fetch_next(&cam.lock().unwrap(), &snapshot).unwrap();
            let ts = Time { sec: i as i64, nsec: 0 };
            {
                let mut guard = cam.lock().unwrap();
                ring.publish_next(&arr, &mut guard, ts, &snapshot).unwrap();
            }
            arr.detach().unwrap();

            let frame = consumer.wait_for_frame().unwrap();
            let counter = frame.lock().unwrap().counter();
            prop_assert_eq!(counter, i as i64 + 1);
            frame.detach().unwrap();
        }

        consumer.detach().unwrap();
        cam.detach().unwrap();
    });
}
