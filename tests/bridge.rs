use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use framebridge::pipeline::{DeferredState, FrameOutcome};
use framebridge::utils::{chroma_dim, i420_size};
use framebridge::{BridgeConfig, CopyPath, FrameBridge, I420Frame, OutputSample, Pull, StatsConfig};

fn bridge(capacity: usize) -> FrameBridge {
    let config = BridgeConfig {
        ready_capacity: capacity,
        nominal_fps: 30.0,
    };
    FrameBridge::new(&config, &StatsConfig::default())
}

fn frame_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    (0..i420_size(width, height))
        .map(|i| seed.wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

fn sample(pull: Pull) -> OutputSample {
    match pull {
        Pull::Sample(sample) => sample,
        Pull::Deferred(_) => panic!("expected a ready sample"),
    }
}

/// Three differently sized frames into a queue of two: 3x2 (10 bytes), 4x2
/// (12 bytes) and 5x2 (16 bytes). No I420 shape packs into exactly 14 bytes,
/// so the growing third frame is 16.
#[test]
fn overflow_keeps_the_newest_frames_in_order() {
    let bridge = bridge(2);
    let shapes = [(3, 2), (4, 2), (5, 2)];
    let frames: Vec<_> = shapes
        .iter()
        .zip(1u8..)
        .map(|(&(w, h), seed)| frame_bytes(w, h, seed))
        .collect();
    assert_eq!(frames.iter().map(Vec::len).collect::<Vec<_>>(), [10, 12, 16]);
    for (&(w, h), data) in shapes.iter().zip(&frames) {
        bridge.on_frame(&I420Frame::tight(w, h, data)).unwrap();
    }

    let counts = bridge.counts();
    assert_eq!((counts.load, counts.skip), (3, 1));

    let second = sample(bridge.pull().unwrap());
    let third = sample(bridge.pull().unwrap());
    assert_eq!(second.data(), &frames[1][..]);
    assert_eq!(third.data(), &frames[2][..]);
    assert!(second.timestamp() < third.timestamp());
    assert_eq!(bridge.ready_len(), 0);
}

#[test]
fn late_pull_is_fulfilled_by_the_next_frame() {
    let bridge = bridge(1);
    let Pull::Deferred(deferred) = bridge.pull().unwrap() else {
        panic!("nothing has been pushed yet");
    };
    assert_eq!(bridge.counts().late, 1);
    assert!(matches!(deferred.try_take(), DeferredState::Waiting));

    let data = frame_bytes(4, 2, 7);
    assert_eq!(
        bridge.on_frame(&I420Frame::tight(4, 2, &data)).unwrap(),
        FrameOutcome::Served
    );

    let DeferredState::Ready(sample) = deferred.try_take() else {
        panic!("deferred pull should be fulfilled");
    };
    assert_eq!(sample.data(), &data[..]);
    assert_eq!(bridge.counts().present, 1);
    assert_eq!(bridge.ready_len(), 0);
    assert!(!bridge.has_pending());
}

/// Same pixels fed through every source layout must come out byte-identical.
#[test]
fn every_copy_path_yields_the_same_bytes() {
    let mut rng = StdRng::seed_from_u64(0x4652_4d42);

    for _ in 0..32 {
        let width = rng.random_range(1..=37u32);
        let height = rng.random_range(1..=23u32);
        let (cw, ch) = (chroma_dim(width) as usize, chroma_dim(height) as usize);
        let dims = [(width as usize, height as usize), (cw, ch), (cw, ch)];

        let tight: Vec<u8> = (0..i420_size(width, height)).map(|_| rng.random()).collect();
        let (y, rest) = tight.split_at(dims[0].0 * dims[0].1);
        let (u, v) = rest.split_at(cw * ch);

        // padded copy of the same planes, back to back
        let strides = dims.map(|(row, _)| row + rng.random_range(1..=16usize));
        let mut padded = Vec::new();
        for (plane, src) in [y, u, v].into_iter().enumerate() {
            let (row, rows) = dims[plane];
            for r in 0..rows {
                padded.extend_from_slice(&src[r * row..(r + 1) * row]);
                padded.extend((row..strides[plane]).map(|_| rng.random::<u8>()));
            }
        }

        // the same planes in separate allocations
        let (ys, us, vs) = (y.to_vec(), u.to_vec(), v.to_vec());

        let layouts = [
            (I420Frame::tight(width, height, &tight), CopyPath::Linear),
            (
                I420Frame::from_planes(width, height, y, u, v, dims[0].0, cw, cw),
                CopyPath::Linear,
            ),
            (
                I420Frame::from_planes(width, height, &ys, &us, &vs, dims[0].0, cw, cw),
                CopyPath::PerPlane,
            ),
            (I420Frame::packed(width, height, &padded, strides), CopyPath::PerRow),
        ];

        let bridge = bridge(1);
        for (frame, path) in layouts {
            assert_eq!(frame.copy_path(), path);
            bridge.on_frame(&frame).unwrap();
            let out = sample(bridge.pull().unwrap());
            assert_eq!(out.data(), &tight[..], "{path:?} {width}x{height}");
            bridge.on_processed(out.id());
        }
    }
}

#[test]
fn counters_balance_once_quiescent() {
    let mut rng = StdRng::seed_from_u64(7);
    let bridge = bridge(3);
    let data = frame_bytes(6, 4, 1);
    let mut deferred = Vec::new();

    for _ in 0..500 {
        if rng.random_bool(0.55) {
            bridge.on_frame(&I420Frame::tight(6, 4, &data)).unwrap();
        } else {
            match bridge.pull().unwrap() {
                Pull::Sample(sample) => bridge.on_processed(sample.id()),
                Pull::Deferred(d) => deferred.push(d),
            }
        }
    }
    while let Pull::Sample(sample) = bridge.pull().unwrap() {
        bridge.on_processed(sample.id());
    }

    let counts = bridge.counts();
    let queued = bridge.ready_len() as u64;
    assert_eq!(queued, 0);
    assert_eq!(
        counts.load,
        counts.present + counts.skip - counts.superseded + queued
    );
    assert_eq!(counts.dropped_frames(), counts.skip - counts.superseded);
}

#[test]
fn unsignalled_samples_are_reclaimed_by_a_later_completion() {
    let bridge = bridge(1);
    let data = frame_bytes(4, 2, 2);

    let mut last = None;
    for _ in 0..5 {
        bridge.on_frame(&I420Frame::tight(4, 2, &data)).unwrap();
        last = Some(sample(bridge.pull().unwrap()).id());
    }
    assert_eq!(bridge.samples_in_use(), 5);

    bridge.on_processed(last.unwrap());
    assert_eq!(bridge.samples_in_use(), 0);
    assert_eq!(bridge.free_samples(), 5);
}

#[test]
fn resolution_changes_flow_through() {
    let bridge = bridge(2);
    let small = frame_bytes(3, 2, 1);
    let large = frame_bytes(5, 2, 2);
    bridge.on_frame(&I420Frame::tight(3, 2, &small)).unwrap();
    bridge.on_frame(&I420Frame::tight(5, 2, &large)).unwrap();

    let first = sample(bridge.pull().unwrap());
    let second = sample(bridge.pull().unwrap());
    assert_eq!((first.width(), first.data()), (3, &small[..]));
    assert_eq!((second.width(), second.data()), (5, &large[..]));
}

#[test]
fn producer_and_consumer_on_separate_threads() {
    let bridge = Arc::new(bridge(2));
    let frames = 200u8;

    let producer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for seed in 0..frames {
                let data = frame_bytes(8, 6, seed);
                bridge.on_frame(&I420Frame::tight(8, 6, &data)).unwrap();
                if seed % 16 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    let consumer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            let mut last = None;
            while last != Some(frames - 1) {
                let sample = match bridge.pull().unwrap() {
                    Pull::Sample(sample) => sample,
                    Pull::Deferred(deferred) => match deferred.wait_timeout(Duration::from_secs(5)) {
                        DeferredState::Ready(sample) => sample,
                        other => panic!("deferred pull never fulfilled: {other:?}"),
                    },
                };
                // byte zero is seed * 31; 223 is its inverse mod 256
                let seed = sample.data()[0].wrapping_mul(223);
                assert_eq!(sample.data(), &frame_bytes(8, 6, seed)[..]);
                if let Some(prev) = last {
                    assert!(seed > prev, "frames out of order: {prev} then {seed}");
                }
                last = Some(seed);
                bridge.on_processed(sample.id());
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    bridge.shutdown();
    assert!(bridge.is_closed());
}
