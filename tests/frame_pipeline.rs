use rpi_mjpeg_streamer::capture::{CaptureFeeder, MIN_BUFFER_BYTES};
use rpi_mjpeg_streamer::frame::{FrameSlot, Wait};
use rpi_mjpeg_streamer::streaming::{SessionRegistry, StreamMultiplexer};
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn jpeg(tag: u8, payload: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, tag];
    // 0xFF inside the payload must not be mistaken for a marker
    data.extend((0..payload).map(|i| if i % 7 == 0 { 0xFF } else { tag }));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Splits `data` into chunks cycling through `sizes`
fn split<'a>(data: &'a [u8], sizes: &'a [usize]) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut rest = data;
    for size in sizes.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at((*size).min(rest.len()));
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[rstest]
#[case::single_bytes(&[1])]
#[case::pairs(&[2])]
#[case::odd(&[3, 5, 7])]
#[case::frame_sized(&[32])]
#[case::irregular(&[1, 100, 2, 17, 64, 1, 1])]
#[case::one_chunk(&[usize::MAX])]
fn test_n_frames_any_split_publish_in_order(#[case] sizes: &[usize]) {
    const N: u8 = 20;

    let frames: Vec<Vec<u8>> = (1..=N).map(|tag| jpeg(tag, 20 + tag as usize)).collect();
    let stream: Vec<u8> = frames.concat();

    let slot = Arc::new(FrameSlot::new());
    let mut feeder = CaptureFeeder::new(Arc::clone(&slot), MIN_BUFFER_BYTES);

    let mut last_seen = 0;
    for chunk in split(&stream, sizes) {
        feeder.on_bytes(chunk);
        if let Some(frame) = slot.peek() {
            // Sequence k always carries the k-th frame of the stream
            assert!(frame.sequence() >= last_seen);
            assert_eq!(
                frame.data().as_ref(),
                frames[frame.sequence() as usize - 1].as_slice()
            );
            last_seen = frame.sequence();
        }
    }
    feeder.finish();

    let last = slot.peek().expect("no frame published");
    assert_eq!(last.sequence(), N as u64);
    assert_eq!(last.data().as_ref(), frames[N as usize - 1].as_slice());
    assert_eq!(feeder.stats().frames_published, N as u64);
    assert_eq!(feeder.stats().bytes_discarded, 0);
}

#[rstest]
#[case(1)]
#[case(10)]
#[case(31)]
fn test_split_marker_at_every_frame_boundary(#[case] payload: usize) {
    let slot = Arc::new(FrameSlot::new());
    let mut feeder = CaptureFeeder::new(Arc::clone(&slot), MIN_BUFFER_BYTES);

    for tag in 1..=5u8 {
        let frame = jpeg(tag, payload);
        // Cut right between 0xFF and 0xD8
        feeder.on_bytes(&frame[..1]);
        feeder.on_bytes(&frame[1..]);
        assert_eq!(slot.sequence(), tag as u64 - 1);
    }

    assert_eq!(feeder.stats().frames_published, 4);
    assert_eq!(slot.peek().unwrap().data().as_ref(), jpeg(4, payload).as_slice());
}

#[tokio::test(start_paused = true)]
async fn test_fast_producer_slow_consumer_no_drift() {
    const EMITTED: u32 = 1000;
    const PRODUCER_PERIOD: Duration = Duration::from_millis(10);

    let slot = Arc::new(FrameSlot::new());
    let registry = SessionRegistry::new(1);
    let interval = Duration::from_secs_f64(1.0 / 15.0);

    let producer_slot = Arc::clone(&slot);
    let producer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRODUCER_PERIOD);
        let mut n = 0u32;
        loop {
            ticker.tick().await;
            n += 1;
            if producer_slot.publish(n.to_be_bytes().to_vec()).is_none() {
                break;
            }
        }
    });

    let start = Instant::now();
    let mut mux = StreamMultiplexer::new(Arc::clone(&slot), registry.open(interval).unwrap());

    let mut last_sequence = 0;
    let mut last_emit = start;
    for _ in 0..EMITTED {
        let frame = mux.next_frame().await.expect("slot closed");
        assert!(frame.sequence() > last_sequence);
        last_sequence = frame.sequence();
        last_emit = Instant::now();
    }

    slot.close();
    let _ = producer.await;

    // Emission k happens at start + k * interval; no cumulative drift
    let elapsed = last_emit - start;
    let ideal = interval * (EMITTED - 1);
    assert!(elapsed >= ideal, "ran ahead: {:?} < {:?}", elapsed, ideal);
    assert!(elapsed < ideal + interval, "drifted: {:?} vs {:?}", elapsed, ideal);

    // ~6.7 producer frames per emission, the rest skipped
    let produced = last_sequence as f64;
    let rate = EMITTED as f64 / produced;
    assert!((0.12..0.18).contains(&rate), "emit/produce ratio {}", rate);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_camera_sends_no_duplicates() {
    let slot = Arc::new(FrameSlot::new());
    let registry = SessionRegistry::new(1);
    let interval = Duration::from_millis(50);
    let mut mux = StreamMultiplexer::new(Arc::clone(&slot), registry.open(interval).unwrap());

    slot.publish("only frame");
    assert_eq!(mux.next_frame().await.unwrap().sequence(), 1);

    // Camera stalls for 100 intervals, then closes
    let closer = {
        let slot = Arc::clone(&slot);
        tokio::spawn(async move {
            tokio::time::sleep(interval * 100).await;
            slot.close();
        })
    };

    assert!(mux.next_frame().await.is_none());
    assert_eq!(mux.session().frames_sent(), 1);
    closer.await.unwrap();
}

#[test]
fn test_skipping_reader_sees_only_latest() {
    let slot = FrameSlot::new();

    slot.publish("A");
    let a = match slot.wait_next(0, Duration::ZERO) {
        Wait::Frame(frame) => frame,
        other => panic!("unexpected {:?}", other),
    };

    slot.publish("B");
    slot.publish("C");

    match slot.wait_next(a.sequence(), Duration::from_millis(10)) {
        Wait::Frame(frame) => {
            assert_eq!(frame.data(), "C");
            assert_eq!(frame.sequence(), 3);
        }
        other => panic!("unexpected {:?}", other),
    }
}
