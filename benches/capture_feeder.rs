use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rpi_mjpeg_streamer::capture::CaptureFeeder;
use rpi_mjpeg_streamer::client::JpegExtractor;
use rpi_mjpeg_streamer::frame::FrameSlot;
use rpi_mjpeg_streamer::streaming::multipart::encode_part;
use std::sync::Arc;

fn create_test_jpeg(size: usize) -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8]; // SOI
    jpeg.extend((0..size).map(|i| (i % 255) as u8));
    jpeg.extend(&[0xFF, 0xD9]); // EOI
    jpeg
}

/// Ten frames back to back, as an encoder would write them
fn create_stream(frame_size: usize) -> Vec<u8> {
    (0..10).flat_map(|_| create_test_jpeg(frame_size)).collect()
}

fn benchmark_feeder_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("feeder_on_bytes");

    // Typical 640x480 frames at various qualities
    for size in [20_000, 50_000, 100_000].iter() {
        let stream = create_stream(*size);
        group.throughput(Throughput::Bytes(stream.len() as u64));

        // 4 KiB pipe reads vs 64 KiB reads
        for chunk in [4096, 65536].iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("chunk_{}", chunk), size),
                &stream,
                |b, stream| {
                    let slot = Arc::new(FrameSlot::new());
                    let mut feeder = CaptureFeeder::new(slot, 4 * 1024 * 1024);
                    b.iter(|| {
                        for piece in stream.chunks(*chunk) {
                            feeder.on_bytes(black_box(piece));
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

fn benchmark_client_extractor(c: &mut Criterion) {
    let body: Vec<u8> = (0..10)
        .flat_map(|_| encode_part(&create_test_jpeg(50_000)).to_vec())
        .collect();

    let mut group = c.benchmark_group("jpeg_extractor");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("multipart_body_16k_chunks", |b| {
        let mut extractor = JpegExtractor::new(4 * 1024 * 1024);
        b.iter(|| {
            for piece in body.chunks(16 * 1024) {
                black_box(extractor.push(piece));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_feeder_scan, benchmark_client_extractor);
criterion_main!(benches);
