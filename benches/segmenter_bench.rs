use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tn3270_relay::segmenter::{is_screen, segment, FrameSegmenter};

// A host burst: two screen paints and some chatter, each ending in IAC EOR
fn host_burst() -> Vec<u8> {
    let mut data = Vec::new();
    for row in 0..2u8 {
        data.extend_from_slice(&[0xF5, 0xC3, 0x11, 0x40 + row, 0x40]);
        data.extend(std::iter::repeat(0xC1).take(1900));
        data.extend_from_slice(&[0xFF, 0xEF]);
    }
    data.extend_from_slice(&[0x01, 0x02, 0xFF, 0xEF]);
    data
}

fn bench_segment(c: &mut Criterion) {
    let data = host_burst();

    c.bench_function("segment", |b| {
        b.iter(|| {
            let (frames, rest) = segment(black_box(&data));
            black_box(frames.iter().filter(|f| is_screen(f)).count());
            black_box(rest);
        })
    });
}

fn bench_chunked_push(c: &mut Criterion) {
    let data = host_burst();

    c.bench_function("frame_segmenter_2k_reads", |b| {
        b.iter(|| {
            let mut segmenter = FrameSegmenter::new();
            let mut frames = 0;
            for chunk in data.chunks(2048) {
                frames += segmenter.push(black_box(chunk)).len();
            }
            black_box(frames);
        })
    });
}

criterion_group!(benches, bench_segment, bench_chunked_push);
criterion_main!(benches);
