use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use voicelink::audio::jitter::{JitterBuffer, JitterConfig};
use voicelink::codec::Linear16;
use voicelink::protocol;

const FRAME_SIZE: usize = 320;

fn bench_framing(c: &mut Criterion) {
    let payload = vec![0x5Au8; 160];
    let packet = protocol::encode(&payload, 12_345);

    c.bench_function("protocol_encode", |b| {
        b.iter(|| protocol::encode(black_box(&payload), black_box(12_345)))
    });
    c.bench_function("protocol_decode", |b| {
        b.iter(|| protocol::decode(black_box(&packet)))
    });
}

fn bench_jitter(c: &mut Criterion) {
    let frame = Bytes::from(vec![0u8; FRAME_SIZE * 2]);
    let config = JitterConfig {
        frame_size: FRAME_SIZE as u32,
        capacity: 64,
        delay_frames: 2,
        resync_after: 50,
    };

    c.bench_function("jitter_put_get_in_order", |b| {
        let mut jitter = JitterBuffer::new(Box::new(Linear16::new(FRAME_SIZE)), config);
        let mut ts = 0u32;
        b.iter(|| {
            jitter.put(frame.clone(), ts);
            ts = ts.wrapping_add(FRAME_SIZE as u32);
            black_box(jitter.get())
        })
    });

    c.bench_function("jitter_put_get_swapped_pairs", |b| {
        let mut jitter = JitterBuffer::new(Box::new(Linear16::new(FRAME_SIZE)), config);
        let mut ts = 0u32;
        let step = FRAME_SIZE as u32;
        b.iter(|| {
            jitter.put(frame.clone(), ts.wrapping_add(step));
            jitter.put(frame.clone(), ts);
            ts = ts.wrapping_add(2 * step);
            black_box(jitter.get());
            black_box(jitter.get())
        })
    });
}

criterion_group!(benches, bench_framing, bench_jitter);
criterion_main!(benches);
