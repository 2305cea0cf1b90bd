use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use grape_bsp::archive::OutArchive;
use grape_bsp::parallel::{Outbox, ThreadLocalMessageBuffer};

const FNUM: usize = 8;
const MESSAGES: u64 = 100_000;

fn bench_send_to_fragment(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_send");
    group.throughput(Throughput::Bytes(MESSAGES * 8));

    for &block_size in &[256usize, 4096, 2 * 1023 * 64] {
        let outbox = Arc::new(Outbox::new(0));
        let mut channel =
            ThreadLocalMessageBuffer::new(FNUM, Arc::clone(&outbox), block_size, block_size + 64);

        group.bench_with_input(BenchmarkId::new("u64", block_size), &block_size, |b, _| {
            b.iter(|| {
                for i in 0..MESSAGES {
                    channel.send_to_fragment((i as usize) % FNUM, &i);
                }
                channel.flush_messages();
                black_box(outbox.take_outgoing());
                black_box(outbox.take_loopback());
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_decode");
    group.throughput(Throughput::Bytes(MESSAGES * 16));

    let outbox = Arc::new(Outbox::new(0));
    let mut channel = ThreadLocalMessageBuffer::new(2, Arc::clone(&outbox), usize::MAX, 0);
    for i in 0..MESSAGES {
        channel.send_to_fragment(1, &[i, (i as f64).to_bits()]);
    }
    channel.flush_messages();
    let buffers = outbox.take_outgoing();

    group.bench_function("gid_f64_pairs", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for (_, buf) in &buffers {
                let mut arc = OutArchive::new(buf.clone());
                while let Ok([gid, bits]) = arc.pop::<[u64; 2]>() {
                    sum += gid as f64 + f64::from_bits(bits);
                }
            }
            black_box(sum)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_send_to_fragment, bench_decode);
criterion_main!(benches);
