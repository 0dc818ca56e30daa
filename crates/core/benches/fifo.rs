use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ravennakit_core::fifo::Spsc;

fn criterion_benchmark(c: &mut Criterion) {
    let fifo = Spsc::new(1024);

    let mut group = c.benchmark_group("spsc_fifo");
    group.throughput(Throughput::Elements(1));
    group.bench_function("write_then_read_one", |bencher| {
        bencher.iter(|| {
            let w = fifo.prepare_for_write(1).expect("room");
            fifo.commit_write(w);
            let r = fifo.prepare_for_read(1).expect("data");
            fifo.commit_read(r);
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
