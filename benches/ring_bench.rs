use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framering::{
    ring::ring_pair, umem::page_size, FillDescriptor, FrameCounter, InMemoryDispatchTable,
    LoopbackHost, PollLoop, RxDescriptor, XskConfig,
};
use std::{sync::Arc, thread};

fn benchmark_single_threaded_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring_SingleThreaded");
    let capacity = 4096u32;

    for batch in [1u32, 16, 64, 256].iter() {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(BenchmarkId::new("reserve_submit_peek_release", batch), batch, |b, &batch| {
            let (mut producer, mut consumer) = ring_pair::<FillDescriptor>(capacity).unwrap();

            b.iter(|| {
                let mut moved = 0;
                while moved < capacity {
                    let (granted, start) = producer.reserve(batch);
                    for i in 0..granted {
                        producer
                            .write(start.wrapping_add(i), FillDescriptor { addr: i as u64 })
                            .unwrap();
                    }
                    producer.submit(granted).unwrap();

                    let (available, start) = consumer.peek(batch);
                    for i in 0..available {
                        criterion::black_box(consumer.read(start.wrapping_add(i)).unwrap());
                    }
                    consumer.release(available).unwrap();
                    moved += available;
                }
            });
        });
    }

    group.finish();
}

fn benchmark_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring_CrossThread");
    let total = 100_000u32;
    group.throughput(Throughput::Elements(total as u64));

    group.bench_function("rx_descriptors_batch_64", |b| {
        b.iter(|| {
            let (mut producer, mut consumer) = ring_pair::<RxDescriptor>(1024).unwrap();

            let writer = thread::spawn(move || {
                let mut sent = 0;
                while sent < total {
                    let (granted, start) = producer.reserve(64u32.min(total - sent));
                    for i in 0..granted {
                        let desc = RxDescriptor {
                            addr: (sent + i) as u64,
                            len: 64,
                            options: 0,
                        };
                        producer.write(start.wrapping_add(i), desc).unwrap();
                    }
                    producer.submit(granted).unwrap();
                    sent += granted;
                    if granted == 0 {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0;
            while received < total {
                let (available, _) = consumer.peek(64);
                consumer.release(available).unwrap();
                received += available;
                if available == 0 {
                    std::hint::spin_loop();
                }
            }
            writer.join().unwrap();
        });
    });

    group.finish();
}

fn benchmark_poll_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("PollLoop_Loopback");
    let packet = [0u8; 64];

    for batch in [16u32, 64].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::new("deliver_poll", batch), batch, |b, &batch| {
            let config = XskConfig::default()
                .with_frame_size(page_size() as u32)
                .with_frame_count(1024)
                .with_ring_size(512)
                .with_batch_size(batch);
            let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 4));
            let mut host = LoopbackHost::new(table.clone());
            let mut poll_loop = PollLoop::open(&config, &mut host, table).unwrap();
            let mut source = host.take_source().unwrap();
            poll_loop.prime().unwrap();

            let packets: Vec<&[u8]> = vec![&packet[..]; batch as usize];
            let mut counter = FrameCounter::new();

            b.iter(|| {
                source.deliver(&packets).unwrap();
                poll_loop.poll_once(&mut counter).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_threaded_batches,
    benchmark_cross_thread,
    benchmark_poll_loop
);
criterion_main!(benches);
