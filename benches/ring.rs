// benches/ring.rs

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use raceway::{RingQueue, Selector};
use std::sync::Arc;
use std::thread;

const ITEMS: usize = 100_000;

fn bench_spsc(c: &mut Criterion) {
  let mut group = c.benchmark_group("spsc");
  group.throughput(Throughput::Elements(ITEMS as u64));

  for capacity in [64usize, 1024] {
    group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
      b.iter(|| {
        let q = Arc::new(RingQueue::with_capacity(cap).unwrap());
        let producer = {
          let q = Arc::clone(&q);
          thread::spawn(move || {
            for i in 0..ITEMS {
              q.write(i).unwrap();
            }
          })
        };
        let mut total = 0usize;
        for _ in 0..ITEMS {
          total = total.wrapping_add(q.read().unwrap());
        }
        producer.join().unwrap();
        total
      });
    });
  }
  group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
  let mut group = c.benchmark_group("mpmc");
  group.throughput(Throughput::Elements(ITEMS as u64));
  group.sample_size(10);

  for (producers, consumers) in [(4usize, 4usize), (8, 2)] {
    let label = format!("{}p_{}c", producers, consumers);
    group.bench_function(BenchmarkId::from_parameter(label), |b| {
      b.iter(|| {
        let q = Arc::new(RingQueue::with_capacity(1024).unwrap());
        let per_producer = ITEMS / producers;

        let mut handles = Vec::new();
        for _ in 0..producers {
          let q = Arc::clone(&q);
          handles.push(thread::spawn(move || {
            for i in 0..per_producer {
              q.write(i).unwrap();
            }
          }));
        }
        let mut drains = Vec::new();
        for _ in 0..consumers {
          let q = Arc::clone(&q);
          drains.push(thread::spawn(move || {
            let mut taken = 0usize;
            while q.read().is_ok() {
              taken += 1;
            }
            taken
          }));
        }
        for h in handles {
          h.join().unwrap();
        }
        q.close().unwrap();
        let total: usize = drains.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, per_producer * producers);
      });
    });
  }
  group.finish();
}

fn bench_select_two(c: &mut Criterion) {
  // Keep the preload inside the ring so the single-threaded setup never
  // parks on back-pressure.
  const PER_QUEUE: usize = 2_048;

  let mut group = c.benchmark_group("select");
  group.throughput(Throughput::Elements((2 * PER_QUEUE) as u64));
  group.sample_size(10);
  group.bench_function("two_ready_queues", |b| {
    b.iter(|| {
      let a = RingQueue::with_capacity(PER_QUEUE).unwrap();
      let bq = RingQueue::with_capacity(PER_QUEUE).unwrap();
      let selector = Selector::new();
      for i in 0..PER_QUEUE {
        a.write(i).unwrap();
        bq.write(i).unwrap();
      }
      let mut total = 0usize;
      for _ in 0..2 * PER_QUEUE {
        total = total.wrapping_add(selector.select(&mut [&a, &bq]).unwrap());
      }
      total
    });
  });
  group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpmc, bench_select_two);
criterion_main!(benches);
