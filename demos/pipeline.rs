//! Multi-producer pipeline: four workers feed one consumer through a small
//! ring, exercising back-pressure the whole way.
//!
//! Run with `cargo run --example pipeline`.

use raceway::RingQueue;
use std::sync::Arc;
use std::thread;

const WORKERS: usize = 4;
const PER_WORKER: usize = 25_000;

fn main() {
  let queue = Arc::new(RingQueue::with_capacity(8).expect("capacity in range"));

  let mut workers = Vec::new();
  for id in 0..WORKERS {
    let queue = Arc::clone(&queue);
    workers.push(thread::spawn(move || {
      for i in 0..PER_WORKER {
        queue.write(id * PER_WORKER + i).expect("queue still open");
      }
    }));
  }

  let consumer = {
    let queue = Arc::clone(&queue);
    thread::spawn(move || {
      let mut total = 0usize;
      let mut count = 0usize;
      while let Ok(v) = queue.read() {
        total += v;
        count += 1;
      }
      (total, count)
    })
  };

  for worker in workers {
    worker.join().expect("worker panicked");
  }
  queue.close().expect("first close");

  let (total, count) = consumer.join().expect("consumer panicked");
  let n = WORKERS * PER_WORKER;
  println!("received {} values, sum {}", count, total);
  assert_eq!(count, n);
  assert_eq!(total, n * (n - 1) / 2);
}
