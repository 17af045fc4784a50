//! Select fan-in: one consumer multiplexes two event streams of different
//! shapes through a tagged enum, without polling either queue.
//!
//! Run with `cargo run --example fanin`.

use raceway::{RingQueue, SelectError, Selector};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
enum Event {
  Tick(u64),
  Line(String),
}

fn main() {
  let ticks = Arc::new(RingQueue::with_capacity(16).expect("capacity in range"));
  let lines = Arc::new(RingQueue::with_capacity(16).expect("capacity in range"));

  let ticker = {
    let ticks = Arc::clone(&ticks);
    thread::spawn(move || {
      for n in 0..20u64 {
        ticks.write(Event::Tick(n)).expect("ticks open");
        thread::sleep(Duration::from_millis(5));
      }
      ticks.close().expect("first close of ticks");
    })
  };

  let liner = {
    let lines = Arc::clone(&lines);
    thread::spawn(move || {
      for word in ["fan", "in", "without", "polling"] {
        lines.write(Event::Line(word.to_string())).expect("lines open");
        thread::sleep(Duration::from_millis(23));
      }
      lines.close().expect("first close of lines");
    })
  };

  let selector = Selector::new();
  let (mut tick_count, mut line_count) = (0usize, 0usize);
  loop {
    match selector.select(&mut [&*ticks, &*lines]) {
      Ok(Event::Tick(n)) => {
        tick_count += 1;
        println!("tick {}", n);
      }
      Ok(Event::Line(s)) => {
        line_count += 1;
        println!("line {:?}", s);
      }
      Err(SelectError::AllClosed) => break,
    }
  }

  ticker.join().expect("ticker panicked");
  liner.join().expect("liner panicked");
  println!("done: {} ticks, {} lines", tick_count, line_count);
  assert_eq!(tick_count, 20);
  assert_eq!(line_count, 4);
}
