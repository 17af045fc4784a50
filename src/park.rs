// src/park.rs

//! The record a producer leaves behind when it parks on a full slot.
//!
//! A parked producer enqueues a [`ParkCell`] on its slot's parker list and
//! sleeps. It is woken in one of two ways:
//!
//! * a reader that found the slot empty adopts the cell's value outright and
//!   delivers it as its own read result (the handoff path), or
//! * a reader that just emptied the slot wakes the oldest waiter to retry its
//!   claim on the now-empty slot.
//!
//! The cell is shared through an `Arc`: the producer keeps one handle, the
//! parker list carries a raw clone.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, Thread};

const WAITING: u8 = 0;
const ADOPTED: u8 = 1;
const RETRY: u8 = 2;

/// How a parked producer was woken.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParkOutcome {
  /// A reader consumed the value; the write is complete.
  Adopted,
  /// The slot was emptied; re-attempt the claim, the value is still ours.
  Retry,
}

pub(crate) struct ParkCell<T> {
  thread: Thread,
  state: AtomicU8,
  value: UnsafeCell<Option<T>>,
}

// The value cell is only touched by the producer before enqueue / after a
// Retry wakeup, and by the single reader that wins the dequeue.
unsafe impl<T: Send> Send for ParkCell<T> {}
unsafe impl<T: Send> Sync for ParkCell<T> {}

impl<T> ParkCell<T> {
  pub(crate) fn new(value: T) -> Self {
    ParkCell {
      thread: thread::current(),
      state: AtomicU8::new(WAITING),
      value: UnsafeCell::new(Some(value)),
    }
  }

  /// Parks until a reader settles the cell one way or the other.
  pub(crate) fn wait(&self) -> ParkOutcome {
    loop {
      match self.state.load(Ordering::Acquire) {
        WAITING => thread::park(),
        ADOPTED => return ParkOutcome::Adopted,
        RETRY => return ParkOutcome::Retry,
        _ => unreachable!("park cell in impossible state"),
      }
    }
  }

  /// Re-arms the cell with the value before it is enqueued for another round.
  pub(crate) fn rearm(&self, value: T) {
    unsafe {
      *self.value.get() = Some(value);
    }
    self.state.store(WAITING, Ordering::Relaxed);
  }

  /// Reader side, handoff path: take the value, mark adopted, wake.
  pub(crate) fn adopt(&self) -> T {
    let value = unsafe { (*self.value.get()).take() };
    self.state.store(ADOPTED, Ordering::Release);
    self.thread.unpark();
    value.expect("parked producer carried no value")
  }

  /// Reader side, retry path: leave the value alone, wake to re-claim.
  pub(crate) fn wake_retry(&self) {
    self.state.store(RETRY, Ordering::Release);
    self.thread.unpark();
  }

  /// Producer side, after a Retry wakeup: repossess the value.
  pub(crate) fn take_value(&self) -> T {
    unsafe { (*self.value.get()).take() }.expect("park cell value already taken")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn adopt_delivers_value_and_wakes() {
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = thread::spawn(move || {
      let cell = Arc::new(ParkCell::new(99u32));
      tx.send(Arc::clone(&cell)).unwrap();
      assert_eq!(cell.wait(), ParkOutcome::Adopted);
    });

    let cell = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(cell.adopt(), 99);
    handle.join().unwrap();
  }

  #[test]
  fn retry_keeps_value_with_producer() {
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = thread::spawn(move || {
      let cell = Arc::new(ParkCell::new(7u32));
      tx.send(Arc::clone(&cell)).unwrap();
      assert_eq!(cell.wait(), ParkOutcome::Retry);
      cell.take_value()
    });

    let cell = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    cell.wake_retry();
    assert_eq!(handle.join().unwrap(), 7);
  }

  #[test]
  fn rearm_allows_reuse() {
    let cell = ParkCell::new(1u8);
    cell.wake_retry();
    assert_eq!(cell.wait(), ParkOutcome::Retry);
    assert_eq!(cell.take_value(), 1);
    cell.rearm(2);
    assert_eq!(cell.adopt(), 2);
    assert_eq!(cell.wait(), ParkOutcome::Adopted);
  }
}
