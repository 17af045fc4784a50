// src/select.rs

//! Fair, non-polling selection over several ring queues.
//!
//! A call to [`select`] shares one [`Selection`] record with the auxiliary
//! thread of every candidate queue, signals them, and parks. The first
//! participant to claim the record delivers a value and wakes the selector;
//! queues that close instead decrement the record's open-queue count, and
//! the decrement that empties it reports that everything closed. Records are
//! reference counted and recycled through a pool once every participant has
//! let go.
//!
//! Fairness comes from shuffling the candidate order on every call and from
//! the per-queue auxiliary threads racing to claim the record: no queue is
//! polled ahead of any other.

use crate::error::SelectError;
use crate::internal::rng::FastRng;
use crate::ring::RingQueue;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};

/// The most queues a single `select` call may wait on. Keeps the selection
/// record's bookkeeping in byte-sized counters.
pub const MAX_SELECT: usize = 127;

/// The record shared between one parked selector and the auxiliary threads
/// of the queues it waits on. The claim flag is the only cycle breaker
/// needed: once taken, the selector's thread handle is gone and reference
/// counting reclaims the record.
pub(crate) struct Selection<T> {
  thread: UnsafeCell<Option<Thread>>,
  claimed: AtomicBool,
  completed: AtomicBool,
  data: UnsafeCell<Option<T>>,
  open_queues: AtomicU8,
  refs: AtomicU8,
  pool: Weak<PoolCore<T>>,
}

// The cells are only touched by the selector before publication and by the
// single claimer afterwards; the claim CAS hands over exclusivity.
unsafe impl<T: Send> Send for Selection<T> {}
unsafe impl<T: Send> Sync for Selection<T> {}

impl<T> Selection<T> {
  fn fresh(pool: Weak<PoolCore<T>>) -> Self {
    Selection {
      thread: UnsafeCell::new(None),
      claimed: AtomicBool::new(false),
      completed: AtomicBool::new(false),
      data: UnsafeCell::new(None),
      open_queues: AtomicU8::new(0),
      refs: AtomicU8::new(0),
      pool,
    }
  }

  /// Prepares a just-acquired record for one call over `queues` queues. The
  /// extra reference is the selector's own.
  fn arm(&self, queues: u8) {
    unsafe {
      *self.thread.get() = Some(thread::current());
    }
    self.claimed.store(false, Ordering::Relaxed);
    self.completed.store(false, Ordering::Relaxed);
    self.open_queues.store(queues, Ordering::Relaxed);
    self.refs.store(queues + 1, Ordering::Relaxed);
  }

  /// Takes exclusive delivery rights. Exactly one participant wins; the
  /// winner receives the selector's thread handle for the wakeup.
  pub(crate) fn claim(&self) -> Option<Thread> {
    if self
      .claimed
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      unsafe { (*self.thread.get()).take() }
    } else {
      None
    }
  }

  pub(crate) fn is_claimed(&self) -> bool {
    self.claimed.load(Ordering::Acquire)
  }

  /// Publishes the value and wakes the selector. Claimers only.
  pub(crate) fn complete(&self, selector: Thread, value: T) {
    unsafe {
      *self.data.get() = Some(value);
    }
    self.completed.store(true, Ordering::Release);
    selector.unpark();
  }

  /// Wakes the selector with no value: every queue it waited on closed.
  pub(crate) fn complete_empty(&self, selector: Thread) {
    self.completed.store(true, Ordering::Release);
    selector.unpark();
  }

  /// Records that one participating queue closed. True when this was the
  /// last open queue, which obliges the caller to wake the selector.
  pub(crate) fn note_closure(&self) -> bool {
    self.open_queues.fetch_sub(1, Ordering::AcqRel) == 1
  }

  fn wait(&self) {
    while !self.completed.load(Ordering::Acquire) {
      thread::park();
    }
  }

  fn take_data(&self) -> Option<T> {
    unsafe { (*self.data.get()).take() }
  }

  /// Drops one reference. The last holder scrubs the record and returns it
  /// to its pool, if it still has one.
  pub(crate) fn release(this: &Arc<Self>) {
    if this.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
      unsafe {
        *this.thread.get() = None;
        *this.data.get() = None;
      }
      this.claimed.store(false, Ordering::Relaxed);
      this.completed.store(false, Ordering::Relaxed);
      if let Some(pool) = this.pool.upgrade() {
        pool.free.lock().push(Arc::clone(this));
      }
    }
  }
}

struct PoolCore<T> {
  free: Mutex<Vec<Arc<Selection<T>>>>,
}

/// A reusable source of selection records. Owned by a [`Selector`]; records
/// flow back once every queue that saw them has let go, so steady-state
/// selection allocates nothing.
pub(crate) struct SelectionPool<T> {
  core: Arc<PoolCore<T>>,
}

impl<T> SelectionPool<T> {
  fn new() -> Self {
    SelectionPool {
      core: Arc::new(PoolCore {
        free: Mutex::new(Vec::new()),
      }),
    }
  }

  fn acquire(&self) -> Arc<Selection<T>> {
    match self.core.free.lock().pop() {
      Some(record) => record,
      None => Arc::new(Selection::fresh(Arc::downgrade(&self.core))),
    }
  }
}

/// A reusable handle for repeated [`select`] calls.
///
/// Functionally identical to the free [`select`] function, but selection
/// records are pooled across calls instead of allocated per call.
///
/// # Examples
///
/// ```
/// use raceway::{RingQueue, Selector};
///
/// let a = RingQueue::with_capacity(4).unwrap();
/// let b = RingQueue::with_capacity(4).unwrap();
/// a.write(1u32).unwrap();
///
/// let selector = Selector::new();
/// assert_eq!(selector.select(&mut [&a, &b]).unwrap(), 1);
/// ```
pub struct Selector<T: Send + 'static> {
  pool: SelectionPool<T>,
  rng: FastRng,
}

impl<T: Send + 'static> Selector<T> {
  /// Creates a selector with an empty record pool.
  pub fn new() -> Self {
    Selector {
      pool: SelectionPool::new(),
      rng: FastRng::new(),
    }
  }

  /// Waits for a value from any of `queues`.
  ///
  /// Returns the value delivered by whichever queue won the race, or
  /// [`SelectError::AllClosed`] once every candidate is fully closed. The
  /// slice is reordered in place. Panics if more than [`MAX_SELECT`] queues
  /// are passed.
  pub fn select(&self, queues: &mut [&RingQueue<T>]) -> Result<T, SelectError> {
    select_with(Some(&self.pool), &self.rng, queues)
  }
}

impl<T: Send + 'static> Default for Selector<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + 'static> fmt::Debug for Selector<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Selector")
      .field("pooled_records", &self.pool.core.free.lock().len())
      .finish()
  }
}

/// Waits for a value from any of `queues` without a reusable [`Selector`].
///
/// Semantics match [`Selector::select`]; the selection record is allocated
/// for this call alone.
///
/// # Examples
///
/// ```
/// use raceway::{select, RingQueue, SelectError};
///
/// let a = RingQueue::<u32>::with_capacity(4).unwrap();
/// let b = RingQueue::<u32>::with_capacity(4).unwrap();
/// a.close().unwrap();
/// b.close().unwrap();
/// let _ = a.read();
/// let _ = b.read();
/// assert_eq!(select(&mut [&a, &b]).unwrap_err(), SelectError::AllClosed);
/// ```
pub fn select<T: Send + 'static>(queues: &mut [&RingQueue<T>]) -> Result<T, SelectError> {
  let rng = FastRng::new();
  select_with(None, &rng, queues)
}

fn select_with<T: Send + 'static>(
  pool: Option<&SelectionPool<T>>,
  rng: &FastRng,
  queues: &mut [&RingQueue<T>],
) -> Result<T, SelectError> {
  assert!(
    queues.len() <= MAX_SELECT,
    "select is limited to {} queues per call",
    MAX_SELECT
  );

  // Push fully closed queues to the tail and shrink the active window.
  let mut active = queues.len();
  let mut i = 0;
  while i < active {
    if queues[i].is_closed() {
      active -= 1;
      queues.swap(i, active);
    } else {
      i += 1;
    }
  }
  if active == 0 {
    return Err(SelectError::AllClosed);
  }

  // Optimistic pass: a value stashed by some auxiliary thread is free.
  for queue in queues[..active].iter() {
    if let Some(value) = queue.shared().take_backlog() {
      return Ok(value);
    }
  }

  rng.shuffle(&mut queues[..active]);

  let selection = match pool {
    Some(pool) => pool.acquire(),
    None => Arc::new(Selection::fresh(Weak::new())),
  };
  selection.arm(active as u8);

  for queue in queues[..active].iter() {
    queue.shared().enqueue_selection(&selection);
  }

  // Wake at least one auxiliary thread. If every queue is already mid-cycle
  // for some other selector, keep retrying: an auxiliary thread that drains
  // its waitlist and reopens before seeing our record would otherwise leave
  // us parked with nobody signalled.
  let backoff = Backoff::new();
  loop {
    let mut woken = 0usize;
    for queue in queues[..active].iter() {
      if queue.shared().signal() {
        woken += 1;
      }
    }
    if woken > 0 || selection.is_claimed() {
      break;
    }
    backoff.snooze();
  }

  selection.wait();
  let data = selection.take_data();
  Selection::release(&selection);
  match data {
    Some(value) => Ok(value),
    None => Err(SelectError::AllClosed),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn selection_claim_is_exclusive() {
    let selection = Selection::<u32>::fresh(Weak::new());
    selection.arm(2);
    assert!(selection.claim().is_some());
    assert!(selection.claim().is_none());
    assert!(selection.is_claimed());
  }

  #[test]
  fn note_closure_reports_last_queue() {
    let selection = Selection::<u32>::fresh(Weak::new());
    selection.arm(3);
    assert!(!selection.note_closure());
    assert!(!selection.note_closure());
    assert!(selection.note_closure());
  }

  #[test]
  fn released_records_return_to_their_pool() {
    let pool = SelectionPool::<u32>::new();
    let record = pool.acquire();
    record.arm(1);
    Selection::release(&record);
    Selection::release(&record);
    assert_eq!(pool.core.free.lock().len(), 1);
    // The recycled record comes back scrubbed.
    let again = pool.acquire();
    assert!(!again.is_claimed());
    assert!(again.take_data().is_none());
  }

  #[test]
  fn poolless_records_just_die() {
    let record = Arc::new(Selection::<u32>::fresh(Weak::new()));
    record.arm(1);
    Selection::release(&record);
    Selection::release(&record);
    assert_eq!(Arc::strong_count(&record), 1);
  }
}
