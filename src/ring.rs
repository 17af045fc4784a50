// src/ring.rs

//! The bounded lock-free MPMC ring queue.
//!
//! A [`RingQueue`] is a fixed-capacity slot array. Every slot runs its own
//! four-state machine (`Empty -> Busy -> Committed -> Busy -> Empty`, with
//! `Closed` as the closure marker) and carries its own list of parked
//! producers, so back-pressure degrades gracefully when far more producers
//! are blocked than there are cores. Writer and reader cursors are plain
//! `fetch_add` counters masked into the power-of-two slot array.
//!
//! Each queue owns one auxiliary thread that is normally parked and only
//! runs while a [`select`](crate::select()) is waiting on the queue; it
//! rendezvouses values read from the ring with waiting selection records.

use crate::error::{CapacityError, CloseError, ReadError, WriteError};
use crate::internal::cache_padded::CachePadded;
use crate::park::{ParkCell, ParkOutcome};
use crate::select::Selection;
use crate::telemetry;
use crate::waitq::{NodePool, WaitQueue};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};

/// Hard ceiling on the slot count. Requests are rounded up to the next power
/// of two, so the index mask always fits in 16 bits.
pub const MAX_CAPACITY: usize = 1 << 16;

// Per-slot states.
const SLOT_EMPTY: u8 = 0;
const SLOT_BUSY: u8 = 1;
const SLOT_COMMITTED: u8 = 2;
const SLOT_CLOSED: u8 = 3;

// Whole-queue states. Never goes backwards except through reset().
const STATE_OPEN: u8 = 0;
const STATE_CLOSED_FOR_WRITES: u8 = 1;
const STATE_FULLY_CLOSED: u8 = 2;

// Auxiliary thread service states.
const SELECTOR_OPEN: u8 = 0;
const SELECTOR_RUNNING: u8 = 1;

struct Slot<T> {
  state: AtomicU8,
  parker: WaitQueue<ParkCell<T>>,
  item: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
  fn new() -> Self {
    Slot {
      state: AtomicU8::new(SLOT_EMPTY),
      parker: WaitQueue::new(),
      item: UnsafeCell::new(MaybeUninit::uninit()),
    }
  }
}

pub(crate) struct Shared<T> {
  writer_index: CachePadded<AtomicU32>,
  reader_index: CachePadded<AtomicU32>,
  global_state: CachePadded<AtomicU8>,
  selector_state: CachePadded<AtomicU8>,
  index_mask: u32,
  capacity: usize,
  slots: Box<[Slot<T>]>,
  // Registered by the auxiliary thread itself on startup.
  aux_task: OnceLock<Thread>,
  shutdown: AtomicBool,
  // One value the auxiliary thread read but no selector claimed; surrendered
  // to the next select's optimistic pass before it touches the ring.
  backlog: Mutex<Option<T>>,
  selector_waitlist: WaitQueue<Selection<T>>,
  park_nodes: NodePool<ParkCell<T>>,
  selection_nodes: NodePool<Selection<T>>,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T: Send> Shared<T> {
  fn new(capacity: usize) -> Self {
    let slots: Vec<Slot<T>> = (0..capacity).map(|_| Slot::new()).collect();
    Shared {
      writer_index: CachePadded::new(AtomicU32::new(0)),
      reader_index: CachePadded::new(AtomicU32::new(0)),
      global_state: CachePadded::new(AtomicU8::new(STATE_OPEN)),
      selector_state: CachePadded::new(AtomicU8::new(SELECTOR_OPEN)),
      index_mask: (capacity - 1) as u32,
      capacity,
      slots: slots.into_boxed_slice(),
      aux_task: OnceLock::new(),
      shutdown: AtomicBool::new(false),
      backlog: Mutex::new(None),
      selector_waitlist: WaitQueue::new(),
      park_nodes: NodePool::new(),
      selection_nodes: NodePool::new(),
    }
  }

  #[inline]
  fn slot_for(&self, index: u32) -> &Slot<T> {
    // Mask first, then index; the mask keeps the offset inside the array.
    &self.slots[(index & self.index_mask) as usize]
  }

  pub(crate) fn is_fully_closed(&self) -> bool {
    self.global_state.load(Ordering::Acquire) == STATE_FULLY_CLOSED
  }

  pub(crate) fn write_inner(&self, value: T) -> Result<(), WriteError<T>> {
    if self.global_state.load(Ordering::Acquire) != STATE_OPEN {
      return Err(WriteError::Closed(value));
    }

    // A waiting selector takes the value before it ever touches the ring.
    let mut value = value;
    while let Some(raw) = self.selector_waitlist.dequeue(&self.selection_nodes) {
      let selection = unsafe { Arc::from_raw(raw as *const Selection<T>) };
      if let Some(selector) = selection.claim() {
        telemetry::increment_counter("ring::write", "selector_handoff");
        selection.complete(selector, value);
        Selection::release(&selection);
        return Ok(());
      }
      // Another queue already won this selector; drop the record and retry.
      Selection::release(&selection);
    }

    let index = self.writer_index.fetch_add(1, Ordering::AcqRel);
    if self.global_state.load(Ordering::Acquire) == STATE_FULLY_CLOSED {
      // The closure marker is already consumed; undo the reservation.
      self.writer_index.fetch_sub(1, Ordering::AcqRel);
      return Err(WriteError::Closed(value));
    }

    let slot = self.slot_for(index);
    let backoff = Backoff::new();
    let mut cell: Option<Arc<ParkCell<T>>> = None;
    loop {
      match slot
        .state
        .compare_exchange(SLOT_EMPTY, SLOT_BUSY, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          unsafe {
            (*slot.item.get()).write(value);
          }
          slot.state.store(SLOT_COMMITTED, Ordering::Release);
          return Ok(());
        }
        Err(SLOT_BUSY) => backoff.spin(),
        Err(SLOT_COMMITTED) => {
          // Full lap: the previous value in this slot is still unread. Park
          // until a reader makes room or adopts the value outright.
          let waiter = match cell.take() {
            Some(existing) => {
              existing.rearm(value);
              existing
            }
            None => Arc::new(ParkCell::new(value)),
          };
          slot.parker.enqueue(
            &self.park_nodes,
            Arc::into_raw(Arc::clone(&waiter)) as *mut ParkCell<T>,
          );
          telemetry::increment_counter("ring::write", "producer_parked");
          match waiter.wait() {
            ParkOutcome::Adopted => return Ok(()),
            ParkOutcome::Retry => {
              value = waiter.take_value();
              cell = Some(waiter);
              backoff.reset();
            }
          }
        }
        Err(SLOT_CLOSED) => return Err(WriteError::Closed(value)),
        Err(_) => unreachable!("slot state outside the state machine"),
      }
    }
  }

  pub(crate) fn read_inner(&self) -> Result<T, ReadError> {
    let index = self.reader_index.fetch_add(1, Ordering::AcqRel);
    let slot = self.slot_for(index);
    let backoff = Backoff::new();
    loop {
      match slot
        .state
        .compare_exchange(SLOT_COMMITTED, SLOT_BUSY, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          let value = unsafe { (*slot.item.get()).assume_init_read() };
          slot.state.store(SLOT_EMPTY, Ordering::Release);
          // Room opened up; wake the oldest parked producer to re-claim.
          if let Some(raw) = slot.parker.dequeue(&self.park_nodes) {
            let cell = unsafe { Arc::from_raw(raw as *const ParkCell<T>) };
            cell.wake_retry();
            telemetry::increment_counter("ring::read", "producer_retry_wake");
          }
          return Ok(value);
        }
        Err(SLOT_EMPTY) => {
          // No committed value, but a parked producer can hand its value
          // over directly without the slot ever changing state.
          if let Some(raw) = slot.parker.dequeue(&self.park_nodes) {
            let cell = unsafe { Arc::from_raw(raw as *const ParkCell<T>) };
            telemetry::increment_counter("ring::read", "parked_handoff");
            return Ok(cell.adopt());
          }
          if self.global_state.load(Ordering::Acquire) == STATE_FULLY_CLOSED {
            self.reader_index.fetch_sub(1, Ordering::AcqRel);
            return Err(ReadError::Closed);
          }
          backoff.snooze();
        }
        Err(SLOT_BUSY) => backoff.spin(),
        Err(SLOT_CLOSED) => {
          // Drain the closure marker. Exactly one reader wins this CAS and
          // flips the queue to fully closed; losers come around again and
          // leave through the Empty arm.
          if slot
            .state
            .compare_exchange(SLOT_CLOSED, SLOT_EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
          {
            self.global_state.store(STATE_FULLY_CLOSED, Ordering::Release);
            return Err(ReadError::Closed);
          }
        }
        Err(_) => unreachable!("slot state outside the state machine"),
      }
    }
  }

  pub(crate) fn close(&self) -> Result<(), CloseError> {
    if self
      .global_state
      .compare_exchange(
        STATE_OPEN,
        STATE_CLOSED_FOR_WRITES,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_err()
    {
      return Err(CloseError::AlreadyClosed);
    }

    // Plant the closure marker behind all in-flight data: reserve a writer
    // slot like any producer would, but store Closed instead of a value.
    let index = self.writer_index.fetch_add(1, Ordering::AcqRel);
    let slot = self.slot_for(index);
    let backoff = Backoff::new();
    loop {
      match slot
        .state
        .compare_exchange(SLOT_EMPTY, SLOT_BUSY, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          slot.state.store(SLOT_CLOSED, Ordering::Release);
          return Ok(());
        }
        Err(SLOT_BUSY) | Err(SLOT_COMMITTED) => backoff.snooze(),
        Err(SLOT_CLOSED) => return Ok(()),
        Err(_) => unreachable!("slot state outside the state machine"),
      }
    }
  }

  pub(crate) fn take_backlog(&self) -> Option<T> {
    self.backlog.lock().take()
  }

  fn put_backlog(&self, value: T) {
    let mut backlog = self.backlog.lock();
    debug_assert!(backlog.is_none(), "auxiliary stash overwritten");
    *backlog = Some(value);
  }

  /// Wakes the auxiliary thread if it is not already serving selectors.
  /// Returns whether this call was the one that started a service cycle.
  pub(crate) fn signal(&self) -> bool {
    if self
      .selector_state
      .compare_exchange(
        SELECTOR_OPEN,
        SELECTOR_RUNNING,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      if let Some(aux) = self.aux_task.get() {
        aux.unpark();
      }
      true
    } else {
      false
    }
  }

  pub(crate) fn enqueue_selection(&self, selection: &Arc<Selection<T>>) {
    let raw = Arc::into_raw(Arc::clone(selection)) as *mut Selection<T>;
    self.selector_waitlist.enqueue(&self.selection_nodes, raw);
  }
}

impl<T> Drop for Shared<T> {
  fn drop(&mut self) {
    // Values still committed in the ring die with it. The closure marker and
    // busy slots carry nothing. Parker lists are empty by now: a parked
    // producer would mean a live borrow of the queue.
    for slot in self.slots.iter_mut() {
      if *slot.state.get_mut() == SLOT_COMMITTED {
        unsafe {
          slot.item.get_mut().assume_init_drop();
        }
      }
      while let Some(raw) = slot.parker.dequeue(&self.park_nodes) {
        drop(unsafe { Arc::from_raw(raw as *const ParkCell<T>) });
      }
    }
    // Unclaimed selection records must still settle their reference counts.
    while let Some(raw) = self.selector_waitlist.dequeue(&self.selection_nodes) {
      let selection = unsafe { Arc::from_raw(raw as *const Selection<T>) };
      Selection::release(&selection);
    }
  }
}

/// The auxiliary service loop: one per queue, parked unless a selector
/// signalled the queue. Each cycle obtains exactly one value (reclaiming the
/// backlog before reading fresh) and offers it to the oldest selection it
/// can claim; an unclaimed value goes back into the backlog.
fn aux_main<T: Send>(shared: Arc<Shared<T>>) {
  let _ = shared.aux_task.set(thread::current());
  loop {
    while shared.selector_state.load(Ordering::Acquire) != SELECTOR_RUNNING {
      if shared.shutdown.load(Ordering::Acquire) {
        return;
      }
      thread::park();
    }
    if shared.shutdown.load(Ordering::Acquire) {
      return;
    }

    let (mut pending, open) = match shared.take_backlog() {
      Some(value) => (Some(value), true),
      None => match shared.read_inner() {
        Ok(value) => (Some(value), true),
        Err(ReadError::Closed) => (None, false),
      },
    };

    while let Some(raw) = shared.selector_waitlist.dequeue(&shared.selection_nodes) {
      let selection = unsafe { Arc::from_raw(raw as *const Selection<T>) };
      if !open {
        // Propagate closure. The decrement that empties the selection wakes
        // the selector so it can report that everything closed.
        if selection.note_closure() {
          if let Some(selector) = selection.claim() {
            selection.complete_empty(selector);
          }
        }
        Selection::release(&selection);
        continue;
      }
      if let Some(selector) = selection.claim() {
        telemetry::increment_counter("ring::aux", "selector_served");
        selection.complete(selector, pending.take().expect("service cycle without a value"));
        Selection::release(&selection);
        break;
      }
      Selection::release(&selection);
    }

    if let Some(value) = pending {
      telemetry::increment_counter("ring::aux", "backlog_stash");
      shared.put_backlog(value);
    }

    let _ = shared.selector_state.compare_exchange(
      SELECTOR_RUNNING,
      SELECTOR_OPEN,
      Ordering::AcqRel,
      Ordering::Acquire,
    );

    // A record may have been enqueued between the drain above and the
    // reopen, with its signal lost against the running state. Serve it now
    // rather than leaving its selector parked over a stashed value.
    if !shared.selector_waitlist.is_empty()
      && shared
        .selector_state
        .compare_exchange(
          SELECTOR_OPEN,
          SELECTOR_RUNNING,
          Ordering::AcqRel,
          Ordering::Acquire,
        )
        .is_ok()
    {
      continue;
    }
  }
}

/// A bounded multi-producer multi-consumer FIFO queue.
///
/// All operations take `&self`; share the queue across threads with
/// [`Arc`]. Dropping the queue terminates its auxiliary thread and releases
/// every value still in flight.
///
/// # Examples
///
/// ```
/// use raceway::RingQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let q = Arc::new(RingQueue::with_capacity(8).unwrap());
/// let producer = {
///   let q = Arc::clone(&q);
///   thread::spawn(move || {
///     for i in 0..100u32 {
///       q.write(i).unwrap();
///     }
///     q.close().unwrap();
///   })
/// };
/// let mut total = 0;
/// while let Ok(v) = q.read() {
///   total += v;
/// }
/// producer.join().unwrap();
/// assert_eq!(total, 4950);
/// ```
pub struct RingQueue<T: Send + 'static> {
  shared: Arc<Shared<T>>,
  aux: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> RingQueue<T> {
  /// Creates a queue with at least `capacity` slots, rounded up to the next
  /// power of two. Rejects zero and anything above [`MAX_CAPACITY`].
  pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
    if capacity == 0 {
      return Err(CapacityError::Zero);
    }
    if capacity > MAX_CAPACITY {
      return Err(CapacityError::TooLarge);
    }
    let shared = Arc::new(Shared::new(capacity.next_power_of_two()));
    let aux_shared = Arc::clone(&shared);
    let aux = thread::Builder::new()
      .name("raceway-aux".into())
      .spawn(move || aux_main(aux_shared))
      .expect("failed to spawn the auxiliary thread");
    Ok(RingQueue {
      shared,
      aux: Some(aux),
    })
  }

  /// Writes a value, parking on back-pressure until a reader makes room.
  ///
  /// Fails without consuming the value once the queue is closed for writes.
  pub fn write(&self, value: T) -> Result<(), WriteError<T>> {
    self.shared.write_inner(value)
  }

  /// Reads the next value, spinning until one is available or the queue is
  /// fully closed.
  pub fn read(&self) -> Result<T, ReadError> {
    self.shared.read_inner()
  }

  /// Closes the queue for writes and plants a closure marker behind all
  /// in-flight data, so readers drain everything committed first. May block
  /// while the ring is full. Idempotent: a second close reports
  /// [`CloseError::AlreadyClosed`].
  pub fn close(&self) -> Result<(), CloseError> {
    self.shared.close()
  }

  /// Fire-and-forget [`close`](Self::close) on a helper thread.
  pub fn close_async(&self) {
    let shared = Arc::clone(&self.shared);
    thread::spawn(move || {
      let _ = shared.close();
    });
  }

  /// Closes the queue, discards everything still buffered, and reopens it.
  pub fn reset(&self) {
    self.close_async();
    // Drain everything committed before the marker, then reopen.
    while self.shared.read_inner().is_ok() {}
    let _ = self.shared.global_state.compare_exchange(
      STATE_FULLY_CLOSED,
      STATE_OPEN,
      Ordering::AcqRel,
      Ordering::Acquire,
    );
  }

  /// Whether the queue is fully closed: closed for writes and drained.
  pub fn is_closed(&self) -> bool {
    self.shared.is_fully_closed()
  }

  /// The actual slot count after power-of-two rounding.
  pub fn capacity(&self) -> usize {
    self.shared.capacity
  }

  pub(crate) fn shared(&self) -> &Arc<Shared<T>> {
    &self.shared
  }
}

impl<T: Send + 'static> Drop for RingQueue<T> {
  fn drop(&mut self) {
    // Force the terminal state so an auxiliary thread blocked in a read
    // observes closure, then wake and join it. No other user of the queue
    // can exist at this point.
    self.shared.shutdown.store(true, Ordering::Release);
    self.shared.global_state.store(STATE_FULLY_CLOSED, Ordering::Release);
    if let Some(aux) = self.shared.aux_task.get() {
      aux.unpark();
    }
    if let Some(handle) = self.aux.take() {
      let _ = handle.join();
    }
  }
}

impl<T: Send + 'static> fmt::Debug for RingQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.shared.global_state.load(Ordering::Acquire) {
      STATE_OPEN => "Open",
      STATE_CLOSED_FOR_WRITES => "ClosedForWrites",
      STATE_FULLY_CLOSED => "FullyClosed",
      _ => "?",
    };
    f.debug_struct("RingQueue")
      .field("capacity", &self.shared.capacity)
      .field("writer_index", &self.shared.writer_index.load(Ordering::Relaxed))
      .field("reader_index", &self.shared.reader_index.load(Ordering::Relaxed))
      .field("state", &state)
      .finish_non_exhaustive()
  }
}
