// src/waitq.rs

//! A lock-free Michael-Scott FIFO of raw pointer payloads.
//!
//! The queue underpins both back-pressure (each ring slot keeps one for its
//! parked producers) and select notification (each ring keeps one for
//! waiting selections). Payloads are pointers produced by `Arc::into_raw`;
//! callers reconstruct the `Arc` on dequeue. Nodes are leased from a
//! [`NodePool`] and only ever freed when the pool or the queue itself is
//! dropped, so a stalled dequeuer can never observe freed memory.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;

pub(crate) struct Node<P> {
  next: AtomicPtr<Node<P>>,
  payload: AtomicPtr<P>,
}

impl<P> Node<P> {
  fn empty() -> NonNull<Node<P>> {
    NonNull::from(Box::leak(Box::new(Node {
      next: AtomicPtr::new(ptr::null_mut()),
      payload: AtomicPtr::new(ptr::null_mut()),
    })))
  }
}

/// Free list of queue nodes. One pool serves every wait queue of a single
/// ring, so node identity is stable for as long as any dequeuer may still
/// hold a stale pointer into the ring.
pub(crate) struct NodePool<P> {
  free: Mutex<Vec<NonNull<Node<P>>>>,
}

unsafe impl<P> Send for NodePool<P> {}
unsafe impl<P> Sync for NodePool<P> {}

impl<P> NodePool<P> {
  pub(crate) fn new() -> Self {
    NodePool {
      free: Mutex::new(Vec::new()),
    }
  }

  fn get(&self) -> NonNull<Node<P>> {
    match self.free.lock().pop() {
      Some(node) => node,
      None => Node::empty(),
    }
  }

  fn put(&self, node: NonNull<Node<P>>) {
    // A pooled node carries no payload and no successor.
    unsafe {
      node.as_ref().next.store(ptr::null_mut(), Ordering::Relaxed);
      node.as_ref().payload.store(ptr::null_mut(), Ordering::Relaxed);
    }
    self.free.lock().push(node);
  }
}

impl<P> Drop for NodePool<P> {
  fn drop(&mut self) {
    for node in self.free.get_mut().drain(..) {
      drop(unsafe { Box::from_raw(node.as_ptr()) });
    }
  }
}

/// The two-pointer FIFO. `head` always points at a sentinel whose payload has
/// already been surrendered; the live queue is everything after it.
pub(crate) struct WaitQueue<P> {
  head: AtomicPtr<Node<P>>,
  tail: AtomicPtr<Node<P>>,
}

unsafe impl<P> Send for WaitQueue<P> {}
unsafe impl<P> Sync for WaitQueue<P> {}

impl<P> WaitQueue<P> {
  pub(crate) fn new() -> Self {
    let sentinel = Node::<P>::empty().as_ptr();
    WaitQueue {
      head: AtomicPtr::new(sentinel),
      tail: AtomicPtr::new(sentinel),
    }
  }

  /// Appends `payload` at the tail. Classic two-CAS enqueue: link the new
  /// node behind the last one, then swing `tail` over it, helping a lagging
  /// enqueuer along the way.
  pub(crate) fn enqueue(&self, pool: &NodePool<P>, payload: *mut P) {
    debug_assert!(!payload.is_null());
    let node = pool.get();
    unsafe {
      node.as_ref().payload.store(payload, Ordering::Relaxed);
    }
    let node_ptr = node.as_ptr();
    loop {
      let tail = self.tail.load(Ordering::Acquire);
      let next = unsafe { (*tail).next.load(Ordering::Acquire) };
      if tail != self.tail.load(Ordering::Acquire) {
        continue;
      }
      if next.is_null() {
        if unsafe {
          (*tail)
            .next
            .compare_exchange(ptr::null_mut(), node_ptr, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        } {
          // Best effort; a helper may already have swung it.
          let _ = self
            .tail
            .compare_exchange(tail, node_ptr, Ordering::AcqRel, Ordering::Acquire);
          return;
        }
      } else {
        // Tail fell behind, help it forward and retry.
        let _ = self
          .tail
          .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
      }
    }
  }

  /// True when the sentinel has no successor. Racy by nature; callers use it
  /// only as a hint.
  pub(crate) fn is_empty(&self) -> bool {
    let head = self.head.load(Ordering::Acquire);
    unsafe { (*head).next.load(Ordering::Acquire).is_null() }
  }

  /// Removes and returns the oldest payload, or null-equivalent `None` when
  /// the queue is empty. The payload is read from the successor before the
  /// head CAS; once the CAS wins, the old sentinel is recycled and the
  /// successor becomes the new sentinel.
  pub(crate) fn dequeue(&self, pool: &NodePool<P>) -> Option<*mut P> {
    loop {
      let head = self.head.load(Ordering::Acquire);
      let tail = self.tail.load(Ordering::Acquire);
      let next = unsafe { (*head).next.load(Ordering::Acquire) };
      if head != self.head.load(Ordering::Acquire) {
        continue;
      }
      if head == tail {
        if next.is_null() {
          return None;
        }
        // Tail fell behind the real last node.
        let _ = self
          .tail
          .compare_exchange(tail, next, Ordering::AcqRel, Ordering::Acquire);
      } else {
        let payload = unsafe { (*next).payload.load(Ordering::Acquire) };
        if self
          .head
          .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
          .is_ok()
        {
          pool.put(unsafe { NonNull::new_unchecked(head) });
          return Some(payload);
        }
      }
    }
  }
}

impl<P> Drop for WaitQueue<P> {
  fn drop(&mut self) {
    // Callers drain live payloads before the queue goes away; what remains
    // here is the sentinel chain. Payload pointers still present are stale
    // copies and must not be touched.
    let mut cursor = *self.head.get_mut();
    while !cursor.is_null() {
      let node = unsafe { Box::from_raw(cursor) };
      cursor = node.next.load(Ordering::Relaxed);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;
  use std::thread;

  fn enqueue_value(q: &WaitQueue<usize>, pool: &NodePool<usize>, v: usize) {
    q.enqueue(pool, Box::into_raw(Box::new(v)));
  }

  fn dequeue_value(q: &WaitQueue<usize>, pool: &NodePool<usize>) -> Option<usize> {
    q.dequeue(pool).map(|p| *unsafe { Box::from_raw(p) })
  }

  #[test]
  fn fifo_order() {
    let pool = NodePool::new();
    let q = WaitQueue::new();
    for v in 0..10 {
      enqueue_value(&q, &pool, v);
    }
    for v in 0..10 {
      assert_eq!(dequeue_value(&q, &pool), Some(v));
    }
    assert_eq!(dequeue_value(&q, &pool), None);
  }

  #[test]
  fn empty_queue_returns_none() {
    let pool = NodePool::<usize>::new();
    let q = WaitQueue::<usize>::new();
    assert!(q.dequeue(&pool).is_none());
    enqueue_value(&q, &pool, 1);
    assert_eq!(dequeue_value(&q, &pool), Some(1));
    assert!(q.dequeue(&pool).is_none());
  }

  #[test]
  fn nodes_are_recycled() {
    let pool = NodePool::new();
    let q = WaitQueue::new();
    for round in 0..100 {
      enqueue_value(&q, &pool, round);
      assert_eq!(dequeue_value(&q, &pool), Some(round));
    }
    // Steady-state churn keeps the pool small: one node in flight at a time.
    assert!(pool.free.lock().len() <= 2);
  }

  #[test]
  fn concurrent_enqueue_dequeue() {
    const PER_PRODUCER: usize = 10_000;
    const PRODUCERS: usize = 4;

    let pool = Arc::new(NodePool::new());
    let q = Arc::new(WaitQueue::new());
    let sum = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
      let (q, pool) = (Arc::clone(&q), Arc::clone(&pool));
      handles.push(thread::spawn(move || {
        for i in 0..PER_PRODUCER {
          enqueue_value(&q, &pool, p * PER_PRODUCER + i);
        }
      }));
    }
    for _ in 0..2 {
      let (q, pool) = (Arc::clone(&q), Arc::clone(&pool));
      let (sum, seen) = (Arc::clone(&sum), Arc::clone(&seen));
      handles.push(thread::spawn(move || {
        while seen.load(Ordering::Relaxed) < PRODUCERS * PER_PRODUCER {
          if let Some(v) = dequeue_value(&q, &pool) {
            sum.fetch_add(v, Ordering::Relaxed);
            seen.fetch_add(1, Ordering::Relaxed);
          } else {
            thread::yield_now();
          }
        }
      }));
    }
    for h in handles {
      h.join().unwrap();
    }

    let total = PRODUCERS * PER_PRODUCER;
    assert_eq!(seen.load(Ordering::Relaxed), total);
    assert_eq!(sum.load(Ordering::Relaxed), total * (total - 1) / 2);
  }
}
