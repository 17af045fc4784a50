// src/error.rs

//! Errors surfaced by queue and select operations.
//!
//! Nothing here is an exception path: closure races, double closes, and
//! draining a closed queue are all ordinary outcomes reported through these
//! types.

use core::fmt;

/// Error returned by [`RingQueue::write`](crate::RingQueue::write) when the
/// queue no longer accepts writes. The rejected value is handed back.
#[derive(PartialEq, Eq, Clone)]
pub enum WriteError<T> {
  /// The queue is closed for writes; the value was not consumed.
  Closed(T),
}

impl<T> WriteError<T> {
  /// Consumes the error, returning the value that could not be written.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      WriteError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for WriteError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WriteError::Closed(_) => write!(f, "WriteError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for WriteError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("queue closed for writes")
  }
}

impl<T: fmt::Debug> std::error::Error for WriteError<T> {}

/// Error returned by [`RingQueue::read`](crate::RingQueue::read) once the
/// queue is fully closed and drained. Terminal: every later read fails the
/// same way until the queue is reset.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReadError {
  /// The queue is fully closed and holds no more values.
  Closed,
}

impl std::error::Error for ReadError {}
impl fmt::Display for ReadError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("queue fully closed")
  }
}

/// Error returned by [`RingQueue::close`](crate::RingQueue::close) when the
/// queue was already closed. Double close is harmless.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseError {
  /// A previous `close` already moved the queue out of the open state.
  AlreadyClosed,
}

impl std::error::Error for CloseError {}
impl fmt::Display for CloseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("queue is already closed")
  }
}

/// Error returned by [`select`](crate::select()) when every participating
/// queue was, or became, fully closed before a value could be delivered.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SelectError {
  /// All selected queues are closed.
  AllClosed,
}

impl std::error::Error for SelectError {}
impl fmt::Display for SelectError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("all selected queues are closed")
  }
}

/// Error returned at construction for an unusable capacity request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CapacityError {
  /// A queue must hold at least one slot.
  Zero,
  /// Requests above 2^16 slots are rejected; the index mask is 16 bits.
  TooLarge,
}

impl std::error::Error for CapacityError {}
impl fmt::Display for CapacityError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CapacityError::Zero => f.write_str("queue capacity must be at least 1"),
      CapacityError::TooLarge => f.write_str("queue capacity is limited to 65536 slots"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn write_error_returns_value() {
    let err = WriteError::Closed(7usize);
    assert_eq!(err.into_inner(), 7);
  }

  #[test]
  fn display_strings() {
    assert_eq!(WriteError::Closed(0u8).to_string(), "queue closed for writes");
    assert_eq!(ReadError::Closed.to_string(), "queue fully closed");
    assert_eq!(CloseError::AlreadyClosed.to_string(), "queue is already closed");
    assert_eq!(SelectError::AllClosed.to_string(), "all selected queues are closed");
    assert_eq!(CapacityError::Zero.to_string(), "queue capacity must be at least 1");
  }

  #[test]
  fn debug_hides_payload() {
    assert_eq!(format!("{:?}", WriteError::Closed(vec![1, 2, 3])), "WriteError::Closed(..)");
  }
}
