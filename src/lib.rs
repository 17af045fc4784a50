#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Bounded lock-free MPMC queues with parking back-pressure and a fair,
//! non-polling `select` across queues.
//!
//! A [`RingQueue`] is a fixed-capacity ring of slots, each running its own
//! small state machine and carrying its own list of parked producers. This
//! keeps the hot path to a pair of `fetch_add` cursors and one CAS per
//! operation, while thousands of blocked producers cost nothing but a parked
//! thread each. [`select`] waits on many queues at once without polling any
//! of them: every queue owns a normally-parked auxiliary thread that
//! rendezvouses values with waiting selectors.
//!
//! # Quick start
//!
//! ```
//! use raceway::RingQueue;
//!
//! let q = RingQueue::with_capacity(4).unwrap();
//! q.write("hello").unwrap();
//! assert_eq!(q.read().unwrap(), "hello");
//! ```

pub mod error;
pub mod ring;
pub mod select;
pub mod telemetry;

mod internal;
mod park;
mod waitq;

pub use error::{CapacityError, CloseError, ReadError, SelectError, WriteError};
pub use ring::{RingQueue, MAX_CAPACITY};
pub use select::{select, Selector, MAX_SELECT};
