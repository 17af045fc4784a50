// src/telemetry.rs

//! Feature-gated debug counters.
//!
//! With the `raceway_telemetry` feature enabled the queue counts the rare
//! events that matter when diagnosing contention: producer parks, handoff
//! adoptions, retry wakeups, selector claims, backlog stashes. Disabled (the
//! default) every call compiles to nothing.

#[cfg(feature = "raceway_telemetry")]
mod enabled {
  use std::collections::HashMap;
  use std::sync::Mutex;

  type CounterKey = (&'static str, &'static str);

  lazy_static::lazy_static! {
    static ref COUNTERS: Mutex<HashMap<CounterKey, u64>> = Mutex::new(HashMap::new());
  }

  /// Bumps one named counter.
  pub fn increment_counter_fn(location: &'static str, counter: &'static str) {
    if let Ok(mut counters) = COUNTERS.lock() {
      *counters.entry((location, counter)).or_insert(0) += 1;
    }
  }

  /// Reads one named counter; zero if it never fired.
  pub fn counter_value_fn(location: &'static str, counter: &'static str) -> u64 {
    COUNTERS
      .lock()
      .ok()
      .and_then(|counters| counters.get(&(location, counter)).copied())
      .unwrap_or(0)
  }

  /// Prints every counter to stdout, sorted by location.
  pub fn print_report_fn() {
    if let Ok(counters) = COUNTERS.lock() {
      let mut rows: Vec<_> = counters.iter().collect();
      rows.sort_by_key(|(key, _)| *key);
      println!("--- raceway telemetry ---");
      for ((location, counter), value) in rows {
        println!("  {:<24} {:<24} {}", location, counter, value);
      }
    }
  }

  /// Resets every counter.
  pub fn clear_fn() {
    if let Ok(mut counters) = COUNTERS.lock() {
      counters.clear();
    }
  }
}

#[cfg(not(feature = "raceway_telemetry"))]
mod disabled {
  /// Bumps one named counter. No-op without the `raceway_telemetry` feature.
  #[inline(always)]
  pub fn increment_counter_fn(_location: &'static str, _counter: &'static str) {}
  /// Reads one named counter. Always zero without the feature.
  #[inline(always)]
  pub fn counter_value_fn(_location: &'static str, _counter: &'static str) -> u64 {
    0
  }
  /// Prints every counter. No-op without the feature.
  #[inline(always)]
  pub fn print_report_fn() {}
  /// Resets every counter. No-op without the feature.
  #[inline(always)]
  pub fn clear_fn() {}
}

#[cfg(feature = "raceway_telemetry")]
pub use enabled::{
  clear_fn as clear, counter_value_fn as counter_value, increment_counter_fn as increment_counter,
  print_report_fn as print_report,
};

#[cfg(not(feature = "raceway_telemetry"))]
pub use disabled::{
  clear_fn as clear, counter_value_fn as counter_value, increment_counter_fn as increment_counter,
  print_report_fn as print_report,
};

#[cfg(all(test, feature = "raceway_telemetry"))]
mod tests {
  use super::*;

  #[test]
  fn counters_accumulate() {
    clear();
    increment_counter("here", "things");
    increment_counter("here", "things");
    assert_eq!(counter_value("here", "things"), 2);
    assert_eq!(counter_value("here", "other"), 0);
  }
}
