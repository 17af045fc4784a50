// src/internal/rng.rs

//! A fast, shareable, non-cryptographic randomiser for select shuffling.

use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E37_79B9_7F4A_7C15;

static SEED: AtomicU64 = AtomicU64::new(0x8533_01CC_6A2B_9F01);

/// A Weyl sequence on an atomic counter, finalised with a splitmix-style
/// mixer. `Relaxed` suffices: the state only has to be atomic, it does not
/// order any other memory.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  pub(crate) fn new() -> Self {
    FastRng {
      state: AtomicU64::new(SEED.fetch_add(WEYL_CONSTANT, Ordering::Relaxed) | 1),
    }
  }

  #[inline]
  fn next_u64(&self) -> u64 {
    let mut z = self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
  }

  /// Uniform-ish index in `0..bound` via the widening-multiply trick.
  /// `bound` must be non-zero.
  #[inline]
  pub(crate) fn below(&self, bound: usize) -> usize {
    ((self.next_u64() as u128 * bound as u128) >> 64) as usize
  }

  /// In-place Fisher-Yates shuffle.
  pub(crate) fn shuffle<T>(&self, items: &mut [T]) {
    for i in (1..items.len()).rev() {
      items.swap(i, self.below(i + 1));
    }
  }
}
