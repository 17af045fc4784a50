// Shared item-count constants for the integration tests.

#![allow(dead_code)]

pub const ITEMS_LOW: usize = 1_000;
pub const ITEMS_MEDIUM: usize = 10_000;
pub const ITEMS_HIGH: usize = 50_000;
