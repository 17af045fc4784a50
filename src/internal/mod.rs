// src/internal/mod.rs

//! Crate-internal utilities. Not part of the public API.

pub(crate) mod cache_padded;
pub(crate) mod rng;
