//! Tripwire — BLAKE3 hashing and template drift detection.

pub mod drift;
pub mod hasher;
