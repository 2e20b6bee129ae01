//! Stratus — typed cloud stack synthesis.
//!
//! Four definition units (network, database, secrets, service) build
//! deterministic stack templates for an external deployment engine.
//! BLAKE3 manifests make every synthesis diffable and verifiable.

pub mod cli;
pub mod core;
pub mod stacks;
pub mod tripwire;
