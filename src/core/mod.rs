//! Core synthesis logic — config types, parsing, resolution, planning, output.

pub mod cidr;
pub mod env;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod synth;
pub mod types;
