#![doc = include_str!("../../../README.md")]
//!

//! This crate re-exports the logbook façade, its backends and the log
//! parsers from `logbook-core`.

pub use logbook_core::*;
