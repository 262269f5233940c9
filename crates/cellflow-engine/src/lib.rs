//! cellflow-engine - dependency-graph computation core for sheets.
//!
//! This crate knows nothing about collaboration or scheduling policy; it
//! owns cells, derives the dependency graph from their content, and
//! recomputes dirty cells through a host-supplied compute function.

pub mod engine;
