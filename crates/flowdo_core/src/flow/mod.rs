//! Flow-up recomputation engine.
//!
//! # Responsibility
//! - Escalate dos across time-scale buckets at calendar boundaries.
//! - Reset maintenance completion windows at period boundaries.
//!
//! # Invariants
//! - The engine takes no configuration; it is a function of (items, now).
//! - All items in one run see the same `now` and the same boundary flags.

pub mod boundary;
pub mod engine;
pub mod rules;
