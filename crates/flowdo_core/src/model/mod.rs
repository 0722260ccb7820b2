//! Domain model for time-bucketed dos.
//!
//! # Responsibility
//! - Define canonical data structures used by flow-up and CRUD services.
//!
//! # Invariants
//! - Every do is identified by a stable `DoId`.
//! - Bucket and kind are closed enums; there is no fallback variant.

pub mod do_item;
