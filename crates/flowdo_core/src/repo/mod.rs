//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from services and the flow-up engine.
//!
//! # Invariants
//! - Repository writes must enforce `Do::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidData`) in
//!   addition to DB transport errors.

pub mod do_repo;
