//! In-memory reservation and approval engine for shared vehicles and
//! venues: a resource registry, per-resource booking ledgers with atomic
//! conflict detection, staff-declared unavailability windows, and governed
//! requests that pass through a three-stage approval chain. All state is
//! rebuilt from an append-only WAL on startup.

pub mod audit;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;
