//! Admission/preemption scheduler for climate-control service.
//!
//! Rooms ask for service at a fan speed; at most `capacity` rooms are served
//! at once. Higher speeds preempt lower ones, equal speeds rotate on a time
//! slice, and every service interval is billed to an append-only usage ledger.

pub mod board;
pub mod config;
pub mod control;
pub mod ledger;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod sink;
pub mod ticker;
pub mod wal;
