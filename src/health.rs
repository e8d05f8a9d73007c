//! Mount health checking and repair
//!
//! Provides:
//! - The per-invocation check-and-repair procedure
//! - A state machine validating every step it takes
//! - Outcome classification and exit codes
//! - A per-server guard against overlapping invocations

pub mod checker;
pub mod guard;
pub mod outcome;
pub mod state;

pub use checker::HealthChecker;
