//! Interactive comparison session
//!
//! Collects measured voltages from the operator, pairs each one with a serial
//! reading and saves the results when the operator types `end`.

pub mod input;
pub mod runner;
pub mod store;

pub use runner::{spawn_stdin_reader, Session, SessionOutcome};
